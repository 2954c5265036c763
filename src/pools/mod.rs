mod price;
pub use price::*;

mod types;
pub use types::*;
