use alloy_primitives::{FixedBytes, U160};
use malachite::Natural;

pub fn u160_to_natural(num: U160) -> Natural {
    Natural::from_limbs_asc(&num.into_limbs())
}

/// Reads a right-padded `bytes32` token string, `None` when it is empty or
/// not utf8.
pub fn bytes32_to_string(bytes: FixedBytes<32>) -> Option<String> {
    let end = bytes.iter().rposition(|b| *b != 0)? + 1;
    let s = std::str::from_utf8(&bytes[..end]).ok()?;

    Some(s.to_string())
}
