fn main() {
    dotenv::dotenv().ok();

    if let Err(err) = dex_price_stream::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
