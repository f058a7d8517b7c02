#[tokio::main]
async fn main() {
    match connector_engine::cli::run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("connector-engine: {}", err);
            std::process::exit(1);
        }
    }
}
