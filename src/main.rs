#[actix_web::main]
async fn main() {
    if let Err(e) = askdb_lib::run().await {
        eprintln!("askdb: {}", e);
        std::process::exit(1);
    }
}
