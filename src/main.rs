#[actix_web::main]
async fn main() -> std::io::Result<()> {
    payroll_docgen_server::run().await
}
