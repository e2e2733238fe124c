#[tokio::main]
async fn main() {
    if let Err(e) = tacedge::run().await {
        eprintln!("tacedge-gateway failed to start: {e:#}");
        std::process::exit(1);
    }
}
