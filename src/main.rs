#[tokio::main]
async fn main() -> anyhow::Result<()> {
    overlay_lib::logger::init();
    overlay_lib::run().await
}
