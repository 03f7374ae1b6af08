#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = vitaview_uploads::run().await {
        eprintln!("vitaview-upload fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
