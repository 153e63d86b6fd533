#[tokio::main]
async fn main() -> anyhow::Result<()> {
    studyhall::run().await
}
