#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setka_studio::server::run().await
}
