mod ds18b20;
mod host;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
