mod apply;
mod ble;
mod device;
mod host;
mod journal;
mod notify;
mod recovery;
mod retry;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
