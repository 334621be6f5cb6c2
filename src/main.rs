mod demo;

use server::{BrokerServer, ServerConfig, ServerError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let mut broker = BrokerServer::new(config);
    broker.register_module(demo::MODULE_NAME, demo::module());

    tracing::info!(modules = ?broker.registry().module_names(), "modules registered");
    broker.listen().await
}
