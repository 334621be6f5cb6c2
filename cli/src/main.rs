use std::time::Duration;

use clap::{Parser, Subcommand};
use client_rpc::{BrokerClient, ClientConfig, ClientError, RemoteError};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const BROKER_TARGET: &str = "broker";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("could not reach broker at {url} within {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },
    #[error("broker did not announce its modules")]
    NoAnnouncement,
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Parser, Debug)]
#[command(name = "modbroker-cli", about = "Call modules exposed by a modbroker server")]
struct Cli {
    #[arg(long, env = "BROKER_URL", default_value = client_rpc::config::DEFAULT_BROKER_URL)]
    url: String,

    #[arg(long, env = "BROKER_CALL_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invoke `<module>.<method>` and print the response payload.
    Call {
        module: String,
        method: String,
        #[arg(long, default_value = "null", help = "JSON payload sent as the sole argument")]
        payload: String,
    },
    /// List module names announced by the broker.
    Modules,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env().with_url(cli.url.clone());
    config.call_timeout = (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms));

    let client = BrokerClient::new(config);
    let mut events = client.subscribe_events();
    client.connect(cli.url.clone());
    wait_open(&client, &cli).await?;
    debug!(url = %cli.url, attempts = client.connect_attempts(), "cli: connected");

    let result = match cli.command {
        Command::Call { module, method, payload } => run_call(&client, &module, &method, &payload).await,
        Command::Modules => {
            let announced = tokio::time::timeout(Duration::from_millis(cli.connect_timeout_ms), async {
                while let Ok(event) = events.recv().await {
                    debug!(target_module = %event.target, "cli: event received");
                    if event.target == BROKER_TARGET {
                        return Some(event.payload);
                    }
                }
                None
            })
            .await
            .ok()
            .flatten()
            .ok_or(CliError::NoAnnouncement)?;
            print_json(&announced)
        }
    };

    client.shutdown();
    result
}

async fn wait_open(client: &BrokerClient, cli: &Cli) -> Result<(), CliError> {
    match tokio::time::timeout(Duration::from_millis(cli.connect_timeout_ms), client.wait_until_open()).await {
        Ok(opened) => Ok(opened?),
        Err(_) => Err(CliError::ConnectTimeout { url: cli.url.clone(), timeout_ms: cli.connect_timeout_ms }),
    }
}

async fn run_call(client: &BrokerClient, module: &str, method: &str, payload: &str) -> Result<(), CliError> {
    let payload = parse_payload(payload)?;
    let response = client.module(module).call(method, payload).await?;
    let remote = RemoteError::from_payload(&response);
    debug!(module, method, failed = remote.is_some(), "cli: call answered");
    if let Some(remote) = remote {
        return Err(ClientError::Remote(remote).into());
    }
    print_json(&response)
}

fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(trimmed)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
