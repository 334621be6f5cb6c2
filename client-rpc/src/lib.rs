//! Broker client — call remote modules over a WebSocket link.
//!
//! ```no_run
//! # async fn demo() -> Result<(), client_rpc::ClientError> {
//! use client_rpc::{BrokerClient, ClientConfig};
//!
//! let client = BrokerClient::start(ClientConfig::default());
//! client.wait_until_open().await?;
//! let greeting = client.module("core").call("greet", serde_json::Value::Null).await?;
//! # let _ = greeting;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod endpoint;
mod error;
mod pending;
mod proxy;
pub mod reconnect;

pub use client::{BrokerClient, LinkState};
pub use config::ClientConfig;
pub use error::ClientError;
pub use frames::{Message, RemoteError};
pub use proxy::{ModuleProxy, RemoteMethod};
pub use reconnect::{ReconnectPolicy, ReconnectSchedule};
