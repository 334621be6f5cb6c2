use frames::RemoteError;

/// Errors surfaced to callers of the broker client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The link to the broker is not open.
    #[error("not connected to broker")]
    NotConnected,
    /// No response arrived before the per-call deadline.
    #[error("timed out waiting for response")]
    Timeout,
    /// The client was dropped or shut down while the call was pending.
    #[error("client closed")]
    Closed,
    /// The WebSocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The WebSocket failed mid-session.
    #[error("websocket transport failed: {0}")]
    WsTransport(Box<tokio_tungstenite::tungstenite::Error>),
    /// A typed payload could not be converted to or from JSON.
    #[error("payload conversion failed: {0}")]
    Payload(#[from] serde_json::Error),
    /// The broker answered with an error payload.
    #[error("broker returned error: {0}")]
    Remote(#[from] RemoteError),
}
