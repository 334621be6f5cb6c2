//! Connection endpoint — owns one WebSocket session.
//!
//! A single task owns the socket. Outbound messages arrive through a channel
//! and are written one frame at a time; inbound text frames are decoded and
//! handed to the caller's delivery function. Once `run` returns nothing more
//! is delivered.

use frames::{CodecError, Message, decode_message, encode_message};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) struct Endpoint {
    stream: WsStream,
}

impl Endpoint {
    /// Perform the WebSocket handshake.
    pub(crate) async fn open(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::WsConnect(Box::new(e)))?;
        Ok(Self { stream })
    }

    /// Pump frames until the session ends.
    ///
    /// Returns `Ok(())` when the peer closes or every outbound sender is
    /// dropped, and an error when the transport fails.
    pub(crate) async fn run<F>(mut self, mut outbound: mpsc::UnboundedReceiver<Message>, mut deliver: F) -> Result<(), ClientError>
    where
        F: FnMut(Message),
    {
        loop {
            tokio::select! {
                frame = self.stream.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    match frame.map_err(|e| ClientError::WsTransport(Box::new(e)))? {
                        WsMessage::Text(text) => match decode_message(text.as_str()) {
                            Ok(message) => deliver(message),
                            Err(CodecError::UnknownKind(kind)) => warn!(kind, "endpoint: unhandled message kind"),
                            Err(e) => warn!(error = %e, "endpoint: dropping malformed frame"),
                        },
                        WsMessage::Close(_) => return Ok(()),
                        WsMessage::Binary(_) => debug!("endpoint: ignoring binary frame"),
                        _ => {}
                    }
                }
                out = outbound.recv() => {
                    let Some(message) = out else {
                        let _ = self.stream.close(None).await;
                        return Ok(());
                    };
                    match encode_message(&message) {
                        Ok(json) => self
                            .stream
                            .send(WsMessage::Text(json.into()))
                            .await
                            .map_err(|e| ClientError::WsTransport(Box::new(e)))?,
                        Err(e) => warn!(id = %message.id, error = %e, "endpoint: failed to serialize message"),
                    }
                }
            }
        }
    }
}
