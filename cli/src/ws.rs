//! Websocket transport — connects a session runtime to the relay.
//!
//! DESIGN
//! ======
//! `connect` upgrades against `/ws`, waits for the relay's
//! `session:connected` welcome, then splits the socket into two pumps:
//! - writer: runtime frames → protobuf binary messages
//! - reader: binary messages → `TransportEvent`s for the runtime
//!
//! Dropping the runtime's outbound sender closes the socket, which is how
//! the relay learns this peer left.

use std::time::Duration;

use async_trait::async_trait;
use frames::{FRAME_MESSAGE, Frame, SYSCALL_CONNECTED, SYSCALL_ERROR, Welcome};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use session::transport::{ConnectRequest, Link, session_from_welcome};
use session::{PeerId, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_CAPACITY: usize = 256;

pub struct WsTransport {
    relay_url: String,
}

impl WsTransport {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self { relay_url: relay_url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Link, TransportError> {
        let url = ws_url(&self.relay_url, &request)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| connect_error(&request.session_code, e))?;
        let (mut sink, mut stream) = stream.split();

        let welcome = wait_for_welcome(&mut stream).await?;
        let session = session_from_welcome(&welcome);
        let members = welcome.members.into_iter().map(PeerId::new).collect();
        info!(session = %session.session_code, host = %session.host_peer_id, "ws: connected to relay");

        let (outbound, mut out_rx) = mpsc::channel::<Frame>(QUEUE_CAPACITY);
        let (in_tx, inbound) = mpsc::channel::<TransportEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frames::encode_frame(&frame).into())).await {
                    warn!(error = %e, "ws: send failed");
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "ws: close failed");
            }
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let bytes = match message {
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "ws: receive failed");
                        break;
                    }
                };
                let frame = match frames::decode_frame(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "ws: dropping undecodable frame");
                        continue;
                    }
                };
                if frame.syscall == SYSCALL_ERROR {
                    warn!(message = error_message(&frame), "ws: relay reported an error");
                    continue;
                }
                if in_tx.send(TransportEvent::from_frame(frame)).await.is_err() {
                    break;
                }
            }
            if in_tx.send(TransportEvent::Closed).await.is_err() {
                debug!("ws: runtime already gone");
            }
        });

        Ok(Link { session, members, outbound, inbound })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Relay websocket URL for a connect request. `http(s)` bases map to `ws(s)`.
pub fn ws_url(base_url: &str, request: &ConnectRequest) -> Result<reqwest::Url, TransportError> {
    let invalid = |reason: String| TransportError::Connect(format!("invalid relay url {base_url}: {reason}"));
    let mut url = reqwest::Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid("cannot switch scheme".into()))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("session", &request.session_code);
        query.append_pair("peer", request.peer_id.as_str());
        if let Some(open) = &request.open {
            query.append_pair("tasks", &open.task_count.to_string());
        }
    }
    Ok(url)
}

fn connect_error(session_code: &str, err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            404 => TransportError::SessionNotFound(session_code.to_owned()),
            409 => TransportError::SessionExists(session_code.to_owned()),
            503 => TransportError::SessionFull(session_code.to_owned()),
            status => TransportError::Connect(format!("relay refused upgrade with HTTP {status}")),
        },
        other => TransportError::Connect(other.to_string()),
    }
}

async fn wait_for_welcome<S>(stream: &mut S) -> Result<Welcome, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(TransportError::Closed);
            };
            let bytes = match message.map_err(|e| TransportError::Connect(e.to_string()))? {
                Message::Binary(bytes) => bytes,
                Message::Close(_) => return Err(TransportError::Closed),
                _ => continue,
            };
            let frame = frames::decode_frame(&bytes).map_err(|e| TransportError::Connect(e.to_string()))?;
            match frame.syscall.as_str() {
                SYSCALL_CONNECTED => {
                    return serde_json::from_value(frame.data).map_err(|e| TransportError::Connect(e.to_string()));
                }
                SYSCALL_ERROR => return Err(TransportError::Connect(error_message(&frame).to_owned())),
                other => debug!(syscall = other, "ws: frame before welcome ignored"),
            }
        }
    };
    tokio::time::timeout(WELCOME_TIMEOUT, fut)
        .await
        .map_err(|_| TransportError::Connect("timed out waiting for relay welcome".into()))?
}

fn error_message(frame: &Frame) -> &str {
    frame
        .data
        .get(FRAME_MESSAGE)
        .and_then(Value::as_str)
        .unwrap_or("-")
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
