//! WebSocket transport adapter feeding the hub
//!
//! The adapter owns everything connection-shaped: accepting sockets,
//! enforcing the origin allow-list during the handshake, assigning
//! connection ids, decoding inbound frames into [`ClientEvent`]s and
//! draining each connection's outbound queue. The hub never touches a
//! socket; it only sees [`HubEvent`]s and per-connection senders.
//!
//! Delivery contract kept here: `Connect` is posted before any message for
//! a connection, `Disconnect` at most once after the last, and frames from
//! one connection reach the hub in arrival order.

use crate::hub::HubEvent;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use quiz_protocol::{ClientEvent, ConnId, ServerEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// Accepts connections forever, one handler task per socket.
pub async fn run_listener(
    listener: TcpListener,
    allowed_origins: Arc<Vec<String>>,
    hub_tx: UnboundedSender<HubEvent>,
) {
    let next_conn_id = Arc::new(AtomicU64::new(1));

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let conn_id = ConnId::new(next_conn_id.fetch_add(1, Ordering::Relaxed));
                let origins = Arc::clone(&allowed_origins);
                let hub_tx = hub_tx.clone();

                tokio::spawn(async move {
                    handle_connection(stream, peer, conn_id, origins, hub_tx).await;
                });
            }
            Err(e) => {
                error!("error accepting connection: {}", e);
            }
        }
    }
}

/// Checks the handshake Origin header against the allow-list.
///
/// An empty list admits any origin (development mode). A missing header
/// means a non-browser client and is admitted; browsers always send one.
fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => allowed.iter().any(|allowed| allowed == origin),
        None => true,
    }
}

/// Runs one connection from handshake to disconnect.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnId,
    allowed_origins: Arc<Vec<String>>,
    hub_tx: UnboundedSender<HubEvent>,
) {
    let origins = Arc::clone(&allowed_origins);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());

        if origin_allowed(&origins, origin) {
            Ok(response)
        } else {
            warn!(
                "rejected connection from {} with origin {:?}",
                peer, origin
            );
            let mut refusal = ErrorResponse::new(None);
            *refusal.status_mut() = StatusCode::FORBIDDEN;
            Err(refusal)
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    info!("participant {} connected from {}", conn_id, peer);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();
    if hub_tx
        .send(HubEvent::Connect {
            id: conn_id,
            sender: outbound_tx,
        })
        .is_err()
    {
        return;
    }

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    // Writer task: drains the hub-facing queue onto the socket. The hub
    // never waits on this; it only enqueues.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("failed to encode outbound event: {}", e),
            }
        }
    });

    // Reader loop: frames from this connection reach the hub in order.
    while let Some(frame) = ws_source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if hub_tx
                        .send(HubEvent::Message {
                            id: conn_id,
                            event,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!("undecodable frame from {}: {}", conn_id, e);
                }
            },
            Ok(Message::Close(_)) => {
                debug!("participant {} closed the connection", conn_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {
                warn!("ignoring non-text frame from {}", conn_id);
            }
            Err(e) => {
                debug!("websocket error from {}: {}", conn_id, e);
                break;
            }
        }
    }

    info!("participant {} disconnected", conn_id);
    let _ = hub_tx.send(HubEvent::Disconnect { id: conn_id });
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allow_list_admits_everyone() {
        assert!(origin_allowed(&[], Some("http://example.com")));
        assert!(origin_allowed(&[], None));
    }

    #[test]
    fn test_allow_list_matches_exactly() {
        let allowed = vec!["http://quiz.example".to_string()];

        assert!(origin_allowed(&allowed, Some("http://quiz.example")));
        assert!(!origin_allowed(&allowed, Some("http://evil.example")));
        assert!(!origin_allowed(&allowed, Some("http://quiz.example.evil")));
    }

    #[test]
    fn test_missing_origin_is_admitted() {
        let allowed = vec!["http://quiz.example".to_string()];
        assert!(origin_allowed(&allowed, None));
    }
}
