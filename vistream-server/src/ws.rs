//! WebSocket connection handling.
//!
//! A socket is split: the write half becomes the session's
//! [`MessageSink`], the read half feeds the router until the peer goes
//! away.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vistream_core::{MessageSink, Outbound, SessionRouter, UNKNOWN_APP_CLOSE_CODE, VistreamError};

/// Control frames carry at most 125 payload bytes, two of them the code.
const MAX_CLOSE_REASON: usize = 123;

/// `error` as a close reason, cut on a char boundary to fit the frame.
fn close_reason(error: &VistreamError) -> String {
    let mut reason = error.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

// ── WsSink ───────────────────────────────────────────────────────

/// Write half of a viewer socket.
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// Send a close frame and flush.
    pub async fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let mut tx = self.tx.lock().await;
        if let Err(e) = tx.send(Message::Close(Some(frame))).await {
            debug!("close frame not sent: {e}");
        }
    }
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&self, message: Outbound) -> Result<(), VistreamError> {
        let message = match message {
            Outbound::Binary(bytes) => Message::Binary(bytes),
            Outbound::Text(text) => Message::Text(text.into()),
        };
        self.tx
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| VistreamError::Transport(e.to_string()))
    }
}

// ── Connection loop ──────────────────────────────────────────────

/// Drive one upgraded socket for `path` until it closes.
pub async fn serve_socket(socket: WebSocket, path: String, router: Arc<SessionRouter>) {
    let (tx, mut rx) = socket.split();
    let sink = Arc::new(WsSink::new(tx));

    let session = match router.connect(&path, Arc::clone(&sink) as Arc<dyn MessageSink>) {
        Ok(session) => session,
        Err(e) => {
            sink.close(UNKNOWN_APP_CLOSE_CODE, &close_reason(&e)).await;
            return;
        }
    };

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                router.handle_text(&session, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(session = session.id(), "binary message from viewer ignored");
            }
            // Ping/pong are answered by axum.
            Ok(_) => {}
            Err(e) => {
                warn!(session = session.id(), "websocket error: {e}");
                break;
            }
        }
    }

    router.disconnect(session);
}
