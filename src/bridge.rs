//! Per-session WebSocket bridge
//!
//! Each session owns one ephemeral WebSocket endpoint on localhost that the
//! spawned agent connects back to. Exactly one client is attached at a time:
//! a newer connection closes and replaces the older one. Inbound text frames
//! are run through the NDJSON parser and handed to the session's inbound
//! channel in arrival order.

use crate::ndjson::{serialize_line, NdjsonParser};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// One live agent connection
struct ClientHandle {
    seq: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct BridgeInner {
    session_id: String,
    client: Mutex<Option<ClientHandle>>,
    connected_tx: watch::Sender<bool>,
    inbound_tx: mpsc::UnboundedSender<Value>,
    next_seq: AtomicU64,
}

/// Per-session WebSocket listener
pub struct SessionBridge {
    port: u16,
    inner: Arc<BridgeInner>,
    accept_task: JoinHandle<()>,
}

impl SessionBridge {
    /// Bind a listener on `127.0.0.1:port` and start accepting
    ///
    /// Port 0 binds an ephemeral port; `port()` reports the actual one.
    /// Parsed inbound frames are delivered through `inbound_tx`.
    pub async fn bind(
        session_id: &str,
        port: u16,
        inbound_tx: mpsc::UnboundedSender<Value>,
    ) -> crate::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| crate::Error::Bridge(format!("bind 127.0.0.1:{}: {}", port, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| crate::Error::Bridge(format!("local_addr: {}", e)))?
            .port();

        let (connected_tx, _) = watch::channel(false);
        let inner = Arc::new(BridgeInner {
            session_id: session_id.to_string(),
            client: Mutex::new(None),
            connected_tx,
            inbound_tx,
            next_seq: AtomicU64::new(0),
        });

        let accept_inner = inner.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let conn_inner = accept_inner.clone();
                        tokio::spawn(handle_client(conn_inner, stream));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "bridge accept error");
                    }
                }
            }
        });

        tracing::debug!(session_id, port, "bridge listening");

        Ok(Self {
            port,
            inner,
            accept_task,
        })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether an agent client is currently attached
    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Watch that flips to `true` when a client attaches
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// Send one NDJSON frame to the attached agent
    ///
    /// A no-op (logged at warn) when no client is attached; callers gate on
    /// `is_connected` first. Send failures are logged and swallowed.
    pub async fn send(&self, value: &Value) {
        let guard = self.inner.client.lock().await;
        let Some(client) = guard.as_ref() else {
            tracing::warn!(
                session_id = %self.inner.session_id,
                "bridge send with no agent attached, dropping frame"
            );
            return;
        };
        match serialize_line(value) {
            Ok(line) => {
                if client.tx.send(Message::Text(line.into())).is_err() {
                    tracing::warn!(
                        session_id = %self.inner.session_id,
                        "bridge send failed, client socket gone"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    "bridge frame serialization failed: {}",
                    e
                );
            }
        }
    }

    /// Stop accepting, close the attached client, and release the port
    pub async fn close(&self) {
        self.accept_task.abort();
        let mut guard = self.inner.client.lock().await;
        if let Some(client) = guard.take() {
            let _ = client.tx.send(Message::Close(None));
        }
        self.inner.connected_tx.send_replace(false);
        tracing::debug!(session_id = %self.inner.session_id, port = self.port, "bridge closed");
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Serve one accepted TCP connection as the session's agent client
async fn handle_client(inner: Arc<BridgeInner>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(session_id = %inner.session_id, "websocket accept failed: {}", e);
            return;
        }
    };

    let (mut ws_write, mut ws_read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Write pump
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_write.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let seq = inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

    // Attach, replacing (and closing) any previous client
    {
        let mut guard = inner.client.lock().await;
        if let Some(old) = guard.replace(ClientHandle { seq, tx }) {
            tracing::info!(
                session_id = %inner.session_id,
                "replacing previously attached agent client"
            );
            let _ = old.tx.send(Message::Close(None));
        }
    }
    inner.connected_tx.send_replace(true);
    tracing::info!(session_id = %inner.session_id, "agent connected to bridge");

    // Read loop: frames may arrive without a trailing newline, so one is
    // appended before feeding the parser. This is the only place that
    // concession is made.
    let mut parser = NdjsonParser::new();
    while let Some(msg) = ws_read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let mut text = text.to_string();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                parser.feed(&text, |value| {
                    let _ = inner.inbound_tx.send(value);
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    parser.flush(|value| {
        let _ = inner.inbound_tx.send(value);
    });

    // Detach only if this connection is still the current one, so a rapid
    // reconnect is not clobbered by the old connection's teardown.
    let mut guard = inner.client.lock().await;
    if guard.as_ref().map(|c| c.seq) == Some(seq) {
        *guard = None;
        inner.connected_tx.send_replace(false);
        tracing::info!(session_id = %inner.session_id, "agent disconnected from bridge");
    }
}
