//! Websocket relay: one [`RelayBridge`] per connection, all of them sharing
//! a single record store.

pub mod config;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use seedsignal_core::{
    BridgeConfig, ClientFrame, MutableRecordStore, RecordBackend, RelayBridge, Request,
    ServerFrame,
};

pub use config::{RelayConfig, RelayFileConfig, load_config};

#[derive(Clone)]
pub struct RelayState {
    store: MutableRecordStore,
    chunk_size: usize,
}

impl RelayState {
    pub fn new(backend: Arc<dyn RecordBackend>, bridge: &BridgeConfig) -> Self {
        Self {
            store: MutableRecordStore::new(backend, bridge.request_timeout),
            chunk_size: bridge.chunk_size,
        }
    }

    pub fn store(&self) -> &MutableRecordStore {
        &self.store
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one relay connection. `seed` is answered in order; `get` and `put`
/// run concurrently and may reply out of order, matched by request id.
pub async fn handle_socket(socket: WebSocket, state: RelayState) {
    let bridge = Arc::new(RelayBridge::new(state.store.clone(), state.chunk_size));
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut in_flight = JoinSet::new();
    info!("relay connection opened");

    loop {
        tokio::select! {
            Some(frame) = reply_rx.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize reply");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "malformed frame ignored");
                            continue;
                        }
                    };
                    let ClientFrame { id, request } = frame;
                    if let Request::Seed { .. } = request {
                        let reply = bridge.handle(request).await;
                        let _ = reply_tx.send(ServerFrame { id, reply });
                        continue;
                    }
                    let bridge = bridge.clone();
                    let reply_tx = reply_tx.clone();
                    in_flight.spawn(async move {
                        let reply = bridge.handle(request).await;
                        let _ = reply_tx.send(ServerFrame { id, reply });
                    });
                }
                Some(Ok(Message::Binary(_))) => debug!("binary frame ignored"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "relay connection failed");
                    break;
                }
            },
        }
        // reap finished requests
        while in_flight.try_join_next().is_some() {}
    }

    in_flight.abort_all();
    info!("relay connection closed");
}
