//! The request/response channel between a session and its relay.
//!
//! [`WsChannel`] talks to a remote relay over a websocket. [`LocalChannel`]
//! hosts a [`RelayBridge`] in-process, which is what tests and embedded
//! setups use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use seedsignal_core::{ClientFrame, RelayBridge, Reply, Request, ServerFrame, SignalError};

#[async_trait]
pub trait RelayChannel: Send + Sync + 'static {
    /// Send one request and wait for its reply.
    async fn call(&self, request: Request) -> Result<Reply, SignalError>;

    /// Stop accepting requests and release the connection. Requests already
    /// in flight may still complete.
    async fn close(&self);
}

fn closed_error() -> SignalError {
    SignalError::ChannelError("relay channel closed".to_string())
}

// --- LocalChannel ---

pub struct LocalChannel {
    bridge: RelayBridge,
    closed: AtomicBool,
}

impl LocalChannel {
    pub fn new(bridge: RelayBridge) -> Self {
        Self {
            bridge,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayChannel for LocalChannel {
    async fn call(&self, request: Request) -> Result<Reply, SignalError> {
        if self.is_closed() {
            return Err(closed_error());
        }
        Ok(self.bridge.handle(request).await)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// --- WsChannel ---

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Websocket connection to a relay. Replies are matched to requests by id,
/// so any number of calls may be outstanding at once.
pub struct WsChannel {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl WsChannel {
    pub async fn connect(url: &str) -> Result<Self, SignalError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SignalError::ChannelError(format!("connect {url}: {e}")))?;
        info!(url, "connected to relay");
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "relay write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let pending = Pending::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<ServerFrame>(text.as_str()) {
                                Ok(frame) => match pending.lock().await.remove(&frame.id) {
                                    Some(tx) => {
                                        let _ = tx.send(frame.reply);
                                    }
                                    None => debug!(id = frame.id, "reply for unknown request"),
                                },
                                Err(e) => warn!(error = %e, "malformed relay frame"),
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "relay connection failed");
                            break;
                        }
                    }
                }
                debug!("relay reader finished");
                closed.store(true, Ordering::SeqCst);
                // dropping the senders fails every outstanding call
                pending.lock().await.clear();
            })
        };

        Ok(Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }
}

#[async_trait]
impl RelayChannel for WsChannel {
    async fn call(&self, request: Request) -> Result<Reply, SignalError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(closed_error());
            }
            pending.insert(id, tx);
        }

        let text = serde_json::to_string(&ClientFrame { id, request })
            .map_err(|e| SignalError::ChannelError(e.to_string()))?;
        if self.outgoing.send(Message::Text(text.into())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(closed_error());
        }
        rx.await.map_err(|_| closed_error())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedsignal_core::store::DEFAULT_REQUEST_TIMEOUT;
    use seedsignal_core::{DEFAULT_CHUNK_SIZE, MemoryBackend, MutableRecordStore, SharedSecret};
    use serde_json::json;

    fn local() -> LocalChannel {
        let store = MutableRecordStore::new(Arc::new(MemoryBackend::new()), DEFAULT_REQUEST_TIMEOUT);
        LocalChannel::new(RelayBridge::new(store, DEFAULT_CHUNK_SIZE))
    }

    #[tokio::test]
    async fn local_channel_proxies_to_bridge() {
        let channel = local();
        let seed = SharedSecret::new("room42").unwrap().seed_hex();
        let pubkey = channel
            .call(Request::Seed { seed })
            .await
            .unwrap()
            .into_seed()
            .unwrap();
        let address = channel
            .call(Request::Put {
                val: json!({"a": 1}),
                salt: seedsignal_core::Salt::Offer,
            })
            .await
            .unwrap()
            .into_put()
            .unwrap();
        assert_eq!(address, seedsignal_core::lookup_key(&pubkey, seedsignal_core::Salt::Offer));
    }

    #[tokio::test]
    async fn closed_local_channel_rejects_calls() {
        let channel = local();
        channel.close().await;
        assert!(channel.is_closed());
        let err = channel
            .call(Request::Get {
                address: "00".repeat(20),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::ChannelError(_)));
    }

    #[tokio::test]
    async fn unreachable_relay_is_channel_error() {
        // port 9 (discard) on loopback: nothing listens there in test sandboxes
        let err = WsChannel::connect("ws://127.0.0.1:9/ws").await.err().unwrap();
        assert!(matches!(err, SignalError::ChannelError(_)));
    }
}
