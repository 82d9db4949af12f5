//! Role-aware signaling session.
//!
//! A session runs as one task that owns all of its state. Callers drive it
//! through a [`SessionHandle`] and observe it through the event receiver
//! returned by [`SignalingSession::spawn`] and the handle's state watch.
//!
//! ```text
//! Connecting -> Authenticating -> InitiatorReserve -> Offering -> Connected -> Closed
//!                              \-> AcceptorPolling --------------/
//! ```
//!
//! Relay I/O runs in spawned tasks whose results come back to the session
//! task as messages, so a slow store never delays local fragments or the
//! connected notification.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use seedsignal_core::identity::fingerprint;
use seedsignal_core::{
    Address, Debouncer, PublicKey, Request, Role, SharedSecret, SignalError, lookup_key,
};

use crate::channel::RelayChannel;
use crate::config::SessionConfig;
use crate::peer::TransportPeer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    /// Initiator only: pre-creating the empty answer slot.
    InitiatorReserve,
    Offering,
    AcceptorPolling,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::InitiatorReserve => "initiator_reserve",
            SessionState::Offering => "offering",
            SessionState::AcceptorPolling => "acceptor_polling",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The initiator's first record write succeeded.
    Ready,
    /// A relay or store failure. The session keeps running.
    Error(SignalError),
    /// The local record was written.
    Stored { address: Address },
    /// The remote record was read; `applied` counts fragments seen for the
    /// first time.
    Fetched { address: Address, applied: usize },
    Connected,
    Closed,
}

enum Command {
    Signal(Value),
    PeerConnected,
    Close,
}

enum Internal {
    FlushDue,
    PollDue,
    Written(Result<Address, SignalError>),
    Polled(Result<Value, SignalError>),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Timer {
    Write,
    Poll,
}

/// Drives a running session. Dropping every handle closes the session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Hand a locally produced signaling fragment to the session.
    pub fn signal(&self, fragment: Value) -> Result<(), SignalError> {
        self.send(Command::Signal(fragment))
    }

    /// Report that the direct peer connection is up; signaling stops.
    pub fn peer_connected(&self) -> Result<(), SignalError> {
        self.send(Command::PeerConnected)
    }

    pub fn close(&self) -> Result<(), SignalError> {
        self.send(Command::Close)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn send(&self, command: Command) -> Result<(), SignalError> {
        self.commands
            .send(command)
            .map_err(|_| SignalError::ChannelError("session has ended".to_string()))
    }
}

pub struct SignalingSession<C, P> {
    role: Role,
    config: SessionConfig,
    channel: Arc<C>,
    peer: P,
    pubkey: Option<PublicKey>,
    /// Local fragments by fingerprint in the order they were produced,
    /// written as one unit.
    record: Map<String, Value>,
    /// Fingerprints of remote fragments already applied to the peer.
    consumed: HashSet<String>,
    ready: bool,
    writes: Debouncer<Timer>,
    polls: Debouncer<Timer>,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal: mpsc::UnboundedSender<Internal>,
}

impl<C: RelayChannel, P: TransportPeer> SignalingSession<C, P> {
    /// Start a session on the current runtime.
    ///
    /// `connect` opens the relay channel; it is awaited inside the session
    /// task. Fails only when the secret is empty.
    pub fn spawn<F>(
        secret: impl Into<Vec<u8>>,
        role: Role,
        connect: F,
        peer: P,
        config: SessionConfig,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SignalError>
    where
        F: Future<Output = Result<C, SignalError>> + Send + 'static,
    {
        let secret = SharedSecret::new(secret)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        tokio::spawn(async move {
            info!(%role, "signaling session started");
            let channel = match connect.await {
                Ok(channel) => Arc::new(channel),
                Err(e) => {
                    warn!(error = %e, "relay connection failed");
                    let _ = events_tx.send(SessionEvent::Error(e));
                    state_tx.send_replace(SessionState::Closed);
                    let _ = events_tx.send(SessionEvent::Closed);
                    return;
                }
            };
            let (internal_tx, internal_rx) = mpsc::unbounded_channel();
            let session = SignalingSession {
                role,
                config,
                channel,
                peer,
                pubkey: None,
                record: Map::new(),
                consumed: HashSet::new(),
                ready: false,
                writes: Debouncer::new(),
                polls: Debouncer::new(),
                state: state_tx,
                events: events_tx,
                internal: internal_tx,
            };
            session.run(secret, commands_rx, internal_rx).await;
        });

        Ok((
            SessionHandle {
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        ))
    }

    async fn run(
        mut self,
        secret: SharedSecret,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        if let Err(e) = self.authenticate(&secret).await {
            warn!(error = %e, "authentication failed");
            self.emit(SessionEvent::Error(e));
            self.shutdown(false).await;
            return;
        }

        match self.role {
            Role::Initiator => {
                self.reserve_answer_slot().await;
                self.set_state(SessionState::Offering);
            }
            Role::Acceptor => {
                self.set_state(SessionState::AcceptorPolling);
                self.arm_poll();
            }
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Signal(fragment)) => self.add_fragment(fragment),
                    Some(Command::PeerConnected) => {
                        self.shutdown(true).await;
                        return;
                    }
                    Some(Command::Close) | None => {
                        self.shutdown(false).await;
                        return;
                    }
                },
                Some(msg) = internal.recv() => match msg {
                    Internal::FlushDue => self.flush(),
                    Internal::PollDue => self.poll(),
                    Internal::Written(result) => self.on_written(result),
                    Internal::Polled(result) => self.on_polled(result),
                },
            }
        }
    }

    async fn authenticate(&mut self, secret: &SharedSecret) -> Result<(), SignalError> {
        self.set_state(SessionState::Authenticating);
        let reply = self
            .channel
            .call(Request::Seed {
                seed: secret.seed_hex(),
            })
            .await?;
        let pubkey = reply.into_seed()?;
        info!(%pubkey, "authenticated with relay");
        self.pubkey = Some(pubkey);
        Ok(())
    }

    /// An address nobody wrote looks the same as "no answer yet", so the
    /// initiator writes an empty record where the answer will go.
    async fn reserve_answer_slot(&mut self) {
        self.set_state(SessionState::InitiatorReserve);
        let result = self
            .channel
            .call(Request::Put {
                val: Value::Object(Map::new()),
                salt: self.role.remote_salt(),
            })
            .await
            .and_then(|reply| reply.into_put());
        match result {
            Ok(address) => debug!(%address, "answer slot reserved"),
            Err(e) => {
                warn!(error = %e, "could not reserve answer slot");
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    fn add_fragment(&mut self, fragment: Value) {
        let key = match serde_json::to_vec(&fragment) {
            Ok(bytes) => fingerprint(&bytes),
            Err(e) => {
                warn!(error = %e, "unserializable fragment dropped");
                return;
            }
        };
        debug!(fingerprint = %key, "local fragment");
        self.record.insert(key, fragment);
        let internal = self.internal.clone();
        self.writes
            .schedule(Timer::Write, self.config.write_delay, async move {
                let _ = internal.send(Internal::FlushDue);
            });
    }

    fn flush(&mut self) {
        let val = Value::Object(self.record.clone());
        let salt = self.role.own_salt();
        debug!(fragments = self.record.len(), %salt, "writing local record");
        let channel = self.channel.clone();
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = channel
                .call(Request::Put { val, salt })
                .await
                .and_then(|reply| reply.into_put());
            let _ = internal.send(Internal::Written(result));
        });
    }

    fn on_written(&mut self, result: Result<Address, SignalError>) {
        match result {
            Ok(address) => {
                self.emit(SessionEvent::Stored { address });
                if self.role == Role::Initiator && !self.ready {
                    self.ready = true;
                    self.emit(SessionEvent::Ready);
                }
            }
            Err(e) => {
                warn!(error = %e, "record write failed");
                self.emit(SessionEvent::Error(e));
            }
        }
        if self.role == Role::Initiator && !self.polls.is_pending(&Timer::Poll) {
            self.arm_poll();
        }
    }

    fn arm_poll(&mut self) {
        let internal = self.internal.clone();
        self.polls
            .schedule(Timer::Poll, self.config.poll_interval, async move {
                let _ = internal.send(Internal::PollDue);
            });
    }

    fn remote_address(&self) -> Option<Address> {
        self.pubkey
            .as_ref()
            .map(|pubkey| lookup_key(pubkey, self.role.remote_salt()))
    }

    fn poll(&mut self) {
        let Some(address) = self.remote_address() else {
            return;
        };
        debug!(%address, "polling remote record");
        let channel = self.channel.clone();
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = channel
                .call(Request::Get {
                    address: address.to_hex(),
                })
                .await
                .and_then(|reply| reply.into_get());
            let _ = internal.send(Internal::Polled(result));
        });
    }

    fn on_polled(&mut self, result: Result<Value, SignalError>) {
        match result {
            Ok(val) => {
                if let Some(address) = self.remote_address() {
                    let applied = self.apply_remote(val);
                    self.emit(SessionEvent::Fetched { address, applied });
                }
            }
            Err(e) => {
                warn!(error = %e, "remote read failed");
                self.emit(SessionEvent::Error(e));
            }
        }
        self.arm_poll();
    }

    /// Hand every unseen remote fragment to the peer, in the order the
    /// remote side produced them.
    fn apply_remote(&mut self, val: Value) -> usize {
        let fragments = match val {
            Value::Object(map) => map,
            Value::Null => return 0,
            other => {
                warn!(kind = json_kind(&other), "remote record is not a fragment map");
                return 0;
            }
        };
        let mut applied = 0;
        for (key, fragment) in fragments {
            if self.consumed.insert(key) {
                self.peer.signal(fragment);
                applied += 1;
            }
        }
        if applied > 0 {
            info!(applied, "remote fragments applied");
        }
        applied
    }

    async fn shutdown(&mut self, connected: bool) {
        self.writes.cancel_all();
        self.polls.cancel_all();
        self.channel.close().await;
        if connected {
            self.set_state(SessionState::Connected);
            self.emit(SessionEvent::Connected);
        }
        self.set_state(SessionState::Closed);
        self.emit(SessionEvent::Closed);
    }

    fn set_state(&self, state: SessionState) {
        info!(role = %self.role, %state, "session state");
        self.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
