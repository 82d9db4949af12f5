//! Client side of seedsignal: a [`SignalingSession`] that trades WebRTC
//! signaling fragments with exactly one remote peer through a relay, using
//! nothing but a shared secret to find it.

pub mod channel;
pub mod config;
pub mod peer;
pub mod session;

pub use channel::{LocalChannel, RelayChannel, WsChannel};
pub use config::SessionConfig;
pub use peer::TransportPeer;
pub use session::{SessionEvent, SessionHandle, SessionState, SignalingSession};
