//! Secret-derived rendezvous addressing, chunked record encoding and the
//! relay-side bridge for exchanging WebRTC signaling through a public
//! key-value network.

pub mod bridge;
pub mod codec;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod scheduler;
pub mod store;

pub use bridge::{BridgeConfig, RelayBridge};
pub use codec::{DEFAULT_CHUNK_SIZE, Manifest};
pub use error::{SignalError, WireError};
pub use identity::{Address, Identity, PublicKey, Role, Salt, SharedSecret, lookup_key};
pub use protocol::{ClientFrame, Reply, Request, ServerFrame};
pub use scheduler::Debouncer;
pub use store::{MemoryBackend, MutableRecord, MutableRecordStore, RecordBackend};
