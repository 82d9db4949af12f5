//! Per-connection relay logic: bind one identity from the first seed, then
//! proxy `get` and `put` to the store with chunking applied.
//!
//! The bridge knows nothing about the transport carrying the frames; the
//! relay server owns one bridge per websocket connection.

use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::codec::{self, DEFAULT_CHUNK_SIZE};
use crate::encoding::hex_decode_array;
use crate::error::SignalError;
use crate::identity::{Address, Identity, PublicKey, Salt};
use crate::protocol::{Reply, Request};
use crate::store::{DEFAULT_REQUEST_TIMEOUT, MutableRecordStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Serialized values longer than this are split into immutable chunks.
    pub chunk_size: usize,
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct RelayBridge {
    store: MutableRecordStore,
    chunk_size: usize,
    identity: OnceLock<Identity>,
}

impl RelayBridge {
    pub fn new(store: MutableRecordStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size,
            identity: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub async fn handle(&self, request: Request) -> Reply {
        debug!(kind = request.kind(), "relay request");
        match request {
            Request::Seed { seed } => Reply::seeded(self.seed(&seed)),
            Request::Get { address } => Reply::got(self.get(&address).await),
            Request::Put { val, salt } => Reply::stored(self.put(val, salt).await),
        }
    }

    /// Bind the connection's identity. Only the first seed counts; later
    /// seeds leave the bound identity untouched and report its key.
    pub fn seed(&self, seed_hex: &str) -> Result<PublicKey, SignalError> {
        let seed: [u8; 32] = hex_decode_array(seed_hex).map_err(|_| SignalError::InvalidSecret)?;
        let mut fresh = false;
        let identity = self.identity.get_or_init(|| {
            fresh = true;
            Identity::from_seed(seed)
        });
        if fresh {
            info!(pubkey = %identity.public_key(), "connection identity bound");
        } else {
            debug!("identity already bound, seed ignored");
        }
        Ok(identity.public_key())
    }

    /// Read and decode the value at `address`; `Null` when nothing is stored.
    pub async fn get(&self, address: &str) -> Result<Value, SignalError> {
        let address: Address = address.parse()?;
        let Some(body) = self.store.get(&address).await? else {
            return Ok(Value::Null);
        };
        let store = &self.store;
        codec::decode(&body, move |chunk| async move { store.get(&chunk).await }).await
    }

    /// Encode `val` (chunking if needed) and publish it under this
    /// connection's identity. The manifest write only happens after every
    /// chunk write succeeded.
    pub async fn put(&self, val: Value, salt: Salt) -> Result<Address, SignalError> {
        let identity = self.identity.get().ok_or(SignalError::NotAuthenticated)?;
        let store = &self.store;
        let body = codec::encode(&val, self.chunk_size, move |chunk| store.put_immutable(chunk)).await?;
        self.store.put(body, salt, identity).await
    }
}
