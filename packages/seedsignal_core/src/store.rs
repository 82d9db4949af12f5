//! Signed mutable records and content-addressed immutable records.
//!
//! [`RecordBackend`] is the seam to the distributed store itself (routing,
//! replication and record validation live behind it). [`MutableRecordStore`]
//! is the thin layer the bridge talks to: it signs, bounds every call with a
//! timeout and logs. [`MemoryBackend`] is an in-process backend that applies
//! the same acceptance rules a store node would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SignalError;
use crate::identity::{Address, Identity, PublicKey, Salt, lookup_key, verify};

/// Per-entry ceiling of the store.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1000;

/// Mutable records are always written at this sequence number, so each write
/// replaces the previous value at the same address.
pub const BASELINE_SEQ: i64 = 0;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableRecord {
    pub public_key: PublicKey,
    pub salt: Salt,
    pub seq: i64,
    pub value: Vec<u8>,
    pub signature: [u8; 64],
}

impl MutableRecord {
    pub fn sign(identity: &Identity, salt: Salt, seq: i64, value: Vec<u8>) -> Self {
        let signature = identity.sign(&Self::signable(salt, seq, &value));
        Self {
            public_key: identity.public_key(),
            salt,
            seq,
            value,
            signature,
        }
    }

    /// Bencoded `salt`, `seq` and `v` entries, the buffer the signature covers.
    pub fn signable(salt: Salt, seq: i64, value: &[u8]) -> Vec<u8> {
        let salt = salt.as_bytes();
        let mut out = format!("4:salt{}:", salt.len()).into_bytes();
        out.extend_from_slice(salt);
        out.extend_from_slice(format!("3:seqi{seq}e1:v{}:", value.len()).as_bytes());
        out.extend_from_slice(value);
        out
    }

    pub fn address(&self) -> Address {
        lookup_key(&self.public_key, self.salt)
    }

    pub fn verify(&self) -> Result<(), SignalError> {
        verify(
            &self.public_key,
            &Self::signable(self.salt, self.seq, &self.value),
            &self.signature,
        )
    }
}

#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Resolves once the backend can serve requests.
    async fn ready(&self) -> Result<(), SignalError> {
        Ok(())
    }

    async fn put_mutable(&self, record: MutableRecord) -> Result<Address, SignalError>;

    async fn put_immutable(&self, body: Vec<u8>) -> Result<Address, SignalError>;

    /// Body stored at `address`, mutable or immutable.
    async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SignalError>;
}

/// Signing, timeout-bounded access to a [`RecordBackend`]. Never retries.
#[derive(Clone)]
pub struct MutableRecordStore {
    backend: Arc<dyn RecordBackend>,
    timeout: Duration,
}

impl MutableRecordStore {
    pub fn new(backend: Arc<dyn RecordBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn ready(&self) -> Result<(), SignalError> {
        self.backend.ready().await
    }

    /// Sign `value` and publish it under (identity.pubkey, salt) at the
    /// baseline sequence number.
    pub async fn put(
        &self,
        value: Vec<u8>,
        salt: Salt,
        identity: &Identity,
    ) -> Result<Address, SignalError> {
        let record = MutableRecord::sign(identity, salt, BASELINE_SEQ, value);
        debug!(
            address = %record.address(),
            salt = %salt,
            bytes = record.value.len(),
            "putting mutable record"
        );
        let address = self.bounded(self.backend.put_mutable(record)).await?;
        debug!(%address, "mutable record stored");
        Ok(address)
    }

    pub async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SignalError> {
        debug!(%address, "getting record");
        let body = self.bounded(self.backend.get(address)).await?;
        debug!(
            %address,
            bytes = body.as_ref().map(Vec::len),
            "got record"
        );
        Ok(body)
    }

    pub async fn put_immutable(&self, bytes: Vec<u8>) -> Result<Address, SignalError> {
        debug!(bytes = bytes.len(), "putting immutable record");
        self.bounded(self.backend.put_immutable(bytes)).await
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, SignalError>>,
    ) -> Result<T, SignalError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SignalError::Timeout)?
    }
}

// --- MemoryBackend ---

#[derive(Default)]
struct MemoryRecords {
    mutable: HashMap<Address, MutableRecord>,
    immutable: HashMap<Address, Vec<u8>>,
}

/// In-process backend. Enforces the per-entry ceiling, signature validity and
/// content addressing. Can be switched into an outage or a stall for tests.
pub struct MemoryBackend {
    records: RwLock<MemoryRecords>,
    max_record_bytes: usize,
    unavailable: AtomicBool,
    stalled: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_max_record_bytes(DEFAULT_MAX_RECORD_BYTES)
    }

    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self {
            records: RwLock::new(MemoryRecords::default()),
            max_record_bytes,
            unavailable: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    pub async fn mutable_len(&self) -> usize {
        self.records.read().await.mutable.len()
    }

    pub async fn immutable_len(&self) -> usize {
        self.records.read().await.immutable.len()
    }

    /// Every request fails with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every request hangs while set.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), SignalError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SignalError::StoreUnavailable(
                "memory backend offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_size(&self, size: usize) -> Result<(), SignalError> {
        if size > self.max_record_bytes {
            return Err(SignalError::RecordTooLarge {
                size,
                limit: self.max_record_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn put_mutable(&self, record: MutableRecord) -> Result<Address, SignalError> {
        self.gate().await?;
        self.check_size(record.value.len())?;
        record.verify()?;
        let address = record.address();
        self.records.write().await.mutable.insert(address, record);
        Ok(address)
    }

    async fn put_immutable(&self, body: Vec<u8>) -> Result<Address, SignalError> {
        self.gate().await?;
        self.check_size(body.len())?;
        let address = Address::of_content(&body);
        self.records.write().await.immutable.insert(address, body);
        Ok(address)
    }

    async fn get(&self, address: &Address) -> Result<Option<Vec<u8>>, SignalError> {
        self.gate().await?;
        let records = self.records.read().await;
        if let Some(record) = records.mutable.get(address) {
            return Ok(Some(record.value.clone()));
        }
        Ok(records.immutable.get(address).cloned())
    }
}
