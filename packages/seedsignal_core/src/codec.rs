//! Chunked value encoding for records larger than one store entry.
//!
//! Wire format of a mutable record body:
//! - the JSON serialization of the value, when it fits in `chunk_size`, or
//! - a manifest: `:` followed by the `:`-joined hex addresses of the
//!   immutable chunks, in payload order.
//!
//! A JSON text never starts with `:`, so the marker is unambiguous.

use std::future::Future;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use crate::error::SignalError;
use crate::identity::Address;

/// Default slice size, leaving headroom under a ~1000 byte record limit.
pub const DEFAULT_CHUNK_SIZE: usize = 600;

/// Leading byte that marks a record body as a manifest.
pub const MANIFEST_MARKER: u8 = b':';

/// Ordered list of content-addressed chunks making up one logical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    chunks: Vec<Address>,
}

impl Manifest {
    pub fn new(chunks: Vec<Address>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Address] {
        &self.chunks
    }

    pub fn is_manifest(body: &[u8]) -> bool {
        body.first() == Some(&MANIFEST_MARKER)
    }

    /// Parse a record body. Returns `None` when the body is not a manifest.
    pub fn parse(body: &[u8]) -> Option<Result<Self, SignalError>> {
        if !Self::is_manifest(body) {
            return None;
        }
        Some(Self::parse_manifest(&body[1..]))
    }

    fn parse_manifest(rest: &[u8]) -> Result<Self, SignalError> {
        let text = std::str::from_utf8(rest)
            .map_err(|_| SignalError::CorruptManifest("manifest is not utf-8".to_string()))?;
        let chunks = text
            .split(':')
            .filter(|h| !h.is_empty())
            .map(|h| {
                h.parse::<Address>()
                    .map_err(|e| SignalError::CorruptManifest(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if chunks.is_empty() {
            return Err(SignalError::CorruptManifest("empty manifest".to_string()));
        }
        Ok(Self { chunks })
    }

    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(1 + self.chunks.len() * 41);
        for chunk in &self.chunks {
            out.push(MANIFEST_MARKER as char);
            out.push_str(&chunk.to_hex());
        }
        out
    }
}

/// Serialize `value` and, if it exceeds `chunk_size`, store it as ordered
/// immutable chunks through `put_chunk` and return the manifest body instead.
///
/// Chunk writes run concurrently; the returned body is only produced once
/// every one of them succeeded.
pub async fn encode<F, Fut>(
    value: &Value,
    chunk_size: usize,
    put_chunk: F,
) -> Result<Vec<u8>, SignalError>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<Address, SignalError>>,
{
    let serialized = serde_json::to_vec(value)
        .map_err(|e| SignalError::StoreUnavailable(format!("serialize: {e}")))?;
    let chunk_size = chunk_size.max(1);
    if serialized.len() <= chunk_size {
        return Ok(serialized);
    }

    debug!(
        bytes = serialized.len(),
        chunks = serialized.len().div_ceil(chunk_size),
        "splitting value into chunks"
    );
    let writes = serialized
        .chunks(chunk_size)
        .map(|slice| put_chunk(slice.to_vec()));
    let chunks = try_join_all(writes).await?;
    Ok(Manifest::new(chunks).to_wire().into_bytes())
}

/// Inverse of [`encode`]: resolve a manifest through `fetch_chunk` (fetches
/// run concurrently, reassembly follows manifest order) and parse the JSON.
pub async fn decode<F, Fut>(body: &[u8], fetch_chunk: F) -> Result<Value, SignalError>
where
    F: Fn(Address) -> Fut,
    Fut: Future<Output = Result<Option<Vec<u8>>, SignalError>>,
{
    let Some(manifest) = Manifest::parse(body) else {
        return serde_json::from_slice(body).map_err(|e| {
            SignalError::CorruptManifest(format!("stored value is not valid JSON: {e}"))
        });
    };
    let manifest = manifest?;

    let fetches = manifest.chunks().iter().map(|address| {
        let address = *address;
        let fetch = fetch_chunk(address);
        async move {
            match fetch.await {
                Ok(Some(bytes)) => Ok(bytes),
                Ok(None) => Err(SignalError::CorruptManifest(format!(
                    "chunk {address} not found"
                ))),
                Err(e) => Err(SignalError::CorruptManifest(format!(
                    "chunk {address}: {e}"
                ))),
            }
        }
    });
    let parts = try_join_all(fetches).await?;
    let joined = parts.concat();

    serde_json::from_slice(&joined).map_err(|e| {
        SignalError::CorruptManifest(format!("reassembled value is not valid JSON: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Chunks = Arc<Mutex<HashMap<Address, Vec<u8>>>>;

    fn put_into(chunks: &Chunks) -> impl Fn(Vec<u8>) -> futures::future::Ready<Result<Address, SignalError>> {
        let chunks = chunks.clone();
        move |body| {
            let address = Address::of_content(&body);
            chunks.lock().unwrap().insert(address, body);
            futures::future::ready(Ok(address))
        }
    }

    fn fetch_from(
        chunks: &Chunks,
    ) -> impl Fn(Address) -> futures::future::Ready<Result<Option<Vec<u8>>, SignalError>> {
        let chunks = chunks.clone();
        move |address| futures::future::ready(Ok(chunks.lock().unwrap().get(&address).cloned()))
    }

    #[tokio::test]
    async fn small_value_is_inline() {
        let chunks = Chunks::default();
        let value = serde_json::json!({"type": "offer", "sdp": "v=0"});
        let body = encode(&value, DEFAULT_CHUNK_SIZE, put_into(&chunks)).await.unwrap();
        assert_eq!(body, serde_json::to_vec(&value).unwrap());
        assert!(chunks.lock().unwrap().is_empty());
        assert_eq!(decode(&body, fetch_from(&chunks)).await.unwrap(), value);
    }

    #[tokio::test]
    async fn large_value_is_chunked_in_order() {
        let chunks = Chunks::default();
        let value = serde_json::json!({ "sdp": "x".repeat(2000) });
        let size = serde_json::to_vec(&value).unwrap().len();

        let body = encode(&value, 600, put_into(&chunks)).await.unwrap();
        assert!(Manifest::is_manifest(&body));
        let manifest = Manifest::parse(&body).unwrap().unwrap();
        assert_eq!(manifest.chunks().len(), size.div_ceil(600));
        assert_eq!(chunks.lock().unwrap().len(), size.div_ceil(600));

        assert_eq!(decode(&body, fetch_from(&chunks)).await.unwrap(), value);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let chunks = Chunks::default();
        // `"` + 1198 chars + `"` = 1200 bytes = two full chunks
        let value = Value::String("a".repeat(1198));
        let body = encode(&value, 600, put_into(&chunks)).await.unwrap();
        let manifest = Manifest::parse(&body).unwrap().unwrap();
        assert_eq!(manifest.chunks().len(), 2);
    }

    #[tokio::test]
    async fn missing_chunk_is_corrupt() {
        let chunks = Chunks::default();
        let value = serde_json::json!({ "sdp": "y".repeat(1500) });
        let body = encode(&value, 600, put_into(&chunks)).await.unwrap();
        let manifest = Manifest::parse(&body).unwrap().unwrap();
        chunks.lock().unwrap().remove(&manifest.chunks()[1]);

        let err = decode(&body, fetch_from(&chunks)).await.unwrap_err();
        assert!(matches!(err, SignalError::CorruptManifest(_)), "{err:?}");
    }

    #[tokio::test]
    async fn failed_fetch_is_corrupt() {
        let body = Manifest::new(vec![Address::of_content(b"a")]).to_wire();
        let err = decode(body.as_bytes(), |_| {
            futures::future::ready(Err::<Option<Vec<u8>>, _>(SignalError::Timeout))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SignalError::CorruptManifest(_)));
    }

    #[tokio::test]
    async fn failed_chunk_write_yields_no_manifest() {
        let value = serde_json::json!({ "sdp": "z".repeat(1500) });
        let err = encode(&value, 600, |_| {
            futures::future::ready(Err::<Address, _>(SignalError::StoreUnavailable(
                "down".to_string(),
            )))
        })
        .await
        .unwrap_err();
        assert_eq!(err, SignalError::StoreUnavailable("down".to_string()));
    }

    #[test]
    fn manifest_wire_format() {
        let a = Address::of_content(b"a");
        let b = Address::of_content(b"b");
        let wire = Manifest::new(vec![a, b]).to_wire();
        assert_eq!(wire, format!(":{a}:{b}"));
        assert_eq!(
            Manifest::parse(wire.as_bytes()).unwrap().unwrap().chunks(),
            &[a, b]
        );
    }

    #[test]
    fn bad_manifests() {
        assert!(Manifest::parse(b"{}").is_none());
        assert!(Manifest::parse(b":").unwrap().is_err());
        assert!(Manifest::parse(b":nothex").unwrap().is_err());
    }
}
