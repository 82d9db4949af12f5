use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::{Value, json};

use seedsignal_core::codec::{self, Manifest};
use seedsignal_core::identity::{Identity, Role, Salt, SharedSecret, derive_identity, lookup_key};
use seedsignal_core::{Address, SignalError};

// --- Address derivation ---

proptest! {
    #[test]
    fn derivation_is_deterministic(secret in prop::collection::vec(any::<u8>(), 1..64)) {
        let a = derive_identity(&secret).unwrap();
        let b = derive_identity(&secret).unwrap();
        prop_assert_eq!(a.public_key(), b.public_key());
        prop_assert_eq!(a.address(Salt::Offer), b.address(Salt::Offer));
        prop_assert_eq!(a.address(Salt::Answer), b.address(Salt::Answer));
    }

    #[test]
    fn salts_never_collide(secret in prop::collection::vec(any::<u8>(), 1..64)) {
        let id = derive_identity(&secret).unwrap();
        prop_assert_ne!(id.address(Salt::Offer), id.address(Salt::Answer));
    }

    #[test]
    fn roles_mirror_each_other(secret in "[a-z0-9]{1,24}") {
        let secret = SharedSecret::new(secret).unwrap();
        let id = Identity::derive(&secret);
        let pk = id.public_key();
        prop_assert_eq!(
            lookup_key(&pk, Role::Initiator.own_salt()),
            lookup_key(&pk, Role::Acceptor.remote_salt())
        );
        prop_assert_eq!(
            lookup_key(&pk, Role::Acceptor.own_salt()),
            lookup_key(&pk, Role::Initiator.remote_salt())
        );
    }

    #[test]
    fn distinct_secrets_distinct_keys(
        a in prop::collection::vec(any::<u8>(), 1..32),
        b in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        prop_assume!(a != b);
        let ka = derive_identity(&a).unwrap().public_key();
        let kb = derive_identity(&b).unwrap().public_key();
        prop_assert_ne!(ka, kb);
    }
}

// --- Chunked value codec ---

type Chunks = Arc<Mutex<HashMap<Address, Vec<u8>>>>;

fn arb_fragment() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[ -~]{0,3000}".prop_map(|sdp| json!({"type": "offer", "sdp": sdp})),
        ("[a-z0-9]{1,12}", 0u32..10, "[ -~]{0,200}").prop_map(|(mid, idx, cand)| {
            json!({"candidate": {"candidate": cand, "sdpMid": mid, "sdpMLineIndex": idx}})
        }),
        Just(json!({})),
    ]
}

fn run<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(fut)
}

async fn roundtrip(value: &Value, chunk_size: usize, chunks: &Chunks) -> (Vec<u8>, Value) {
    let store = chunks.clone();
    let body = codec::encode(value, chunk_size, move |bytes| {
        let address = Address::of_content(&bytes);
        store.lock().unwrap().insert(address, bytes);
        futures::future::ready(Ok::<_, SignalError>(address))
    })
    .await
    .unwrap();
    let store = chunks.clone();
    let decoded = codec::decode(&body, move |address| {
        futures::future::ready(Ok::<_, SignalError>(store.lock().unwrap().get(&address).cloned()))
    })
    .await
    .unwrap();
    (body, decoded)
}

proptest! {
    #[test]
    fn decode_inverts_encode(value in arb_fragment(), chunk_size in 16usize..1200) {
        let chunks = Chunks::default();
        let (body, decoded) = run(roundtrip(&value, chunk_size, &chunks));
        prop_assert_eq!(decoded, value.clone());

        let serialized = serde_json::to_vec(&value).unwrap();
        if serialized.len() <= chunk_size {
            prop_assert_eq!(body, serialized);
            prop_assert!(chunks.lock().unwrap().is_empty());
        } else {
            let manifest = Manifest::parse(&body).unwrap().unwrap();
            prop_assert_eq!(manifest.chunks().len(), serialized.len().div_ceil(chunk_size));
        }
    }

    #[test]
    fn encoding_is_idempotent(value in arb_fragment(), chunk_size in 16usize..1200) {
        let first = Chunks::default();
        let second = Chunks::default();
        let (body_a, _) = run(roundtrip(&value, chunk_size, &first));
        let (body_b, _) = run(roundtrip(&value, chunk_size, &second));
        prop_assert_eq!(&body_a, &body_b);
        prop_assert_eq!(&*first.lock().unwrap(), &*second.lock().unwrap());

        // writing again into the same store adds nothing
        let (body_c, _) = run(roundtrip(&value, chunk_size, &first));
        prop_assert_eq!(&body_a, &body_c);
        prop_assert_eq!(&*first.lock().unwrap(), &*second.lock().unwrap());

        if let Some(manifest) = Manifest::parse(&body_a) {
            let manifest = manifest.unwrap();
            let stored = first.lock().unwrap();
            prop_assert!(manifest.chunks().iter().all(|address| stored.contains_key(address)));
        }
    }

    #[test]
    fn every_chunk_fits(value in arb_fragment(), chunk_size in 16usize..1200) {
        let chunks = Chunks::default();
        run(roundtrip(&value, chunk_size, &chunks));
        for body in chunks.lock().unwrap().values() {
            prop_assert!(body.len() <= chunk_size);
        }
    }

    #[test]
    fn manifest_parse_is_stable(hashes in prop::collection::vec(any::<[u8; 20]>(), 1..20)) {
        let manifest = Manifest::new(hashes.into_iter().map(Address::from_bytes).collect());
        let wire = manifest.to_wire();
        let parsed = Manifest::parse(wire.as_bytes()).unwrap().unwrap();
        prop_assert_eq!(parsed.to_wire(), wire);
        prop_assert_eq!(parsed, manifest);
    }
}
