//! Secret-derived Ed25519 identities and rendezvous addresses.
//!
//! Both peers hold the same shared secret, so both derive the same keypair
//! and therefore the same store addresses. The only per-peer input is the
//! [`Role`], which picks which salt a peer writes and which it reads.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::encoding::{hex_decode_array, hex_encode};
use crate::error::SignalError;

// --- SharedSecret ---

/// Opaque bytes agreed out of band.
#[derive(Clone)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, SignalError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(SignalError::InvalidSecret);
        }
        Ok(Self(bytes))
    }

    /// SHA-256 of the secret: the 32-byte Ed25519 seed sent to the relay.
    pub fn seed(&self) -> [u8; 32] {
        let digest = Sha256::digest(&self.0);
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        seed
    }

    pub fn seed_hex(&self) -> String {
        hex_encode(&self.seed())
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes>)", self.0.len())
    }
}

// --- Role / Salt ---

/// Chosen locally, never transmitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    /// The salt this role writes its own fragments under.
    pub fn own_salt(self) -> Salt {
        match self {
            Role::Initiator => Salt::Offer,
            Role::Acceptor => Salt::Answer,
        }
    }

    /// The salt this role polls for the other side's fragments.
    pub fn remote_salt(self) -> Salt {
        match self {
            Role::Initiator => Salt::Answer,
            Role::Acceptor => Salt::Offer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Salt {
    Offer,
    Answer,
}

impl Salt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Salt::Offer => "offer",
            Salt::Answer => "answer",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- PublicKey ---

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SignalError> {
        hex_decode_array(s)
            .map(Self)
            .map_err(|e| SignalError::ChannelError(format!("bad public key: {e}")))
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..8])
    }
}

// --- Address ---

/// 20-byte store address: SHA-1 of (salt ‖ pubkey) for mutable records,
/// SHA-1 of the body for immutable ones.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Content address of an immutable body.
    pub fn of_content(body: &[u8]) -> Self {
        Self(sha1_digest(&[body]))
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl FromStr for Address {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex_decode_array(s)
            .map(Self)
            .map_err(|e| SignalError::InvalidAddress(format!("{s}: {e}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Deterministic lookup address for a mutable record: SHA-1 of `salt ‖ pubkey`.
pub fn lookup_key(public_key: &PublicKey, salt: Salt) -> Address {
    Address(sha1_digest(&[salt.as_bytes(), public_key.as_bytes()]))
}

fn sha1_digest(parts: &[&[u8]]) -> [u8; 20] {
    use sha1::Digest as _;
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Hex SHA-1 of arbitrary bytes; used for fragment fingerprints.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex_encode(&sha1_digest(&[bytes]))
}

// --- Identity ---

/// Ed25519 keypair deterministically derived from a 32-byte seed.
#[derive(Clone)]
pub struct Identity {
    signing_key: ed25519_dalek::SigningKey,
    public_key: PublicKey,
}

impl Identity {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Identity for a shared secret; identical secrets give identical keys.
    pub fn derive(secret: &SharedSecret) -> Self {
        Self::from_seed(secret.seed())
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn address(&self, salt: Salt) -> Address {
        lookup_key(&self.public_key, salt)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        use ed25519_dalek::Signer;
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Derive an identity straight from secret bytes.
pub fn derive_identity(secret: &[u8]) -> Result<Identity, SignalError> {
    SharedSecret::new(secret).map(|s| Identity::derive(&s))
}

pub fn verify(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), SignalError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| SignalError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    vk.verify(message, &sig)
        .map_err(|_| SignalError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_rejected() {
        assert_eq!(derive_identity(b"").unwrap_err(), SignalError::InvalidSecret);
        assert!(SharedSecret::new(Vec::new()).is_err());
    }

    #[test]
    fn same_secret_same_key() {
        let a = derive_identity(b"room42").unwrap();
        let b = derive_identity(b"room42").unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn different_secret_different_key() {
        let a = derive_identity(b"room42").unwrap();
        let b = derive_identity(b"room43").unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn relay_and_client_derivations_agree() {
        // The client only ships the seed; the relay rebuilds the key from it.
        let secret = SharedSecret::new("room42").unwrap();
        let seed = hex_decode_array::<32>(&secret.seed_hex()).unwrap();
        assert_eq!(
            Identity::from_seed(seed).public_key(),
            Identity::derive(&secret).public_key()
        );
    }

    #[test]
    fn salts_never_collide() {
        let id = derive_identity(b"room42").unwrap();
        assert_ne!(id.address(Salt::Offer), id.address(Salt::Answer));
    }

    #[test]
    fn lookup_key_is_salt_then_pubkey() {
        let pk = PublicKey::from_bytes([7u8; 32]);
        let mut raw = b"offer".to_vec();
        raw.extend_from_slice(&[7u8; 32]);
        assert_eq!(lookup_key(&pk, Salt::Offer), Address::of_content(&raw));
    }

    #[test]
    fn roles_are_mirrored() {
        assert_eq!(Role::Initiator.own_salt(), Role::Acceptor.remote_salt());
        assert_eq!(Role::Acceptor.own_salt(), Role::Initiator.remote_salt());
    }

    #[test]
    fn sign_verify_roundtrip() {
        let id = derive_identity(b"room42").unwrap();
        let sig = id.sign(b"hello");
        assert!(verify(&id.public_key(), b"hello", &sig).is_ok());
        assert!(verify(&id.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn address_serde_roundtrip() {
        let addr = Address::of_content(b"chunk");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn bad_address_rejected() {
        assert!(matches!(
            "zz".parse::<Address>(),
            Err(SignalError::InvalidAddress(_))
        ));
        assert!("abcd".parse::<Address>().is_err());
    }

    #[test]
    fn secret_debug_hides_bytes() {
        let s = SharedSecret::new("room42").unwrap();
        assert_eq!(format!("{s:?}"), "SharedSecret(<6 bytes>)");
    }
}
