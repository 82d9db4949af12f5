//! Relay channel wire types.
//!
//! Every frame is a JSON text message carrying a request `id`; the relay
//! answers each request with exactly one reply frame bearing the same id.
//!
//! ```text
//! {"id":1,"type":"seed","seed":"<hex>"}            -> {"id":1,"type":"seed","pubkey":"<hex>"}
//! {"id":2,"type":"get","address":"<hex>"}          -> {"id":2,"type":"get","val":...}
//! {"id":3,"type":"put","val":...,"salt":"offer"}   -> {"id":3,"type":"put","hash":"<hex>"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SignalError, WireError};
use crate::identity::{Address, PublicKey, Salt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Hex SHA-256 of the shared secret. First message of a connection.
    Seed { seed: String },
    Get { address: String },
    Put { val: Value, salt: Salt },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Seed { .. } => "seed",
            Request::Get { .. } => "get",
            Request::Put { .. } => "put",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Seed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<WireError>,
    },
    Get {
        #[serde(default)]
        val: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<WireError>,
    },
    Put {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<WireError>,
    },
}

impl Reply {
    pub fn seeded(result: Result<PublicKey, SignalError>) -> Self {
        match result {
            Ok(pubkey) => Reply::Seed {
                pubkey: Some(pubkey.to_hex()),
                err: None,
            },
            Err(e) => Reply::Seed {
                pubkey: None,
                err: Some(WireError::from(&e)),
            },
        }
    }

    pub fn got(result: Result<Value, SignalError>) -> Self {
        match result {
            Ok(val) => Reply::Get { val, err: None },
            Err(e) => Reply::Get {
                val: Value::Null,
                err: Some(WireError::from(&e)),
            },
        }
    }

    pub fn stored(result: Result<Address, SignalError>) -> Self {
        match result {
            Ok(address) => Reply::Put {
                hash: Some(address.to_hex()),
                err: None,
            },
            Err(e) => Reply::Put {
                hash: None,
                err: Some(WireError::from(&e)),
            },
        }
    }

    pub fn into_seed(self) -> Result<PublicKey, SignalError> {
        match self {
            Reply::Seed { err: Some(err), .. } => Err(SignalError::from_wire(&err)),
            Reply::Seed {
                pubkey: Some(pubkey),
                err: None,
            } => PublicKey::from_hex(&pubkey),
            other => Err(unexpected("seed", &other)),
        }
    }

    pub fn into_get(self) -> Result<Value, SignalError> {
        match self {
            Reply::Get { err: Some(err), .. } => Err(SignalError::from_wire(&err)),
            Reply::Get { val, err: None } => Ok(val),
            other => Err(unexpected("get", &other)),
        }
    }

    pub fn into_put(self) -> Result<Address, SignalError> {
        match self {
            Reply::Put { err: Some(err), .. } => Err(SignalError::from_wire(&err)),
            Reply::Put {
                hash: Some(hash),
                err: None,
            } => hash.parse(),
            other => Err(unexpected("put", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> SignalError {
    SignalError::ChannelError(format!("expected {expected} reply, got {got:?}"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub id: u64,
    #[serde(flatten)]
    pub reply: Reply,
}
