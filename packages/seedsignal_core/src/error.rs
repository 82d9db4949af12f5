//! Error taxonomy shared by the client session, the relay bridge and the
//! store layer, plus its wire form.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("invalid secret: must be non-empty")]
    InvalidSecret,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store request timed out")]
    Timeout,

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("relay channel error: {0}")]
    ChannelError(String),

    #[error("connection has not sent a seed")]
    NotAuthenticated,

    #[error("record too large: {size} bytes (limit {limit})")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl SignalError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidSecret => "invalid_secret",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Timeout => "timeout",
            Self::CorruptManifest(_) => "corrupt_manifest",
            Self::ChannelError(_) => "channel_error",
            Self::NotAuthenticated => "not_authenticated",
            Self::RecordTooLarge { .. } => "record_too_large",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidAddress(_) => "invalid_address",
        }
    }

    /// Rebuild an error from its wire form. Variants that carry structured
    /// data the wire form does not preserve come back as `StoreUnavailable`
    /// with the original message.
    pub fn from_wire(wire: &WireError) -> Self {
        let message = wire.message.clone();
        match wire.error.as_str() {
            "invalid_secret" => Self::InvalidSecret,
            "timeout" => Self::Timeout,
            "corrupt_manifest" => Self::CorruptManifest(message),
            "channel_error" => Self::ChannelError(message),
            "not_authenticated" => Self::NotAuthenticated,
            "invalid_signature" => Self::InvalidSignature,
            "invalid_address" => Self::InvalidAddress(message),
            _ => Self::StoreUnavailable(message),
        }
    }
}

/// Serializable error carried in the `err` field of relay replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub error: String,
    pub message: String,
}

impl From<&SignalError> for WireError {
    fn from(err: &SignalError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
