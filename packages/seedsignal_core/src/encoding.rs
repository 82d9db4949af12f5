//! Shared encoding helpers: lowercase hex for keys, seeds and addresses.

use data_encoding::HEXLOWER_PERMISSIVE;

/// Encode bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(bytes)
}

/// Decode hex (either case) back to bytes.
pub fn hex_decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    HEXLOWER_PERMISSIVE.decode(s.as_bytes())
}

/// Decode hex into a fixed-size array, rejecting any other length.
pub fn hex_decode_array<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let bytes = hex_decode(s).map_err(|e| format!("hex decode: {e}"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("expected {N} bytes, got {len}"))
}
