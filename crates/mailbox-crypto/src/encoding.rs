//! Text-safe packaging of salts, nonces and ciphertext.
//!
//! Standard base64 alphabet with padding, the same encoding the mailbox
//! files have always used for `salt`, `iv` and `enc_body`.

use base64::{engine::general_purpose, Engine as _};

use crate::error::CryptoError;

pub fn encode(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(general_purpose::STANDARD.decode(text)?)
}

/// Decode `text` and require exactly `N` bytes. `what` names the field in the error.
pub fn decode_fixed<const N: usize>(text: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode(text)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidInput(format!("{what} must be {N} bytes, got {len}")))
}
