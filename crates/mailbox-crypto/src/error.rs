use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    /// Tag mismatch. Wrong passphrase and tampering are deliberately the same error.
    #[error("Authentication failed: incorrect passphrase or corrupted data")]
    AuthenticationFailed,

    #[error("Base64 decode error: {0}")]
    Encoding(#[from] base64::DecodeError),
}
