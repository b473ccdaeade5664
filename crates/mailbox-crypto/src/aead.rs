//! Authenticated encryption
//!
//! AES-256-GCM, 32-byte key, 12-byte random nonce, 16-byte tag, no AAD.
//! The ciphertext carries the tag appended (`ciphertext || tag`); the nonce
//! is stored separately as the record's `iv`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::DerivedKey;

pub const CIPHER_ID: &str = "aes-256-gcm";
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

pub fn encrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)
}

/// Decrypt `ciphertext || tag`. Any failure, including a truncated input,
/// is reported as `AuthenticationFailed` with no further detail.
pub fn decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(Zeroizing::new(plaintext))
}

/// Generate a fresh random 12-byte nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
