//! mailbox-crypto: MAILB0X cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Derived keys and decrypted bodies are zeroized on drop.
//! - Every message gets its own random salt and nonce; nothing is counter based.
//!
//! # Module layout
//! - `kdf`     : Argon2id / PBKDF2-HMAC-SHA256 passphrase key derivation
//! - `aead`    : AES-256-GCM encrypt/decrypt helpers
//! - `sealed`  : one-shot passphrase sealing of a message body
//! - `encoding`: base64 packaging for JSON embedding
//! - `error`   : unified error type

pub mod aead;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod sealed;

pub use aead::CIPHER_ID;
pub use error::CryptoError;
pub use kdf::{DerivedKey, KdfParams, KdfProvider, BUILD_KDF_ID};
pub use sealed::{EncodedMessage, SealedMessage};
