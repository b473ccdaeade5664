//! One-shot passphrase sealing of a message body.
//!
//! Every call to [`seal`] draws a new salt and a new nonce, so sealing the
//! same body twice under the same passphrase never repeats key material or
//! ciphertext.

use zeroize::Zeroizing;

use crate::aead::{self, NONCE_LEN};
use crate::encoding;
use crate::error::CryptoError;
use crate::kdf::{generate_salt, KdfProvider, SALT_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

/// Base64 form of a [`SealedMessage`], named after the mailbox record fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub salt: String,
    pub iv: String,
    pub enc_body: String,
}

pub fn seal(
    kdf: &dyn KdfProvider,
    passphrase: &str,
    plaintext: &[u8],
) -> Result<SealedMessage, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidInput("plaintext cannot be empty".into()));
    }
    let salt = generate_salt();
    let nonce = aead::generate_nonce();
    let key = kdf.derive(passphrase, &salt)?;
    let ciphertext = aead::encrypt(&key, &nonce, plaintext)?;
    Ok(SealedMessage {
        salt,
        nonce,
        ciphertext,
    })
}

pub fn open(
    kdf: &dyn KdfProvider,
    passphrase: &str,
    sealed: &SealedMessage,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = kdf.derive(passphrase, &sealed.salt)?;
    aead::decrypt(&key, &sealed.nonce, &sealed.ciphertext)
}

impl SealedMessage {
    pub fn to_encoded(&self) -> EncodedMessage {
        EncodedMessage {
            salt: encoding::encode(&self.salt),
            iv: encoding::encode(&self.nonce),
            enc_body: encoding::encode(&self.ciphertext),
        }
    }
}

impl EncodedMessage {
    pub fn decode(&self) -> Result<SealedMessage, CryptoError> {
        Ok(SealedMessage {
            salt: encoding::decode_fixed(&self.salt, "salt")?,
            nonce: encoding::decode_fixed(&self.iv, "iv")?,
            ciphertext: encoding::decode(&self.enc_body)?,
        })
    }
}
