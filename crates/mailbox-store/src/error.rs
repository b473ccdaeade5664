use std::path::PathBuf;
use thiserror::Error;

use mailbox_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mailbox not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Mailbox {} is corrupt: {reason}", .path.display())]
    CorruptData { path: PathBuf, reason: String },

    /// Wrong passphrase or tampered record; the two are never told apart.
    #[error("{operation}: authentication failed for message {}", .record_id.as_deref().unwrap_or("unknown"))]
    AuthenticationFailed {
        operation: &'static str,
        record_id: Option<String>,
    },

    #[error("Mailbox {} changed concurrently, retry the operation", .0.display())]
    Conflict(PathBuf),

    /// The mailbox records KDF costs below the store's configured ones.
    #[error("Mailbox {} uses weaker KDF costs than configured, refusing to append", .0.display())]
    WeakKdf(PathBuf),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MailboxError {
    /// True for a missing mailbox, which callers usually treat as "no messages".
    pub fn is_not_found(&self) -> bool {
        matches!(self, MailboxError::NotFound(_))
    }

    pub(crate) fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        MailboxError::CorruptData {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl From<CryptoError> for MailboxError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidInput(msg) => MailboxError::InvalidInput(msg),
            CryptoError::AuthenticationFailed => MailboxError::AuthenticationFailed {
                operation: "decrypt",
                record_id: None,
            },
            other => MailboxError::Crypto(other),
        }
    }
}
