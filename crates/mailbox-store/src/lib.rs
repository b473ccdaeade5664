//! mailbox-store: MAILB0X per-recipient encrypted mailboxes
//!
//! One JSON file per recipient holds an ordered list of messages. Each
//! message body is sealed with AES-256-GCM under a key derived from the
//! mailbox passphrase and a per-message salt (see `mailbox-crypto`). Sender
//! and metadata stay in cleartext so collaborators can route without the
//! passphrase. Passphrases, derived keys and bodies never touch the disk.
//!
//! # Concurrency
//! Writers serialise on a `<mailbox>.json.lock` file and re-check a BLAKE3
//! fingerprint of the mailbox before the atomic rename; losing either race
//! yields [`MailboxError::Conflict`] and the caller retries.
//!
//! # Module layout
//! - `store`   : `MailboxStore`: append / decrypt_all / info / delete
//! - `envelope`: on-disk envelope and record models
//! - `paths`   : recipient id sanitisation, path resolution, listing
//! - `lock`    : lock file and fingerprint
//! - `config`  : `StoreConfig`
//! - `error`   : `MailboxError`

pub mod config;
pub mod envelope;
pub mod error;
pub mod lock;
pub mod paths;
pub mod store;

pub use config::StoreConfig;
pub use envelope::{DecryptedMessage, MailboxInfo, Metadata, NewMessage};
pub use error::MailboxError;
pub use store::MailboxStore;
