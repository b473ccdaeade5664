//! Mailbox store: append, decrypt, inspect and delete messages in one
//! recipient's mailbox file.
//!
//! Every mutation is load → mutate → atomic replace under a [`MailboxLock`].
//! The file is written to a temp file in the same directory, fsynced and
//! renamed over the old one, so a crash leaves either the old or the new
//! mailbox and never a torn one.

use chrono::Utc;
use mailbox_crypto::{sealed, CryptoError, KdfProvider, BUILD_KDF_ID};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::StoreConfig;
use crate::envelope::{DecryptedMessage, MailRecord, MailboxEnvelope, MailboxInfo, NewMessage};
use crate::error::MailboxError;
use crate::lock::{Fingerprint, MailboxLock};
use crate::paths;

pub struct MailboxStore {
    config: StoreConfig,
}

impl MailboxStore {
    pub fn new(config: StoreConfig) -> Result<Self, MailboxError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ── Addressing ──────────────────────────────────────────────────────────

    pub fn resolve_path(&self, recipient_id: &str) -> Result<PathBuf, MailboxError> {
        paths::resolve_path(recipient_id, &self.config.base_dir)
    }

    pub fn list_recipients(&self) -> Result<Vec<String>, MailboxError> {
        paths::list_recipients(&self.config.base_dir)
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Encrypt `message.body` under `passphrase` and append it to the mailbox
    /// at `path`, creating the mailbox if needed. Returns the new message id.
    ///
    /// An existing mailbox must open its first message under `passphrase`
    /// and record KDF costs no weaker than the configured ones.
    pub fn append(
        &self,
        path: &Path,
        message: NewMessage,
        passphrase: &str,
    ) -> Result<String, MailboxError> {
        let NewMessage {
            sender,
            body,
            metadata,
        } = message;
        let body = Zeroizing::new(body);
        require_non_empty("sender", &sender)?;
        require_non_empty("body", &body)?;
        require_non_empty("passphrase", passphrase)?;

        ensure_dir(parent_dir(path))?;
        let _lock = self.lock(path)?;
        let (mut envelope, fingerprint) = match load(path) {
            Ok(loaded) => loaded,
            Err(MailboxError::NotFound(_)) => {
                info!(path = %path.display(), kdf = self.config.kdf.id(), "creating mailbox");
                (MailboxEnvelope::new(self.config.kdf), Fingerprint::absent())
            }
            Err(e) => return Err(e),
        };

        let kdf = kdf_for(&envelope, path)?;
        if !envelope.effective_kdf().at_least(&self.config.kdf) {
            warn!(
                path = %path.display(),
                kdf = %envelope.kdf_id,
                "mailbox kdf costs are below the configured ones"
            );
            return Err(MailboxError::WeakKdf(path.to_path_buf()));
        }
        if let Some(first) = envelope.records.first() {
            open_record(kdf.as_ref(), path, first, passphrase, "append")?;
        }
        let sealed_body = sealed::seal(kdf.as_ref(), passphrase, body.as_bytes())?;
        let id = Uuid::new_v4().to_string();
        envelope
            .records
            .push(MailRecord::new(id.clone(), Utc::now(), sender, metadata, &sealed_body));

        persist(path, &envelope, &fingerprint)?;
        info!(
            path = %path.display(),
            message_id = %id,
            count = envelope.records.len(),
            "message appended"
        );
        Ok(id)
    }

    /// Decrypt every message, oldest first. Fails on the first message that
    /// does not authenticate under `passphrase`.
    pub fn decrypt_all(
        &self,
        path: &Path,
        passphrase: &str,
    ) -> Result<Vec<DecryptedMessage>, MailboxError> {
        require_non_empty("passphrase", passphrase)?;
        let (envelope, _) = load(path)?;
        let kdf = kdf_for(&envelope, path)?;

        let mut messages = Vec::with_capacity(envelope.records.len());
        for record in &envelope.records {
            let plaintext = open_record(kdf.as_ref(), path, record, passphrase, "decrypt_all")?;
            let body = std::str::from_utf8(&plaintext).map_err(|_| {
                MailboxError::corrupt(path, format!("message {} is not valid UTF-8", record.id))
            })?;
            messages.push(DecryptedMessage {
                id: record.id.clone(),
                body: Zeroizing::new(body.to_owned()),
                sent_at: record.sent_at,
                sender: record.sender.clone(),
                metadata: record.metadata.clone(),
            });
        }
        debug!(path = %path.display(), count = messages.len(), "mailbox decrypted");
        Ok(messages)
    }

    /// Envelope metadata. Needs no passphrase and decrypts nothing.
    pub fn info(&self, path: &Path) -> Result<MailboxInfo, MailboxError> {
        let (envelope, _) = load(path)?;
        Ok(envelope.info(path))
    }

    /// Delete message `record_id` after checking `passphrase` against the
    /// first message. Returns `false`, leaving the file untouched, when no
    /// message has that id. An empty mailbox accepts any passphrase.
    pub fn delete(
        &self,
        path: &Path,
        record_id: &str,
        passphrase: &str,
    ) -> Result<bool, MailboxError> {
        require_non_empty("message id", record_id)?;
        require_non_empty("passphrase", passphrase)?;

        let _lock = self.lock(path)?;
        let (mut envelope, fingerprint) = load(path)?;

        if let Some(first) = envelope.records.first() {
            let kdf = kdf_for(&envelope, path)?;
            open_record(kdf.as_ref(), path, first, passphrase, "delete")?;
        }

        if !envelope.remove(record_id) {
            debug!(path = %path.display(), message_id = record_id, "message not found");
            return Ok(false);
        }

        persist(path, &envelope, &fingerprint)?;
        info!(
            path = %path.display(),
            message_id = record_id,
            count = envelope.records.len(),
            "message deleted"
        );
        Ok(true)
    }

    // ── Private helpers ─────────────────────────────────────────────────────

    fn lock(&self, path: &Path) -> Result<MailboxLock, MailboxError> {
        MailboxLock::acquire(
            path,
            self.config.lock_timeout(),
            self.config.lock_retry_interval(),
            self.config.stale_lock_after(),
        )
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<(), MailboxError> {
    if value.is_empty() {
        return Err(MailboxError::InvalidInput(format!("{what} cannot be empty")));
    }
    Ok(())
}

fn load(path: &Path) -> Result<(MailboxEnvelope, Fingerprint), MailboxError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MailboxError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let envelope = MailboxEnvelope::from_slice(path, &bytes)?;
    debug!(path = %path.display(), count = envelope.records.len(), "mailbox loaded");
    Ok((envelope, Fingerprint::of(&bytes)))
}

fn kdf_for(envelope: &MailboxEnvelope, path: &Path) -> Result<Box<dyn KdfProvider>, MailboxError> {
    let params = envelope.effective_kdf();
    if params.id() != envelope.kdf_id {
        warn!(
            path = %path.display(),
            recorded = %envelope.kdf_id,
            using = params.id(),
            "mailbox kdf id does not match its parameters"
        );
    } else if envelope.kdf_id != BUILD_KDF_ID {
        debug!(path = %path.display(), kdf = %envelope.kdf_id, "mailbox uses non-default kdf");
    }
    params
        .provider()
        .map_err(|e| MailboxError::corrupt(path, format!("kdf: {e}")))
}

fn open_record(
    kdf: &dyn KdfProvider,
    path: &Path,
    record: &MailRecord,
    passphrase: &str,
    operation: &'static str,
) -> Result<Zeroizing<Vec<u8>>, MailboxError> {
    let sealed_message = record.sealed(path)?;
    sealed::open(kdf, passphrase, &sealed_message).map_err(|e| match e {
        CryptoError::AuthenticationFailed => MailboxError::AuthenticationFailed {
            operation,
            record_id: Some(record.id.clone()),
        },
        other => other.into(),
    })
}

fn persist(
    path: &Path,
    envelope: &MailboxEnvelope,
    expected: &Fingerprint,
) -> Result<(), MailboxError> {
    let dir = parent_dir(path);
    let bytes = envelope.to_vec()?;
    let mut staging = tempfile::Builder::new()
        .prefix(".mailbox-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staging.write_all(&bytes)?;
    staging.as_file().sync_all()?;

    expected.ensure_unchanged(path)?;
    staging.persist(path).map_err(|e| MailboxError::Storage(e.error))?;
    fsync_dir(dir)?;
    debug!(path = %path.display(), bytes = bytes.len(), "mailbox persisted");
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn ensure_dir(dir: &Path) -> Result<(), MailboxError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    restrict_dir_permissions(dir);
    Ok(())
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}

fn fsync_dir(path: &Path) -> Result<(), MailboxError> {
    #[cfg(unix)]
    {
        let dir = OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    Ok(())
}
