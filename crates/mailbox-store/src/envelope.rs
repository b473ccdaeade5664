//! On-disk mailbox models.

use chrono::{DateTime, Utc};
use mailbox_crypto::kdf::{generate_salt, ARGON2ID_ID, PBKDF2_SHA256_ID};
use mailbox_crypto::{encoding, EncodedMessage, KdfParams, SealedMessage, CIPHER_ID};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::MailboxError;

pub const FORMAT_VERSION: u32 = 1;

/// Caller-supplied auxiliary fields stored in cleartext next to a message.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxEnvelope {
    #[serde(rename = "version")]
    pub format_version: u32,
    #[serde(rename = "cipher")]
    pub cipher_id: String,
    #[serde(rename = "kdf")]
    pub kdf_id: String,
    /// Absent in mailboxes written before costs were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,
    /// Mailbox-level salt, generated at creation. Reserved; no operation reads it.
    #[serde(rename = "salt")]
    pub envelope_salt: String,
    #[serde(rename = "mail", default)]
    pub records: Vec<MailRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRecord {
    pub id: String,
    pub enc_body: String,
    pub iv: String,
    pub salt: String,
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A message to append. `body` is encrypted; `sender` and `metadata` are not.
#[derive(Clone, Default)]
pub struct NewMessage {
    pub sender: String,
    pub body: String,
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for NewMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewMessage")
            .field("sender", &self.sender)
            .field("body", &"<redacted>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A decrypted message. The body is wiped from memory on drop.
#[derive(Clone, PartialEq)]
pub struct DecryptedMessage {
    pub id: String,
    pub body: Zeroizing<String>,
    pub sent_at: DateTime<Utc>,
    pub sender: String,
    pub metadata: Metadata,
}

impl fmt::Debug for DecryptedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedMessage")
            .field("id", &self.id)
            .field("body", &"<redacted>")
            .field("sent_at", &self.sent_at)
            .field("sender", &self.sender)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxInfo {
    pub version: u32,
    pub cipher: String,
    pub kdf: String,
    pub message_count: usize,
    pub path: PathBuf,
}

impl MailboxEnvelope {
    pub fn new(kdf: KdfParams) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            cipher_id: CIPHER_ID.to_string(),
            kdf_id: kdf.id().to_string(),
            kdf_params: Some(kdf),
            envelope_salt: encoding::encode(&generate_salt()),
            records: Vec::new(),
        }
    }

    /// Parse a mailbox file's bytes, rejecting anything that is not a version 1 envelope.
    pub fn from_slice(path: &Path, bytes: &[u8]) -> Result<Self, MailboxError> {
        let envelope: MailboxEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| MailboxError::corrupt(path, format!("parse: {e}")))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(MailboxError::corrupt(
                path,
                format!("unsupported version {}", envelope.format_version),
            ));
        }
        Ok(envelope)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MailboxError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// KDF parameters for this mailbox. Files written before costs were
    /// recorded get the default costs of the KDF named in `kdf`.
    pub fn effective_kdf(&self) -> KdfParams {
        match self.kdf_params {
            Some(params) => params,
            None if self.kdf_id == ARGON2ID_ID => KdfParams::argon2id_default(),
            None if self.kdf_id == PBKDF2_SHA256_ID => KdfParams::pbkdf2_default(),
            None => KdfParams::build_default(),
        }
    }

    pub fn info(&self, path: &Path) -> MailboxInfo {
        MailboxInfo {
            version: self.format_version,
            cipher: self.cipher_id.clone(),
            kdf: self.kdf_id.clone(),
            message_count: self.records.len(),
            path: path.to_path_buf(),
        }
    }

    /// Remove the record with `record_id`, keeping the others in order.
    pub fn remove(&mut self, record_id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != record_id);
        self.records.len() < before
    }
}

impl MailRecord {
    pub fn new(
        id: String,
        sent_at: DateTime<Utc>,
        sender: String,
        metadata: Metadata,
        sealed: &SealedMessage,
    ) -> Self {
        let encoded = sealed.to_encoded();
        Self {
            id,
            enc_body: encoded.enc_body,
            iv: encoded.iv,
            salt: encoded.salt,
            sent_at,
            sender,
            metadata,
        }
    }

    /// Decode the base64 fields. Bad encodings or lengths mean a corrupt file.
    pub fn sealed(&self, path: &Path) -> Result<SealedMessage, MailboxError> {
        EncodedMessage {
            salt: self.salt.clone(),
            iv: self.iv.clone(),
            enc_body: self.enc_body.clone(),
        }
        .decode()
        .map_err(|e| MailboxError::corrupt(path, format!("message {}: {e}", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("/tmp/alice.json")
    }

    #[test]
    fn new_envelope_fields() {
        let env = MailboxEnvelope::new(KdfParams::pbkdf2_default());
        assert_eq!(env.format_version, 1);
        assert_eq!(env.cipher_id, "aes-256-gcm");
        assert_eq!(env.kdf_id, "pbkdf2-sha256");
        assert_eq!(encoding::decode(&env.envelope_salt).unwrap().len(), 16);
        assert!(env.records.is_empty());
    }

    #[test]
    fn json_uses_wire_names() {
        let env = MailboxEnvelope::new(KdfParams::argon2id_default());
        let value: Value = serde_json::from_slice(&env.to_vec().unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["cipher"], "aes-256-gcm");
        assert_eq!(value["kdf"], "argon2id");
        assert_eq!(value["kdf_params"]["m_cost"], 65536);
        assert!(value["salt"].is_string());
        assert_eq!(value["mail"], Value::Array(vec![]));
    }

    #[test]
    fn legacy_file_without_kdf_params_parses() {
        let json = br#"{
            "version": 1,
            "cipher": "aes-256-gcm",
            "kdf": "argon2id",
            "salt": "AAAAAAAAAAAAAAAAAAAAAA==",
            "mail": [{
                "id": "6f1c1f0e-9d0a-4a51-9d7c-1c2a3b4c5d6e",
                "enc_body": "AAAA",
                "iv": "AAAAAAAAAAAAAAAA",
                "salt": "AAAAAAAAAAAAAAAAAAAAAA==",
                "sent_at": "2024-05-01T12:30:00.123456+00:00",
                "from": "nodeA"
            }]
        }"#;
        let env = MailboxEnvelope::from_slice(path(), json).unwrap();
        assert_eq!(env.kdf_params, None);
        assert_eq!(env.effective_kdf(), KdfParams::argon2id_default());
        assert_eq!(env.records[0].sender, "nodeA");
        assert!(env.records[0].metadata.is_empty());
        assert_eq!(env.info(path()).message_count, 1);
    }

    #[test]
    fn legacy_pbkdf2_file_uses_pbkdf2_defaults() {
        let mut env = MailboxEnvelope::new(KdfParams::argon2id_default());
        env.kdf_id = PBKDF2_SHA256_ID.into();
        env.kdf_params = None;
        assert_eq!(env.effective_kdf(), KdfParams::pbkdf2_default());
    }

    #[test]
    fn garbage_and_wrong_version_are_corrupt() {
        assert!(matches!(
            MailboxEnvelope::from_slice(path(), b"not json"),
            Err(MailboxError::CorruptData { .. })
        ));
        let v2 = br#"{"version": 2, "cipher": "x", "kdf": "y", "salt": "", "mail": []}"#;
        assert!(matches!(
            MailboxEnvelope::from_slice(path(), v2),
            Err(MailboxError::CorruptData { ref reason, .. }) if reason.contains("version 2")
        ));
    }

    #[test]
    fn bad_record_encoding_is_corrupt() {
        let record = MailRecord {
            id: "r1".into(),
            enc_body: "AAAA".into(),
            iv: "%%%".into(),
            salt: encoding::encode(&[0u8; 16]),
            sent_at: Utc::now(),
            sender: "nodeA".into(),
            metadata: Metadata::new(),
        };
        assert!(matches!(
            record.sealed(path()),
            Err(MailboxError::CorruptData { ref reason, .. }) if reason.contains("r1")
        ));
    }

    #[test]
    fn remove_keeps_order() {
        let mut env = MailboxEnvelope::new(KdfParams::pbkdf2_default());
        for id in ["a", "b", "c", "d"] {
            env.records.push(MailRecord {
                id: id.into(),
                enc_body: String::new(),
                iv: String::new(),
                salt: String::new(),
                sent_at: Utc::now(),
                sender: "s".into(),
                metadata: Metadata::new(),
            });
        }
        assert!(env.remove("b"));
        assert!(!env.remove("zzz"));
        let ids: Vec<_> = env.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "d"]);
    }

    #[test]
    fn decrypted_debug_hides_body() {
        let msg = DecryptedMessage {
            id: "r1".into(),
            body: Zeroizing::new("top secret".into()),
            sent_at: Utc::now(),
            sender: "nodeA".into(),
            metadata: Metadata::new(),
        };
        assert!(!format!("{msg:?}").contains("top secret"));

        let outgoing = NewMessage::new("nodeA", "top secret").with_metadata("priority", "urgent");
        let shown = format!("{outgoing:?}");
        assert!(!shown.contains("top secret"));
        assert!(shown.contains("nodeA") && shown.contains("urgent"));
    }
}
