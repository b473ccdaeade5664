//! Recipient addressing: identifier → mailbox file.

use directories::ProjectDirs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::MailboxError;

pub const APP_QUALIFIER: &str = "net";
pub const APP_ORG: &str = "mailb0x";
pub const APP_NAME: &str = "mailbox";

pub const MAILBOX_EXTENSION: &str = "json";

pub fn default_base_dir() -> Result<PathBuf, MailboxError> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| MailboxError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().join("mailboxes"))
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`, one for one.
///
/// Deterministic and idempotent. Distinct ids can map to the same safe id
/// (`a.b` and `a/b` both become `a_b`); such recipients share a mailbox.
pub fn sanitize_recipient_id(recipient_id: &str) -> String {
    recipient_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn resolve_path(recipient_id: &str, base_dir: &Path) -> Result<PathBuf, MailboxError> {
    if recipient_id.is_empty() {
        return Err(MailboxError::InvalidInput("recipient id cannot be empty".into()));
    }
    let safe = sanitize_recipient_id(recipient_id);
    Ok(base_dir.join(format!("{safe}.{MAILBOX_EXTENSION}")))
}

/// Recipient ids (file stems) of every mailbox in `base_dir`, sorted.
pub fn list_recipients(base_dir: &Path) -> Result<Vec<String>, MailboxError> {
    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    let mut recipients = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MAILBOX_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            recipients.push(stem.to_string());
        }
    }
    recipients.sort();
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitization_replaces_unsafe_chars() {
        assert_eq!(sanitize_recipient_id("test-user-123"), "test-user-123");
        assert_eq!(sanitize_recipient_id("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_recipient_id("a<b>:c d"), "a_b__c_d");
        assert_eq!(sanitize_recipient_id("!a1b2c3d4"), "_a1b2c3d4");
    }

    #[test]
    fn sanitization_keeps_length_and_is_idempotent() {
        for raw in ["nodé/ß", "alice", "x:y:z", "🙂 hi", ""] {
            let once = sanitize_recipient_id(raw);
            assert_eq!(once.chars().count(), raw.chars().count());
            assert_eq!(sanitize_recipient_id(&once), once);
            assert_eq!(sanitize_recipient_id(raw), once);
        }
    }

    #[test]
    fn resolve_stays_inside_base_dir() {
        let base = Path::new("/data/mailboxes");
        let path = resolve_path("../../root/.ssh", base).unwrap();
        assert_eq!(path.parent(), Some(base));
        assert_eq!(path.file_name().unwrap(), "______root__ssh.json");
        assert!(matches!(
            resolve_path("", base),
            Err(MailboxError::InvalidInput(_))
        ));
    }

    #[test]
    fn list_recipients_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["charlie.json", "alice.json", "bob.json", "alice.json.lock", "notes.txt"] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }
        fs::create_dir(dir.path().join("dave.json")).unwrap();
        assert_eq!(
            list_recipients(dir.path()).unwrap(),
            vec!["alice", "bob", "charlie"]
        );
    }

    #[test]
    fn list_recipients_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_recipients(&dir.path().join("nope")).unwrap().is_empty());
    }
}
