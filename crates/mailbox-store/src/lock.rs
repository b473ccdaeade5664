//! Cross-process exclusion for mailbox writers.
//!
//! `append` and `delete` hold a [`MailboxLock`] from load to rename. The lock
//! is a sidecar `<mailbox>.json.lock` created with `create_new`, which the OS
//! performs atomically, so exactly one writer wins. The file carries a random
//! owner token: a holder only ever removes a lock that still carries its own
//! token, and a stale lock is renamed aside and checked before it is
//! unlinked. Writers that ignore the lock are still caught by the
//! [`Fingerprint`] re-check before commit.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MailboxError;

#[derive(Debug)]
pub struct MailboxLock {
    path: PathBuf,
    token: String,
}

impl MailboxLock {
    pub fn lock_path(mailbox_path: &Path) -> PathBuf {
        let mut name = mailbox_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        mailbox_path.with_file_name(name)
    }

    /// Take the lock for `mailbox_path`, retrying every `retry` until `timeout`.
    ///
    /// A lock file older than `stale_after` is reclaimed and acquisition
    /// retried. Times out with `Conflict`. A missing mailbox directory is
    /// `NotFound`; the lock never creates directories.
    pub fn acquire(
        mailbox_path: &Path,
        timeout: Duration,
        retry: Duration,
        stale_after: Duration,
    ) -> Result<Self, MailboxError> {
        let path = Self::lock_path(mailbox_path);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write_owner(&mut file, &token)?;
                    debug!(lock = %path.display(), "mailbox lock acquired");
                    return Ok(Self { path, token });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(observed) = stale_contents(&path, stale_after) {
                        warn!(lock = %path.display(), "reclaiming stale mailbox lock");
                        reclaim_stale(&path, &observed)?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        debug!(lock = %path.display(), "mailbox lock timed out");
                        return Err(MailboxError::Conflict(mailbox_path.to_path_buf()));
                    }
                    thread::sleep(retry);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(MailboxError::NotFound(mailbox_path.to_path_buf()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_held(&self) -> io::Result<bool> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(owner_token(&contents) == Some(self.token.as_str()))
    }
}

impl Drop for MailboxLock {
    fn drop(&mut self) {
        match self.is_held() {
            Ok(true) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(lock = %self.path.display(), "cannot remove mailbox lock: {}", e);
                }
            }
            Ok(false) => {
                warn!(lock = %self.path.display(), "mailbox lock was taken over, leaving it");
            }
            Err(e) => {
                warn!(lock = %self.path.display(), "cannot read mailbox lock: {}", e);
            }
        }
    }
}

fn write_owner(file: &mut File, token: &str) -> io::Result<()> {
    writeln!(file, "{} {} {}", std::process::id(), token, Utc::now().to_rfc3339())?;
    file.sync_all()
}

/// Lock file layout: `<pid> <token> <rfc3339 time>`.
fn owner_token(contents: &str) -> Option<&str> {
    contents.split_whitespace().nth(1)
}

/// Contents of the lock at `path` if it is older than `stale_after`. Read
/// before the age check, so a lock replaced in between never matches.
fn stale_contents(path: &Path, stale_after: Duration) -> Option<Vec<u8>> {
    let contents = fs::read(path).ok()?;
    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    (age > stale_after).then_some(contents)
}

/// Move the lock aside and unlink it if it still holds `observed`. A lock
/// that turns out to be a newer one is linked back in place. Returns whether
/// the stale lock was removed.
fn reclaim_stale(path: &Path, observed: &[u8]) -> Result<bool, MailboxError> {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".stale-{}", Uuid::new_v4().simple()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    let taken = fs::read(&aside).unwrap_or_default();
    let removed = taken == observed;
    if !removed {
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => warn!(lock = %path.display(), "cannot restore mailbox lock: {}", e),
        }
    }
    fs::remove_file(&aside)?;
    Ok(removed)
}

// ── Fingerprint ─────────────────────────────────────────────────────────────

/// Content hash of a mailbox file as it was when loaded; `None` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(Option<blake3::Hash>);

impl Fingerprint {
    pub fn absent() -> Self {
        Fingerprint(None)
    }

    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(Some(blake3::hash(bytes)))
    }

    pub fn current(path: &Path) -> Result<Self, MailboxError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self::of(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::absent()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail with `Conflict` if the file no longer matches this fingerprint.
    pub fn ensure_unchanged(&self, path: &Path) -> Result<(), MailboxError> {
        if Self::current(path)? != *self {
            warn!(path = %path.display(), "mailbox modified outside the lock");
            return Err(MailboxError::Conflict(path.to_path_buf()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FAST: Duration = Duration::from_millis(5);

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let mailbox = dir.path().join("alice.json");
        let held = MailboxLock::acquire(&mailbox, FAST, FAST, Duration::from_secs(60)).unwrap();
        assert!(dir.path().join("alice.json.lock").exists());

        let err = MailboxLock::acquire(&mailbox, Duration::from_millis(30), FAST, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, MailboxError::Conflict(_)));

        drop(held);
        assert!(!dir.path().join("alice.json.lock").exists());
        MailboxLock::acquire(&mailbox, FAST, FAST, Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let mailbox = dir.path().join("bob.json");
        fs::write(MailboxLock::lock_path(&mailbox), b"4242 crashed").unwrap();
        thread::sleep(Duration::from_millis(50));
        let lock = MailboxLock::acquire(&mailbox, FAST, FAST, Duration::from_millis(10)).unwrap();
        assert!(lock.is_held().unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn reclaim_puts_back_a_lock_that_changed_hands() {
        let dir = tempdir().unwrap();
        let lock = MailboxLock::lock_path(&dir.path().join("erin.json"));
        fs::write(&lock, b"7 fresh-token 2024-05-01T12:00:00+00:00\n").unwrap();

        assert!(!reclaim_stale(&lock, b"4242 crashed").unwrap());
        assert_eq!(
            fs::read_to_string(&lock).unwrap(),
            "7 fresh-token 2024-05-01T12:00:00+00:00\n"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(reclaim_stale(&lock, b"7 fresh-token 2024-05-01T12:00:00+00:00\n").unwrap());
        assert!(!lock.exists());
    }

    #[test]
    fn drop_leaves_a_lock_owned_by_someone_else() {
        let dir = tempdir().unwrap();
        let mailbox = dir.path().join("dave.json");
        let held = MailboxLock::acquire(&mailbox, FAST, FAST, Duration::from_secs(60)).unwrap();
        let lock_path = MailboxLock::lock_path(&mailbox);
        fs::write(&lock_path, b"99 another-token 2024-05-01T12:00:00+00:00\n").unwrap();

        drop(held);
        assert!(lock_path.exists());
    }

    #[test]
    fn missing_directory_is_not_found_and_not_created() {
        let dir = tempdir().unwrap();
        let mailbox = dir.path().join("absent").join("frank.json");
        let err = MailboxLock::acquire(&mailbox, FAST, FAST, Duration::from_secs(60)).unwrap_err();
        assert!(err.is_not_found());
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn fingerprint_detects_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("carol.json");
        let absent = Fingerprint::current(&path).unwrap();
        assert_eq!(absent, Fingerprint::absent());
        absent.ensure_unchanged(&path).unwrap();

        fs::write(&path, b"{\"version\":1}").unwrap();
        assert!(matches!(
            absent.ensure_unchanged(&path),
            Err(MailboxError::Conflict(_))
        ));

        let loaded = Fingerprint::current(&path).unwrap();
        loaded.ensure_unchanged(&path).unwrap();
        fs::write(&path, b"{\"version\":2}").unwrap();
        assert!(loaded.ensure_unchanged(&path).is_err());
    }
}
