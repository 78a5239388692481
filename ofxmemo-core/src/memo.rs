//! Persisted memo store: a JSON array of memo records keyed by FITID.
//!
//! The store is read, modified and written back as a whole on every
//! operation. There is no locking; concurrent writers race and the last
//! one wins.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OfxError, Result};

pub const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoRecord {
    /// Account of the statement holding the transaction, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accountid: Option<String>,
    pub fitid: String,
    /// Unix seconds of the first time this FITID was annotated.
    pub datetime: i64,
    /// Absolute path of the file the memo was first written into.
    pub filename: String,
    pub memo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
pub struct MemoStore {
    path: PathBuf,
    records: Vec<MemoRecord>,
}

impl MemoStore {
    /// Open a store. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                records: Vec::new(),
            });
        }
        let s = fs::read_to_string(&path).map_err(|e| OfxError::io(&path, e))?;
        let records = if s.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&s).map_err(|source| OfxError::MemoStore {
                path: path.clone(),
                source,
            })?
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[MemoRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record, or replace the memo text of the first record with
    /// the same FITID. Timestamps and file names of existing records stay.
    pub fn upsert(&mut self, record: MemoRecord) -> Upsert {
        match self.records.iter_mut().find(|r| r.fitid == record.fitid) {
            Some(existing) => {
                existing.memo = record.memo;
                Upsert::Updated
            }
            None => {
                self.records.push(record);
                Upsert::Inserted
            }
        }
    }

    /// Drop records older than `retain_days` as of `now` (unix seconds).
    /// Returns how many were removed.
    pub fn prune(&mut self, retain_days: i64, now: i64) -> usize {
        let max_age = retain_days.saturating_mul(SECONDS_PER_DAY);
        let before = self.records.len();
        self.records
            .retain(|r| now.saturating_sub(r.datetime) <= max_age);
        before - self.records.len()
    }

    /// Write the whole store back to its file.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.records).map_err(|source| OfxError::MemoStore {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!(path = %self.path.display(), records = self.records.len(), "memo store saved");
        Ok(())
    }
}

/// Replace `path` with `contents` in one rename so readers never see a
/// partially written file.
///
/// Symlinks are followed, so the link target is replaced and the link
/// survives. An existing file keeps its permissions.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(OfxError::io(path, e)),
    };
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = fs::write(&tmp, contents)
        .and_then(|()| match fs::metadata(&target) {
            Ok(meta) => fs::set_permissions(&tmp, meta.permissions()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .map_err(|e| OfxError::io(&tmp, e))
        .and_then(|()| fs::rename(&tmp, &target).map_err(|e| OfxError::io(&target, e)));

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fitid: &str, datetime: i64, memo: &str) -> MemoRecord {
        MemoRecord {
            accountid: None,
            fitid: fitid.into(),
            datetime,
            filename: "/tmp/data.ofx".into(),
            memo: memo.into(),
        }
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoStore::open(dir.path().join("memodb.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_by_fitid() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoStore::open(dir.path().join("memodb.json")).unwrap();
        assert_eq!(store.upsert(record("1", 100, "first")), Upsert::Inserted);
        assert_eq!(store.upsert(record("2", 100, "other")), Upsert::Inserted);
        assert_eq!(store.upsert(record("1", 999, "second")), Upsert::Updated);

        assert_eq!(store.len(), 2);
        assert_eq!(store.records()[0].memo, "second");
        assert_eq!(store.records()[0].datetime, 100);
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memodb.json");
        let mut store = MemoStore::open(&path).unwrap();
        let mut with_account = record("1", 100, "rent");
        with_account.accountid = Some("12345678".into());
        store.upsert(with_account.clone());
        store.upsert(record("2", 200, "food"));
        store.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with('['));
        assert!(!raw.contains(r#""accountid":null"#));

        let reopened = MemoStore::open(&path).unwrap();
        assert_eq!(reopened.records()[0], with_account);
        assert_eq!(reopened.records()[1].accountid, None);
        assert!(!dir.path().join("memodb.json.tmp").exists());
    }

    #[test]
    fn test_prune_boundary() {
        let now = 1_700_000_000;
        let retain = 30;
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoStore::open(dir.path().join("memodb.json")).unwrap();
        store.upsert(record("old", now - (retain + 1) * SECONDS_PER_DAY, "a"));
        store.upsert(record("young", now - (retain - 1) * SECONDS_PER_DAY, "b"));
        store.upsert(record("edge", now - retain * SECONDS_PER_DAY, "c"));

        assert_eq!(store.prune(retain, now), 1);
        let left: Vec<_> = store.records().iter().map(|r| r.fitid.as_str()).collect();
        assert_eq!(left, vec!["young", "edge"]);
    }

    #[test]
    fn test_prune_huge_retention_keeps_everything() {
        let now = 1_700_000_000;
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoStore::open(dir.path().join("memodb.json")).unwrap();
        store.upsert(record("fresh", now - 10, "a"));
        store.upsert(record("ancient", i64::MIN, "b"));

        assert_eq!(store.prune(i64::MAX / SECONDS_PER_DAY + 1, now), 0);
        assert_eq!(store.prune(i64::MAX, now), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_write_atomic_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.ofx");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!dir.path().join("fresh.ofx.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_follows_symlink_and_keeps_mode() {
        use std::os::unix::fs::{PermissionsExt, symlink};

        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.ofx");
        let link = dir.path().join("link.ofx");
        std::fs::write(&real, "old").unwrap();
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(0o600)).unwrap();
        symlink(&real, &link).unwrap();

        write_atomic(&link, b"new").unwrap();

        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read(&real).unwrap(), b"new");
        let mode = std::fs::metadata(&real).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_atomic_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        // renaming a file over a non-empty directory fails
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inner"), "x").unwrap();

        let err = write_atomic(&target, b"data").unwrap_err();
        assert!(matches!(err, OfxError::Io { .. }));
        assert!(!dir.path().join("occupied.tmp").exists());
    }

    #[test]
    fn test_corrupt_store_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memodb.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(matches!(
            MemoStore::open(&path),
            Err(OfxError::MemoStore { .. })
        ));
    }
}
