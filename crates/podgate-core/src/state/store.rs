use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::record::{DeviceStateRecord, StateLogEntry};
use crate::error::StoreError;

pub const DEFAULT_DATA_SUFFIX: &str = ".json";
pub const DEFAULT_LOG_SUFFIX: &str = ".log";
const ARCHIVE_STAMP_FORMAT: &str = "_%Y%m%d_%H%M%S";
const ARCHIVE_STAMP_LEN: usize = "_YYYYmmdd_HHMMSS".len();

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchivedPair {
    pub data: PathBuf,
    pub log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
    data_suffix: String,
    log_suffix: String,
}

impl StateStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_suffixes(base, DEFAULT_DATA_SUFFIX, DEFAULT_LOG_SUFFIX)
    }

    pub fn with_suffixes(
        base: impl Into<PathBuf>,
        data_suffix: impl Into<String>,
        log_suffix: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            data_suffix: data_suffix.into(),
            log_suffix: log_suffix.into(),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        join_name(&self.base, "", &self.data_suffix)
    }

    pub fn log_path(&self) -> PathBuf {
        join_name(&self.base, "", &self.log_suffix)
    }

    pub fn has_current(&self) -> bool {
        self.data_path().exists() || self.log_path().exists()
    }

    pub fn load(&self) -> Option<DeviceStateRecord> {
        let path = self.data_path();
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read device state");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "device state is corrupt, treating as absent");
                None
            }
        }
    }

    pub fn save(&self, record: &DeviceStateRecord, event: &str) -> Result<(), StoreError> {
        let data_path = self.data_path();
        if let Some(parent) = data_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(record)?;
        let tmp_path = sibling_path(&data_path, "tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &data_path)?;

        let entry = StateLogEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            record: record.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(log, "{}", line)?;
        debug!(event, "saved device state");
        Ok(())
    }

    pub fn archive(&self) -> Result<Option<ArchivedPair>, StoreError> {
        self.archive_at(Utc::now())
    }

    /// Renames the current pair to `<base>_YYYYmmdd_HHMMSS<suffix>`. A taken
    /// name gets a `_N` counter rather than being overwritten. If the second
    /// rename fails the first one is undone, so a pair never splits.
    pub fn archive_at(&self, now: DateTime<Utc>) -> Result<Option<ArchivedPair>, StoreError> {
        let data = self.data_path();
        let log = self.log_path();
        let has_data = data.exists();
        let has_log = log.exists();
        if !has_data && !has_log {
            return Ok(None);
        }

        let stamp = now.format(ARCHIVE_STAMP_FORMAT).to_string();
        let mut tag = stamp.clone();
        let mut attempt = 0u32;
        let target = loop {
            let candidate = self.pair_for_tag(&tag);
            if !candidate.data.exists() && !candidate.log.exists() {
                break candidate;
            }
            attempt += 1;
            warn!(
                archive = %candidate.data.display(),
                attempt,
                "archive name already taken within the same second"
            );
            tag = format!("{}_{}", stamp, attempt);
        };

        if has_data {
            fs::rename(&data, &target.data)?;
        }
        if has_log {
            if let Err(err) = fs::rename(&log, &target.log) {
                if has_data {
                    if let Err(rollback) = fs::rename(&target.data, &data) {
                        error!(
                            archive = %target.data.display(),
                            error = %rollback,
                            "failed to roll back partial archive"
                        );
                    }
                }
                return Err(err.into());
            }
        }

        info!(archive = %target.data.display(), "archived device state");
        Ok(Some(target))
    }

    pub fn list_archives(&self) -> Result<Vec<ArchivedPair>, StoreError> {
        let dir = match self.base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let Some(stem) = self.base.file_name().and_then(|s| s.to_str()) else {
            return Ok(vec![]);
        };
        let prefix = format!("{}_", stem);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut tags = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let tag = rest
                .strip_suffix(self.data_suffix.as_str())
                .or_else(|| rest.strip_suffix(self.log_suffix.as_str()));
            if let Some(tag) = tag {
                if tag.starts_with(|c: char| c.is_ascii_digit()) {
                    tags.insert(format!("_{}", tag));
                }
            }
        }

        let mut tags: Vec<String> = tags.into_iter().collect();
        tags.sort_by(|a, b| archive_order(a).cmp(&archive_order(b)));
        Ok(tags.iter().map(|tag| self.pair_for_tag(tag)).collect())
    }

    fn pair_for_tag(&self, tag: &str) -> ArchivedPair {
        ArchivedPair {
            data: join_name(&self.base, tag, &self.data_suffix),
            log: join_name(&self.base, tag, &self.log_suffix),
        }
    }
}

fn join_name(base: &Path, tag: &str, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(tag);
    name.push(suffix);
    PathBuf::from(name)
}

fn archive_order(tag: &str) -> (&str, u32, &str) {
    let stamp = tag.get(..ARCHIVE_STAMP_LEN).unwrap_or(tag);
    let counter = tag
        .get(ARCHIVE_STAMP_LEN..)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    (stamp, counter, tag)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("state.json");
    path.with_file_name(format!("{}.{}", file_name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> StateStore {
        StateStore::new(tmp.path().join("pod"))
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap()
    }

    #[test]
    fn load_returns_none_without_record() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).load().is_none());
    }

    #[test]
    fn corrupt_record_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        fs::write(store.data_path(), b"{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn save_then_load_and_log_grows() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let record = DeviceStateRecord::new(Some(1), Some(2), Some(0x1f0e89f0));

        store.save(&record, "newpod").unwrap();
        store.save(&record, "status").unwrap();

        assert_eq!(store.load(), Some(record));
        let log = fs::read_to_string(store.log_path()).unwrap();
        let events: Vec<String> = log
            .lines()
            .map(|l| serde_json::from_str::<StateLogEntry>(l).unwrap().event)
            .collect();
        assert_eq!(events, vec!["newpod", "status"]);
        assert!(!sibling_path(&store.data_path(), "tmp").exists());
    }

    #[test]
    fn archive_renames_both_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&DeviceStateRecord::default(), "newpod").unwrap();

        let pair = store.archive_at(fixed_time()).unwrap().unwrap();

        assert_eq!(pair.data, tmp.path().join("pod_20261018_093005.json"));
        assert_eq!(pair.log, tmp.path().join("pod_20261018_093005.log"));
        assert!(pair.data.exists() && pair.log.exists());
        assert!(!store.has_current());
        assert!(store.load().is_none());
    }

    #[test]
    fn archive_without_current_is_noop() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(store(&tmp).archive().unwrap(), None);
    }

    #[test]
    fn same_second_archives_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.save(&DeviceStateRecord::new(Some(1), None, None), "newpod").unwrap();
        let first = store.archive_at(fixed_time()).unwrap().unwrap();
        store.save(&DeviceStateRecord::new(Some(2), None, None), "newpod").unwrap();
        let second = store.archive_at(fixed_time()).unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(second.data, tmp.path().join("pod_20261018_093005_1.json"));
        let archives = store.list_archives().unwrap();
        assert_eq!(archives, vec![first.clone(), second.clone()]);

        let first_record: DeviceStateRecord =
            serde_json::from_str(&fs::read_to_string(&first.data).unwrap()).unwrap();
        assert_eq!(first_record.id_lot, Some(1));
    }

    #[test]
    fn collision_counters_sort_numerically() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let mut archived = Vec::new();
        for lot in 0..12 {
            store.save(&DeviceStateRecord::new(Some(lot), None, None), "newpod").unwrap();
            archived.push(store.archive_at(fixed_time()).unwrap().unwrap());
        }
        store.save(&DeviceStateRecord::default(), "newpod").unwrap();
        let later = store.archive_at(fixed_time() + chrono::Duration::seconds(1)).unwrap().unwrap();
        archived.push(later);

        assert_eq!(archived[10].data, tmp.path().join("pod_20261018_093005_10.json"));
        assert_eq!(store.list_archives().unwrap(), archived);
    }

    #[test]
    fn list_archives_ignores_unrelated_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        fs::write(tmp.path().join("pod_backup.json"), b"{}").unwrap();
        fs::write(tmp.path().join("tokens"), b"").unwrap();
        store.save(&DeviceStateRecord::default(), "newpod").unwrap();

        assert!(store.list_archives().unwrap().is_empty());
    }
}
