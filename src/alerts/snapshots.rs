// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! On-disk alert snapshots with count and age pruning

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Priority;
use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::sensors::Frame;

const EXTENSION: &str = "pgm";

/// A snapshot file on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Directory of PGM snapshots, one per dispatched alert
pub struct SnapshotStore {
    dir: PathBuf,
    max_snapshots: usize,
    retention: Duration,
    // Serializes save and prune so the count cap holds
    write: Mutex<()>,
}

impl SnapshotStore {
    /// Create the directory and drop anything already past retention
    pub fn open(dir: impl Into<PathBuf>, config: &SnapshotConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            max_snapshots: config.max_snapshots.max(1),
            retention: Duration::from_secs(u64::from(config.retention_days) * 86_400),
            write: Mutex::new(()),
        };
        let removed = store.prune()?;
        info!("Snapshot store at {:?} ({} stale files removed)", store.dir, removed);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the frame as `snapshot_<time>_<priority>_<event>.pgm`, then enforce the cap
    pub fn save(&self, frame: &Frame, priority: Priority, event_id: &str, at: DateTime<Utc>) -> Result<PathBuf> {
        let name = format!(
            "snapshot_{}_{}_{}.{}",
            at.format("%Y%m%d_%H%M%S_%3f"),
            priority.to_string().to_lowercase(),
            event_id,
            EXTENSION
        );
        let path = self.dir.join(name);

        let _guard = self.write.lock();
        std::fs::write(&path, frame.to_pgm())?;
        self.prune_locked(SystemTime::now())?;
        Ok(path)
    }

    /// Newest first
    pub fn list(&self) -> Result<Vec<StoredSnapshot>> {
        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            snapshots.push(StoredSnapshot {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                modified: DateTime::<Utc>::from(meta.modified()?),
                size_bytes: meta.len(),
            });
        }
        snapshots.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<StoredSnapshot>> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Apply age and count limits; returns the number of files removed
    pub fn prune(&self) -> Result<usize> {
        self.prune_at(SystemTime::now())
    }

    pub fn prune_at(&self, now: SystemTime) -> Result<usize> {
        let _guard = self.write.lock();
        self.prune_locked(now)
    }

    fn prune_locked(&self, now: SystemTime) -> Result<usize> {
        let cutoff = DateTime::<Utc>::from(now.checked_sub(self.retention).unwrap_or(SystemTime::UNIX_EPOCH));
        let mut removed = 0;

        for (index, snapshot) in self.list()?.into_iter().enumerate() {
            if index >= self.max_snapshots || snapshot.modified < cutoff {
                std::fs::remove_file(&snapshot.path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Pruned {} snapshots", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn store(dir: &Path, max_snapshots: usize) -> SnapshotStore {
        let config = SnapshotConfig {
            max_snapshots,
            ..SnapshotConfig::default()
        };
        SnapshotStore::open(dir, &config).unwrap()
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, Array2::from_elem((6, 8), 90u8))
    }

    #[test]
    fn test_save_writes_pgm() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 10);

        let path = store
            .save(&frame(1), Priority::Critical, "evt-1", Utc::now())
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("snapshot_"));
        assert!(name.ends_with("_critical_evt-1.pgm"));

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5\n8 6\n255\n"));
        assert_eq!(store.latest().unwrap().unwrap().path, path);
    }

    #[test]
    fn test_count_cap_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 3);
        let t0 = Utc::now();

        for i in 0..5 {
            let at = t0 + chrono::Duration::seconds(i);
            store.save(&frame(i as u64), Priority::Low, &format!("e{}", i), at).unwrap();
        }

        let names: Vec<_> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 3);
        assert!(!names.iter().any(|n| n.contains("_e0.") || n.contains("_e1.")));
    }

    #[test]
    fn test_age_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 10);
        store.save(&frame(0), Priority::High, "old", Utc::now()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(store.prune_at(SystemTime::now()).unwrap(), 0);
        let later = SystemTime::now() + Duration::from_secs(8 * 86_400);
        assert_eq!(store.prune_at(later).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
    }
}
