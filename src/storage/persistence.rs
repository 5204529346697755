//! Snapshot persistence for the in-memory store.

use super::memory::{MemoryDatabase, Tables};
use crate::core::{LedgerError, Result, unix_now};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SNAPSHOT_FILE_NAME: &str = "taskledger.snapshot";
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Database Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u32,
    pub tables: Tables,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub row_count: usize,
}

impl DatabaseSnapshot {
    pub fn new(tables: Tables) -> Self {
        let row_count = tables.row_count();
        Self {
            version: SNAPSHOT_VERSION,
            tables,
            metadata: SnapshotMetadata {
                created_at: unix_now(),
                row_count,
            },
        }
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Manager for `taskledger.snapshot` inside `data_dir`.
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join(SNAPSHOT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Writes to a temp file first and renames it over the old snapshot.
    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Persistence(format!("failed to create snapshot directory: {}", e))
            })?;
        }
        let serialized = rmp_serde::to_vec_named(snapshot).map_err(|e| {
            LedgerError::Persistence(format!("failed to serialize snapshot: {}", e))
        })?;

        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file = File::create(&temp_path).map_err(|e| {
            LedgerError::Persistence(format!("failed to create temp file: {}", e))
        })?;
        let mut writer = BufWriter::new(temp_file);
        writer.write_all(&serialized)?;
        writer.flush()?;
        writer.get_mut().sync_all()?;
        fs::rename(&temp_path, &self.snapshot_path).map_err(|e| {
            LedgerError::Persistence(format!("failed to rename snapshot: {}", e))
        })?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: DatabaseSnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            LedgerError::Persistence(format!("failed to deserialize snapshot: {}", e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::Persistence(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

impl MemoryDatabase {
    /// Restores from `manager`'s snapshot, or starts empty when there is none.
    pub fn restore(manager: &SnapshotManager, lock_timeout: Duration) -> Result<Self> {
        let tables = match manager.load()? {
            Some(snapshot) => snapshot.tables,
            None => Tables::default(),
        };
        Ok(Self::from_tables(tables, lock_timeout))
    }

    /// Writes a consistent copy of every table through `manager`.
    pub async fn save_snapshot(&self, manager: &SnapshotManager) -> Result<usize> {
        let snapshot = DatabaseSnapshot::new(self.tables().await);
        let row_count = snapshot.metadata.row_count;
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || manager.save(&snapshot))
            .await
            .map_err(|e| LedgerError::Persistence(format!("snapshot task failed: {}", e)))??;
        Ok(row_count)
    }
}
