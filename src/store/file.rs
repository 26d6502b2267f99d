use crate::error::StoreError;
use crate::store::memory::{MemoryStore, Workbook};
use crate::store::{CellRange, CollectionMeta, Grid, StructuralEdit, TabularStore, ValueWrite};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    memory: MemoryStore,
    _lock: File,
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        lock.try_lock_exclusive()
            .with_context(|| format!("workbook is locked by another process: {}", path.display()))?;

        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let workbook: Workbook = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse workbook {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            memory: MemoryStore::new(workbook),
            _lock: lock,
        })
    }

    fn persist(&self, op: &str) -> Result<(), StoreError> {
        let workbook = self.memory.workbook();
        let data = serde_json::to_string_pretty(&workbook)
            .map_err(|err| StoreError::permanent(op, format!("serialize workbook: {err}")))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let io_err = |err: std::io::Error| {
            StoreError::permanent(op, format!("persist {}: {err}", self.path.display()))
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(data.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;
        let stats = self.memory.stats();
        tracing::debug!(
            op,
            path = %self.path.display(),
            reads = stats.reads,
            value_writes = stats.value_writes,
            edit_batches = stats.edit_batches,
            copies = stats.copies,
            deletes = stats.deletes,
            "workbook persisted"
        );
        Ok(())
    }
}

impl TabularStore for FileStore {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        self.memory.collections()
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        self.memory.read_range(range)
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        self.memory.write_values(writes)?;
        self.persist("write-values")
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        self.memory.apply_edits(edits)?;
        self.persist("apply-edits")
    }
}
