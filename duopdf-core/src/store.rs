use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::annotations::Annotation;
use crate::document::DocumentId;

/// Snapshot of one document's annotations, kept so that an accidental reload
/// does not lose unsaved comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBackup {
    pub document: DocumentId,
    pub display_name: String,
    pub saved_at: String,
    pub annotations: Vec<Annotation>,
}

pub trait BackupStore: Send + Sync {
    fn load(&self, document: DocumentId) -> Result<Option<AnnotationBackup>>;
    fn save(&self, backup: &AnnotationBackup) -> Result<()>;
    fn clear(&self, document: DocumentId) -> Result<()>;
}

pub struct FileBackupStore {
    root: PathBuf,
}

impl FileBackupStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create backup directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn backup_path(&self, document: DocumentId) -> PathBuf {
        self.root.join(format!("{document}.json"))
    }
}

impl BackupStore for FileBackupStore {
    fn load(&self, document: DocumentId) -> Result<Option<AnnotationBackup>> {
        let path = self.backup_path(document);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open backup {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let backup = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode backup {:?}", path))?;
        Ok(Some(backup))
    }

    fn save(&self, backup: &AnnotationBackup) -> Result<()> {
        let path = self.backup_path(backup.document);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(backup)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp backup file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn clear(&self, document: DocumentId) -> Result<()> {
        let path = self.backup_path(document);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove backup {:?}", path))?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBackupStore {
    inner: Mutex<HashMap<DocumentId, AnnotationBackup>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStore for MemoryBackupStore {
    fn load(&self, document: DocumentId) -> Result<Option<AnnotationBackup>> {
        Ok(self.inner.lock().get(&document).cloned())
    }

    fn save(&self, backup: &AnnotationBackup) -> Result<()> {
        self.inner.lock().insert(backup.document, backup.clone());
        Ok(())
    }

    fn clear(&self, document: DocumentId) -> Result<()> {
        self.inner.lock().remove(&document);
        Ok(())
    }
}
