//! Metadata store: one JSON sidecar per synthesized virtual file, recording
//! everything the filesystem layer needs to serve reads without re-parsing
//! the source manifest — its segment map, logical size, and encryption.

use std::path::PathBuf;

use crate::errors::ImportError;
use crate::model::{MetadataRecord, VirtualPath};

/// Storage for [`MetadataRecord`]s addressed by virtual path.
///
/// Implementations decide their own on-disk (or otherwise durable) layout;
/// [`JsonFileMetadataStore`] is the reference one, mirroring a metadata
/// directory tree after the virtual filesystem's own directory structure.
pub trait MetadataStore: Send + Sync {
    fn put(&self, virtual_path: &VirtualPath, record: &MetadataRecord) -> Result<(), ImportError>;

    fn get(&self, virtual_path: &VirtualPath) -> Result<Option<MetadataRecord>, ImportError>;

    fn delete(&self, virtual_path: &VirtualPath) -> Result<(), ImportError>;

    /// Lists the virtual paths with metadata directly inside `directory`
    /// (non-recursive), whether that metadata represents a file or a
    /// subdirectory marker.
    fn list_directory(&self, directory: &VirtualPath) -> Result<Vec<VirtualPath>, ImportError>;

    fn directory_exists(&self, directory: &VirtualPath) -> Result<bool, ImportError>;

    /// The on-disk path backing `virtual_path`'s metadata, for callers that
    /// need to reason about storage layout directly (e.g. collision checks).
    fn metadata_file_path(&self, virtual_path: &VirtualPath) -> PathBuf;
}

/// Reference [`MetadataStore`] that mirrors the virtual directory tree under
/// `root`, writing one `<name>.json` file per virtual file.
pub struct JsonFileMetadataStore {
    root: PathBuf,
}

impl JsonFileMetadataStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, virtual_path: &VirtualPath) -> PathBuf {
        let trimmed = virtual_path.trim_start_matches('/');
        let mut path = self.root.join(trimmed).into_os_string();
        path.push(".json");
        PathBuf::from(path)
    }
}

impl MetadataStore for JsonFileMetadataStore {
    fn put(&self, virtual_path: &VirtualPath, record: &MetadataRecord) -> Result<(), ImportError> {
        let path = self.resolve(virtual_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(record).map_err(|e| ImportError::Store(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn get(&self, virtual_path: &VirtualPath) -> Result<Option<MetadataRecord>, ImportError> {
        let path = self.resolve(virtual_path);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let record = serde_json::from_slice(&bytes).map_err(|e| ImportError::Store(e.to_string()))?;
        Ok(Some(record))
    }

    fn delete(&self, virtual_path: &VirtualPath) -> Result<(), ImportError> {
        let path = self.resolve(virtual_path);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_directory(&self, directory: &VirtualPath) -> Result<Vec<VirtualPath>, ImportError> {
        let dir_path = self.root.join(directory.trim_start_matches('/'));
        if !dir_path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().trim_end_matches(".json").to_owned();
            out.push(format!("{}/{name}", directory.trim_end_matches('/')));
        }
        Ok(out)
    }

    fn directory_exists(&self, directory: &VirtualPath) -> Result<bool, ImportError> {
        Ok(self.root.join(directory.trim_start_matches('/')).is_dir())
    }

    fn metadata_file_path(&self, virtual_path: &VirtualPath) -> PathBuf {
        self.resolve(virtual_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Encryption, FileHealth, MessageId, Segment};
    use tempfile::tempdir;

    fn sample_record() -> MetadataRecord {
        MetadataRecord {
            logical_size: 1000,
            source_nzb_path: "release.nzb".into(),
            status: FileHealth::Healthy,
            segments: vec![Segment::whole(MessageId::from("a"), 1000)],
            encryption: Encryption::None,
            password: None,
            salt: None,
            release_date_unix: 0,
            extracted_files_hint: None,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        let path: VirtualPath = "/Movies/Movie.Title.2023/Movie.Title.2023.mkv".into();

        store.put(&path, &sample_record()).unwrap();
        let fetched = store.get(&path).unwrap().expect("record present");
        assert_eq!(fetched.logical_size, 1000);
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        assert!(store.get(&"/nope.mkv".to_owned()).unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        let path: VirtualPath = "/a.mkv".into();
        store.put(&path, &sample_record()).unwrap();
        store.delete(&path).unwrap();
        store.delete(&path).unwrap();
        assert!(store.get(&path).unwrap().is_none());
    }
}
