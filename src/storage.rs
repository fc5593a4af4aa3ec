use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Durable key-value slots, the page's `localStorage`.
pub trait Storage: fmt::Debug {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&mut self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: &[(&str, &str)]) -> Self {
        Self {
            entries: items
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Storage backed by a JSON object on disk. Every write rewrites the file,
/// so the slot survives a restart of the page.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "storage file is unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_back(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    Error::Storage(format!("failed to create {}: {err}", parent.display()))
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.entries)
            .map_err(|err| Error::Storage(err.to_string()))?;
        fs::write(&self.path, raw)
            .map_err(|err| Error::Storage(format!("failed to write {}: {err}", self.path.display())))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.write_back()
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.write_back()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_set_get_remove() -> Result<()> {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k"), None);
        storage.set_item("k", "v")?;
        assert_eq!(storage.get_item("k").as_deref(), Some("v"));
        storage.remove_item("k")?;
        assert!(storage.is_empty());
        Ok(())
    }

    #[test]
    fn file_storage_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|err| Error::Storage(err.to_string()))?;
        let path = dir.path().join("nested").join("storage.json");

        let mut storage = FileStorage::open(&path)?;
        storage.set_item("shoppingCart", "[]")?;
        storage.set_item("other", "1")?;
        storage.remove_item("other")?;

        let reopened = FileStorage::open(&path)?;
        assert_eq!(reopened.get_item("shoppingCart").as_deref(), Some("[]"));
        assert_eq!(reopened.get_item("other"), None);
        Ok(())
    }

    #[test]
    fn file_storage_with_garbage_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|err| Error::Storage(err.to_string()))?;
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").map_err(|err| Error::Storage(err.to_string()))?;

        let storage = FileStorage::open(&path)?;
        assert_eq!(storage.get_item("shoppingCart"), None);
        Ok(())
    }
}
