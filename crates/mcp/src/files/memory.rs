use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use super::{DeleteOptions, FileChange, FileChangeKind, FileChangesEvent, FileError, FileService, WatchRegistration};

/// [`FileService`] keeping every file in memory.
///
/// Folders are implicit: a URL "exists" as a folder when any stored file lives
/// under it. Every write and delete is published on `on_did_files_change`,
/// whether or not the resource is watched.
#[derive(Debug)]
pub struct InMemoryFileService {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    changes: broadcast::Sender<FileChangesEvent>,
}

impl InMemoryFileService {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(64);
        Self {
            files: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn folder_prefix(resource: &Url) -> String {
        format!("{}/", resource.as_str().trim_end_matches('/'))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, changes: Vec<FileChange>) {
        if !changes.is_empty() {
            let _ = self.changes.send(FileChangesEvent { changes });
        }
    }

    /// Lists every stored file URL, in order.
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

impl Default for InMemoryFileService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileService for InMemoryFileService {
    async fn read_file(&self, resource: &Url) -> Result<Vec<u8>, FileError> {
        self.lock()
            .get(resource.as_str())
            .cloned()
            .ok_or_else(|| FileError::NotFound { resource: resource.clone() })
    }

    async fn write_file(&self, resource: &Url, contents: &[u8]) -> Result<(), FileError> {
        let previous = self.lock().insert(resource.to_string(), contents.to_vec());
        let kind = if previous.is_some() { FileChangeKind::Updated } else { FileChangeKind::Added };
        self.publish(vec![FileChange {
            resource: resource.clone(),
            kind,
        }]);
        Ok(())
    }

    async fn exists(&self, resource: &Url) -> Result<bool, FileError> {
        let prefix = Self::folder_prefix(resource);
        let files = self.lock();
        Ok(files.contains_key(resource.as_str()) || files.keys().any(|key| key.starts_with(&prefix)))
    }

    async fn del(&self, resource: &Url, options: DeleteOptions) -> Result<(), FileError> {
        let prefix = Self::folder_prefix(resource);
        let removed: Vec<String> = {
            let mut files = self.lock();
            let nested: Vec<String> = files.keys().filter(|key| key.starts_with(&prefix)).cloned().collect();
            if !nested.is_empty() && !options.recursive {
                return Err(FileError::Io {
                    resource: resource.clone(),
                    source: std::io::Error::other("folder is not empty"),
                });
            }
            let mut removed = Vec::new();
            if files.remove(resource.as_str()).is_some() {
                removed.push(resource.to_string());
            }
            for key in nested {
                files.remove(&key);
                removed.push(key);
            }
            removed
        };

        if removed.is_empty() {
            return Err(FileError::NotFound { resource: resource.clone() });
        }
        let mut changes: Vec<FileChange> = removed
            .iter()
            .filter_map(|key| Url::parse(key).ok())
            .map(|resource| FileChange {
                resource,
                kind: FileChangeKind::Deleted,
            })
            .collect();
        if !changes.iter().any(|change| change.resource == *resource) {
            changes.push(FileChange {
                resource: resource.clone(),
                kind: FileChangeKind::Deleted,
            });
        }
        self.publish(changes);
        Ok(())
    }

    fn watch(&self, _resource: &Url) -> Result<WatchRegistration, FileError> {
        Ok(WatchRegistration::none())
    }

    fn on_did_files_change(&self) -> broadcast::Receiver<FileChangesEvent> {
        self.changes.subscribe()
    }
}
