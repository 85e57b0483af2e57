use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use url::Url;

use super::{DeleteOptions, FileChange, FileChangeKind, FileChangesEvent, FileError, FileService, WatchRegistration};

/// [`FileService`] over the local disk, for `file://` URLs.
#[derive(Debug, Clone)]
pub struct DiskFileService {
    changes: broadcast::Sender<FileChangesEvent>,
}

impl DiskFileService {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(64);
        Self { changes }
    }
}

impl Default for DiskFileService {
    fn default() -> Self {
        Self::new()
    }
}

fn to_path(resource: &Url) -> Result<PathBuf, FileError> {
    if resource.scheme() != "file" {
        return Err(FileError::UnsupportedScheme { resource: resource.clone() });
    }
    resource
        .to_file_path()
        .map_err(|_| FileError::UnsupportedScheme { resource: resource.clone() })
}

fn change_kind(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Added),
        EventKind::Modify(_) => Some(FileChangeKind::Updated),
        EventKind::Remove(_) => Some(FileChangeKind::Deleted),
        _ => None,
    }
}

fn to_event(event: notify::Event) -> Option<FileChangesEvent> {
    let kind = change_kind(&event.kind)?;
    let changes: Vec<FileChange> = event
        .paths
        .iter()
        .filter_map(|path| Url::from_file_path(path).ok())
        .map(|resource| FileChange { resource, kind })
        .collect();
    if changes.is_empty() { None } else { Some(FileChangesEvent { changes }) }
}

#[async_trait]
impl FileService for DiskFileService {
    async fn read_file(&self, resource: &Url) -> Result<Vec<u8>, FileError> {
        let path = to_path(resource)?;
        tokio::fs::read(&path).await.map_err(|e| FileError::io(resource, e))
    }

    async fn write_file(&self, resource: &Url, contents: &[u8]) -> Result<(), FileError> {
        let path = to_path(resource)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| FileError::io(resource, e))?;
        }
        tokio::fs::write(&path, contents).await.map_err(|e| FileError::io(resource, e))
    }

    async fn exists(&self, resource: &Url) -> Result<bool, FileError> {
        let path = to_path(resource)?;
        tokio::fs::try_exists(&path).await.map_err(|e| FileError::io(resource, e))
    }

    async fn del(&self, resource: &Url, options: DeleteOptions) -> Result<(), FileError> {
        let path = to_path(resource)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| FileError::io(resource, e))?;
        let result = if metadata.is_dir() {
            if options.recursive {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_dir(&path).await
            }
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| FileError::io(resource, e))
    }

    fn watch(&self, resource: &Url) -> Result<WatchRegistration, FileError> {
        let path = to_path(resource)?;
        // The file itself may not exist yet, so watch the folder holding it.
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        std::fs::create_dir_all(&folder).map_err(|e| FileError::io(resource, e))?;

        let changes = self.changes.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                if let Some(event) = to_event(event) {
                    let _ = changes.send(event);
                }
            }
            Err(error) => tracing::warn!(error = %error, "File watcher error"),
        })
        .map_err(|e| FileError::Watch {
            resource: resource.clone(),
            reason: e.to_string(),
        })?;

        watcher.watch(&folder, RecursiveMode::NonRecursive).map_err(|e| FileError::Watch {
            resource: resource.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(resource = %resource, folder = %folder.display(), "Watching resource");
        Ok(WatchRegistration::new(watcher))
    }

    fn on_did_files_change(&self) -> broadcast::Receiver<FileChangesEvent> {
        self.changes.subscribe()
    }
}
