//! File system collaborator.
//!
//! Engines never touch the disk directly: every read, write, delete and watch
//! goes through a [`FileService`], addressed by URL. [`DiskFileService`] backs
//! `file://` URLs with tokio and `notify`; [`InMemoryFileService`] keeps
//! everything in a map and is what the tests run against.

mod disk;
mod memory;

use std::any::Any;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

pub use disk::DiskFileService;
pub use memory::InMemoryFileService;

/// Errors surfaced by a [`FileService`].
#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found: {resource}")]
    NotFound { resource: Url },

    #[error("I/O error on {resource}: {source}")]
    Io {
        resource: Url,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported scheme for {resource}")]
    UnsupportedScheme { resource: Url },

    #[error("Failed to watch {resource}: {reason}")]
    Watch { resource: Url, reason: String },
}

impl FileError {
    pub fn io(resource: &Url, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { resource: resource.clone() };
        }
        Self::Io {
            resource: resource.clone(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Kind of change observed on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub resource: Url,
    pub kind: FileChangeKind,
}

/// A batch of changes delivered by `on_did_files_change`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChangesEvent {
    pub changes: Vec<FileChange>,
}

impl FileChangesEvent {
    /// True when any change touches `resource` itself or a folder containing it.
    pub fn affects(&self, resource: &Url) -> bool {
        self.changes.iter().any(|change| {
            if change.resource == *resource {
                return true;
            }
            let folder = format!("{}/", change.resource.as_str().trim_end_matches('/'));
            resource.as_str().starts_with(&folder)
        })
    }
}

/// Options for [`FileService::del`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
}

/// Keeps a watch alive until dropped.
#[derive(Default)]
pub struct WatchRegistration {
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchRegistration {
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    /// Registration with nothing to release.
    pub fn none() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WatchRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistration").field("active", &self._guard.is_some()).finish()
    }
}

/// File system operations consumed by the management core.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn read_file(&self, resource: &Url) -> Result<Vec<u8>, FileError>;

    /// Writes `contents`, creating missing parent folders.
    async fn write_file(&self, resource: &Url, contents: &[u8]) -> Result<(), FileError>;

    async fn exists(&self, resource: &Url) -> Result<bool, FileError>;

    async fn del(&self, resource: &Url, options: DeleteOptions) -> Result<(), FileError>;

    /// Starts reporting changes of `resource` through `on_did_files_change`.
    fn watch(&self, resource: &Url) -> Result<WatchRegistration, FileError>;

    fn on_did_files_change(&self) -> broadcast::Receiver<FileChangesEvent>;
}

/// Appends one path segment to a folder URL.
pub fn join_segment(folder: &Url, segment: &str) -> Result<Url, FileError> {
    let mut joined = folder.clone();
    joined
        .path_segments_mut()
        .map_err(|_| FileError::UnsupportedScheme { resource: folder.clone() })?
        .pop_if_empty()
        .push(segment);
    Ok(joined)
}
