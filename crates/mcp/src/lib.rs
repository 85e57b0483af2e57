//! MCP server management core for Tether.
//!
//! This crate keeps the set of installed MCP servers for each configuration
//! resource in sync with what is persisted on disk, installs servers from raw
//! definitions or from a gallery, and exposes the whole surface over a
//! URI-rewriting channel so another process can drive it.

pub mod channel;
pub mod config;
pub mod events;
pub mod files;
pub mod gallery;
pub mod management;
pub mod resource;
pub mod scanner;
pub mod synthesizer;
pub mod types;

pub use channel::{ChannelError, McpManagementChannel, McpManagementChannelClient};
pub use config::{ManagementSettings, SettingsError};
pub use events::ManagementEvents;
pub use files::{DiskFileService, FileError, FileService, InMemoryFileService};
pub use gallery::{GalleryError, McpGalleryClient, McpGalleryService};
pub use management::{AccessLevelPolicy, McpAccessLevel, McpManagementService, McpManager, StaticProfileResolver};
pub use resource::{GalleryResourceEngine, McpResourceEngine};
pub use scanner::{JsonResourceScanner, McpResourceScanner, ScanError};
pub use synthesizer::{SynthesisError, SynthesizedLaunchConfig, synthesize_launch_config};
pub use types::McpManagementError;
