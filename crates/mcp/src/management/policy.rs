use std::str::FromStr;

use tether_types::{GalleryMcpServer, InstallableMcpServer, MarkdownString};
use thiserror::Error;

/// Something a caller is about to install.
#[derive(Debug, Clone, Copy)]
pub enum InstallCandidate<'a> {
    Gallery(&'a GalleryMcpServer),
    Local(&'a InstallableMcpServer),
}

impl InstallCandidate<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Gallery(server) => &server.name,
            Self::Local(server) => &server.name,
        }
    }
}

/// Outcome of an installability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanInstall {
    Allowed,
    /// Installation is blocked; the reason is meant for display.
    Blocked(MarkdownString),
}

impl CanInstall {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decides which servers may be installed. Advisory: installs do not re-check.
pub trait AllowedMcpServersPolicy: Send + Sync {
    fn is_allowed(&self, candidate: &InstallCandidate<'_>) -> CanInstall;
}

/// Which servers a user may install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum McpAccessLevel {
    /// Nothing.
    None,
    /// Only servers published in the gallery.
    Registry,
    #[default]
    All,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown MCP access level '{0}' (expected none, registry or all)")]
pub struct UnknownAccessLevel(pub String);

impl FromStr for McpAccessLevel {
    type Err = UnknownAccessLevel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "registry" | "gallery" => Ok(Self::Registry),
            "all" | "on" => Ok(Self::All),
            _ => Err(UnknownAccessLevel(value.to_string())),
        }
    }
}

/// Policy driven by a single [`McpAccessLevel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLevelPolicy {
    level: McpAccessLevel,
}

impl AccessLevelPolicy {
    pub fn new(level: McpAccessLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> McpAccessLevel {
        self.level
    }
}

impl AllowedMcpServersPolicy for AccessLevelPolicy {
    fn is_allowed(&self, candidate: &InstallCandidate<'_>) -> CanInstall {
        match (self.level, candidate) {
            (McpAccessLevel::All, _) | (McpAccessLevel::Registry, InstallCandidate::Gallery(_)) => CanInstall::Allowed,
            (McpAccessLevel::None, _) => CanInstall::Blocked(MarkdownString::new(format!(
                "Installing MCP servers is disabled, so `{}` cannot be installed. Set `TETHER_MCP_ACCESS` to `registry` or `all` to allow it.",
                candidate.name()
            ))),
            (McpAccessLevel::Registry, InstallCandidate::Local(_)) => CanInstall::Blocked(MarkdownString::new(format!(
                "Only MCP servers from the gallery may be installed, and `{}` is not one. Set `TETHER_MCP_ACCESS` to `all` to allow it.",
                candidate.name()
            ))),
        }
    }
}
