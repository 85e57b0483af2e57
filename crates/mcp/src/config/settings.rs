use std::env;
use std::path::PathBuf;

use dirs_next::config_dir;
use tether_util::{expand_tilde, parse_resource_location, path_to_file_url};
use thiserror::Error;
use url::Url;

use crate::management::{McpAccessLevel, UnknownAccessLevel};

pub const MCP_RESOURCE_ENV: &str = "TETHER_MCP_RESOURCE";
pub const CACHE_DIR_ENV: &str = "TETHER_CACHE_DIR";
pub const GALLERY_URL_ENV: &str = "TETHER_GALLERY_URL";
pub const MCP_ACCESS_ENV: &str = "TETHER_MCP_ACCESS";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{variable} is not a valid path or URL: '{value}'")]
    InvalidLocation { variable: &'static str, value: String },

    #[error("TETHER_GALLERY_URL is not a valid URL: {source}")]
    InvalidGalleryUrl {
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    InvalidAccessLevel(#[from] UnknownAccessLevel),
}

/// Where the management core keeps its state and whom it talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementSettings {
    /// Resource used when a caller names none.
    pub mcp_resource: Url,
    /// Root folder of the gallery metadata cache.
    pub cache_dir: PathBuf,
    /// Gallery base URL; relative manifest URLs resolve against it.
    pub gallery_url: Option<Url>,
    pub access: McpAccessLevel,
}

impl ManagementSettings {
    /// Resolves settings from `TETHER_*` overrides, falling back to the user config directory.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mcp_resource = match non_empty_var(MCP_RESOURCE_ENV) {
            Some(value) => parse_resource_location(&value).ok_or(SettingsError::InvalidLocation {
                variable: MCP_RESOURCE_ENV,
                value,
            })?,
            None => {
                let path = default_tether_dir().join("mcp.json");
                path_to_file_url(&path).ok_or_else(|| SettingsError::InvalidLocation {
                    variable: MCP_RESOURCE_ENV,
                    value: path.display().to_string(),
                })?
            }
        };

        let cache_dir = non_empty_var(CACHE_DIR_ENV)
            .map(|value| expand_tilde(&value))
            .unwrap_or_else(|| default_tether_dir().join("mcp-cache"));

        let gallery_url = non_empty_var(GALLERY_URL_ENV)
            .map(|value| Url::parse(value.trim()))
            .transpose()
            .map_err(|source| SettingsError::InvalidGalleryUrl { source })?;

        let access = non_empty_var(MCP_ACCESS_ENV).map(|value| value.parse::<McpAccessLevel>()).transpose()?.unwrap_or_default();

        Ok(Self {
            mcp_resource,
            cache_dir,
            gallery_url,
            access,
        })
    }

    /// The cache folder as a `file://` URL.
    pub fn cache_root(&self) -> Result<Url, SettingsError> {
        path_to_file_url(&self.cache_dir).ok_or_else(|| SettingsError::InvalidLocation {
            variable: CACHE_DIR_ENV,
            value: self.cache_dir.display().to_string(),
        })
    }
}

fn default_tether_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("tether")
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
