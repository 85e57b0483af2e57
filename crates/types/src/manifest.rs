//! Gallery descriptors and the package manifests they point at.
//!
//! A manifest describes how a server is distributed: as one or more packages
//! in package registries (npm, PyPI, Docker, NuGet, ...) and/or as remote
//! HTTP endpoints. Field names follow the registry wire format (snake_case).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Distribution manifest of a gallery server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<McpServerPackage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remotes: Option<Vec<McpServerRemote>>,
}

impl McpServerManifest {
    pub fn packages(&self) -> &[McpServerPackage] {
        self.packages.as_deref().unwrap_or_default()
    }

    pub fn remotes(&self) -> &[McpServerRemote] {
        self.remotes.as_deref().unwrap_or_default()
    }
}

/// One package distribution of a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerPackage {
    /// Registry tag such as `npm`, `pypi`, `docker` or `nuget`.
    pub registry_name: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_arguments: Option<Vec<McpServerArgument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_arguments: Option<Vec<McpServerArgument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<Vec<McpServerKeyValueInput>>,
}

/// Placeholder declared by an argument, header or environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_secret: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

/// Variables keyed by id, in declaration order.
pub type McpServerVariables = IndexMap<String, McpServerVariable>;

/// A command-line argument of a package or of its runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerArgument {
    Positional {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_hint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variables: Option<McpServerVariables>,
    },
    Named {
        /// Flag as written on the command line, e.g. `--port`.
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variables: Option<McpServerVariables>,
    },
}

/// A named value: an environment variable or an HTTP header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerKeyValueInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_secret: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<McpServerVariables>,
}

/// A remote HTTP endpoint of a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerRemote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<McpServerKeyValueInput>>,
}

/// A server as listed by the gallery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryMcpServer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codicon: Option<String>,
    /// Where the manifest can be fetched from.
    pub manifest_url: String,
    /// Where the README can be fetched from, if the server publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_url: Option<String>,
}

/// Gallery metadata cached next to an installed server as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMcpServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<McpServerManifest>,
}

impl LocalMcpServerInfo {
    /// Builds the cache record for a gallery server and its fetched manifest.
    pub fn from_gallery(gallery: &GalleryMcpServer, manifest: McpServerManifest) -> Self {
        Self {
            name: gallery.name.clone(),
            display_name: gallery.display_name.clone(),
            description: gallery.description.clone(),
            version: gallery.version.clone(),
            publisher: gallery.publisher.clone(),
            publisher_display_name: gallery.publisher_display_name.clone(),
            repository_url: gallery.repository_url.clone(),
            icon: gallery.icon.clone(),
            codicon: gallery.codicon.clone(),
            manifest: Some(manifest),
        }
    }
}
