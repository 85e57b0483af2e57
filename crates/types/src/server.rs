//! Server definitions as persisted in a resource and as materialized at runtime.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::McpServerManifest;

/// Launch configuration of an MCP server.
///
/// Persisted with a `type` discriminator: `"stdio"` for child-process servers
/// and `"http"` for remote endpoints. The older `"local"`/`"remote"` spellings
/// are accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum McpServerConfig {
    /// A process spawned locally and spoken to over stdio.
    #[serde(rename = "stdio", alias = "local")]
    Local(McpStdioServerConfig),
    /// A remote endpoint spoken to over HTTP.
    #[serde(rename = "http", alias = "remote")]
    Remote(McpRemoteServerConfig),
}

/// Process launch spec for a local server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpStdioServerConfig {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variables set for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<IndexMap<String, String>>,
}

/// HTTP endpoint spec for a remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpRemoteServerConfig {
    /// Endpoint URL.
    pub url: String,
    /// Static headers sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<IndexMap<String, String>>,
}

impl McpServerConfig {
    /// Returns the persisted transport label (`stdio` or `http`).
    pub fn transport_label(&self) -> &'static str {
        match self {
            McpServerConfig::Local(_) => "stdio",
            McpServerConfig::Remote(_) => "http",
        }
    }

    /// Command for local servers, URL for remote ones.
    pub fn command_or_url(&self) -> &str {
        match self {
            McpServerConfig::Local(local) => &local.command,
            McpServerConfig::Remote(remote) => &remote.url,
        }
    }
}

/// Kind of prompt a variable input is resolved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpServerVariableType {
    /// The user picks one of `options`.
    #[serde(rename = "pickString", alias = "pick")]
    Pick,
    /// The user types a free-form value.
    #[serde(rename = "promptString")]
    PromptString,
}

/// A templated value referenced as `{input:<id>}` inside a launch config.
///
/// Produced while synthesizing a config from a gallery manifest and resolved
/// later by a prompting subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerVariableInput {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: McpServerVariableType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// A server as read from (or written to) a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedMcpServer {
    /// Unique key within the resource.
    pub name: String,
    pub config: McpServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Set when the definition was synthesized from a gallery manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<McpServerVariableInput>>,
}

impl ScannedMcpServer {
    pub fn is_gallery(&self) -> bool {
        self.gallery.unwrap_or(false)
    }
}

/// A raw server definition handed to `install`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallableMcpServer {
    pub name: String,
    pub config: McpServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<McpServerVariableInput>>,
}

/// Where a runtime server entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerSource {
    Gallery,
    Local,
}

/// Runtime view of an installed server.
///
/// Rebuilt from scratch on every reconciliation pass and compared structurally,
/// so it is never mutated in place once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMcpServer {
    pub name: String,
    pub config: McpServerConfig,
    /// Resource that lists this server.
    pub mcp_resource: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Directory caching gallery metadata for this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<McpServerManifest>,
    pub source: McpServerSource,
}

impl LocalMcpServer {
    /// Minimal entry with no cached gallery metadata.
    pub fn minimal(scanned: &ScannedMcpServer, mcp_resource: Url) -> Self {
        Self {
            name: scanned.name.clone(),
            config: scanned.config.clone(),
            mcp_resource,
            version: scanned.version.clone(),
            location: None,
            display_name: None,
            description: None,
            publisher: None,
            publisher_display_name: None,
            repository_url: None,
            readme_url: None,
            icon: None,
            codicon: None,
            manifest: None,
            source: if scanned.is_gallery() { McpServerSource::Gallery } else { McpServerSource::Local },
        }
    }
}

/// Options accepted by `install` and `install_from_gallery`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Target resource; the active profile's resource when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_resource: Option<Url>,
    /// Registry to synthesize the launch config from (`npm`, `pypi`, `remote`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
}

/// Options accepted by `uninstall`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_resource: Option<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_with_type_tag() {
        let json = r#"{"type":"stdio","command":"npx","args":["pkg@1.0.0"],"env":{"API_KEY":"{input:key}"}}"#;
        let config: McpServerConfig = serde_json::from_str(json).unwrap();
        let McpServerConfig::Local(local) = &config else {
            panic!("expected a local config");
        };
        assert_eq!(local.command, "npx");
        assert_eq!(local.env.as_ref().unwrap().get("API_KEY").unwrap(), "{input:key}");
        assert_eq!(serde_json::to_string(&config).unwrap(), json);
    }

    #[test]
    fn legacy_type_aliases_are_accepted() {
        let config: McpServerConfig = serde_json::from_str(r#"{"type":"remote","url":"https://mcp.example.com"}"#).unwrap();
        assert_eq!(config.transport_label(), "http");
        assert_eq!(config.command_or_url(), "https://mcp.example.com");
    }

    #[test]
    fn minimal_local_entry_tracks_gallery_flag() {
        let scanned = ScannedMcpServer {
            name: "fs".into(),
            config: McpServerConfig::Local(McpStdioServerConfig {
                command: "node".into(),
                ..Default::default()
            }),
            version: Some("1.2.0".into()),
            gallery: Some(true),
            inputs: None,
        };
        let resource = Url::parse("file:///home/me/.config/tether/mcp.json").unwrap();
        let local = LocalMcpServer::minimal(&scanned, resource.clone());
        assert_eq!(local.source, McpServerSource::Gallery);
        assert_eq!(local.version.as_deref(), Some("1.2.0"));
        assert_eq!(local.mcp_resource, resource);
    }
}
