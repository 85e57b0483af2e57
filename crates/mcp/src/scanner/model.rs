use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tether_types::{McpServerConfig, McpServerVariableInput, ScannedMcpServer};

/// Servers and shared inputs read from one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McpServersConfiguration {
    pub servers: Vec<ScannedMcpServer>,
    pub inputs: Option<Vec<McpServerVariableInput>>,
}

impl McpServersConfiguration {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// On-disk shape of one entry under `servers`; the name is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct StoredServer {
    #[serde(flatten)]
    pub config: McpServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery: Option<bool>,
}

impl StoredServer {
    pub fn into_scanned(self, name: String) -> ScannedMcpServer {
        ScannedMcpServer {
            name,
            config: self.config,
            version: self.version,
            gallery: self.gallery,
            inputs: None,
        }
    }

    pub fn from_scanned(server: &ScannedMcpServer) -> Self {
        Self {
            config: server.config.clone(),
            version: server.version.clone(),
            gallery: server.gallery,
        }
    }
}

/// Parses the `servers` and `inputs` members of a resource document.
pub(super) fn parse_document(document: &JsonMap<String, Value>) -> Result<McpServersConfiguration, serde_json::Error> {
    let mut servers = Vec::new();
    if let Some(Value::Object(entries)) = document.get("servers") {
        for (name, entry) in entries {
            let stored: StoredServer = serde_json::from_value(entry.clone())?;
            servers.push(stored.into_scanned(name.clone()));
        }
    }

    let inputs = match document.get("inputs") {
        Some(value) => Some(serde_json::from_value::<Vec<McpServerVariableInput>>(value.clone())?),
        None => None,
    };

    Ok(McpServersConfiguration { servers, inputs })
}
