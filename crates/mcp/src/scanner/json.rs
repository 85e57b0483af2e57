use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};
use tether_types::{McpServerVariableInput, ScannedMcpServer};
use url::Url;

use super::model::{StoredServer, parse_document};
use super::{McpResourceScanner, McpServersConfiguration, ScanError};
use crate::files::FileService;

/// Scanner for JSON resources shaped as `{ "servers": { ... }, "inputs": [ ... ] }`.
///
/// Rewrites keep every top-level member it does not own.
#[derive(Clone)]
pub struct JsonResourceScanner {
    files: Arc<dyn FileService>,
}

impl JsonResourceScanner {
    pub fn new(files: Arc<dyn FileService>) -> Self {
        Self { files }
    }

    async fn read_document(&self, mcp_resource: &Url) -> Result<Option<JsonMap<String, Value>>, ScanError> {
        let bytes = match self.files.read_file(mcp_resource).await {
            Ok(bytes) => bytes,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(JsonMap::new()));
        }

        let value: Value = serde_json::from_slice(&bytes).map_err(malformed(mcp_resource))?;
        let Value::Object(document) = value else {
            return Err(ScanError::NotAnObject {
                resource: mcp_resource.clone(),
            });
        };
        if let Some(servers) = document.get("servers")
            && !servers.is_object()
        {
            return Err(ScanError::ServersNotAnObject {
                resource: mcp_resource.clone(),
            });
        }
        Ok(Some(document))
    }

    async fn write_document(&self, mcp_resource: &Url, document: JsonMap<String, Value>) -> Result<(), ScanError> {
        let mut contents = serde_json::to_vec_pretty(&Value::Object(document)).map_err(malformed(mcp_resource))?;
        contents.push(b'\n');
        self.files.write_file(mcp_resource, &contents).await?;
        Ok(())
    }
}

fn malformed(mcp_resource: &Url) -> impl FnOnce(serde_json::Error) -> ScanError + '_ {
    move |source| ScanError::Malformed {
        resource: mcp_resource.clone(),
        source,
    }
}

/// Upserts `added` into the `inputs` array, replacing entries with the same id.
fn merge_inputs(document: &mut JsonMap<String, Value>, added: &[McpServerVariableInput]) -> Result<(), serde_json::Error> {
    if added.is_empty() {
        return Ok(());
    }
    let mut inputs: Vec<McpServerVariableInput> = match document.get("inputs") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    for input in added {
        match inputs.iter_mut().find(|existing| existing.id == input.id) {
            Some(existing) => *existing = input.clone(),
            None => inputs.push(input.clone()),
        }
    }
    document.insert("inputs".to_string(), serde_json::to_value(inputs)?);
    Ok(())
}

#[async_trait]
impl McpResourceScanner for JsonResourceScanner {
    async fn scan_mcp_servers(&self, mcp_resource: &Url) -> Result<McpServersConfiguration, ScanError> {
        let Some(document) = self.read_document(mcp_resource).await? else {
            return Ok(McpServersConfiguration::default());
        };
        parse_document(&document).map_err(malformed(mcp_resource))
    }

    async fn add_mcp_servers(&self, servers: &[ScannedMcpServer], mcp_resource: &Url) -> Result<(), ScanError> {
        let mut document = self.read_document(mcp_resource).await?.unwrap_or_default();

        if let Value::Object(entries) = document
            .entry("servers")
            .or_insert_with(|| Value::Object(JsonMap::new()))
        {
            for server in servers {
                let stored = serde_json::to_value(StoredServer::from_scanned(server)).map_err(malformed(mcp_resource))?;
                entries.insert(server.name.clone(), stored);
            }
        }

        let inputs: Vec<McpServerVariableInput> = servers.iter().flat_map(|server| server.inputs.iter().flatten().cloned()).collect();
        merge_inputs(&mut document, &inputs).map_err(malformed(mcp_resource))?;

        tracing::debug!(resource = %mcp_resource, count = servers.len(), "Persisted MCP servers");
        self.write_document(mcp_resource, document).await
    }

    async fn remove_mcp_servers(&self, names: &[String], mcp_resource: &Url) -> Result<(), ScanError> {
        let Some(mut document) = self.read_document(mcp_resource).await? else {
            return Ok(());
        };
        let Some(Value::Object(entries)) = document.get_mut("servers") else {
            return Ok(());
        };

        let mut removed = 0usize;
        for name in names {
            if entries.remove(name).is_some() {
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(());
        }

        tracing::debug!(resource = %mcp_resource, count = removed, "Removed MCP servers");
        self.write_document(mcp_resource, document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::InMemoryFileService;
    use tether_types::{McpServerConfig, McpServerVariableType, McpStdioServerConfig};

    fn resource() -> Url {
        Url::parse("file:///home/me/.config/tether/mcp.json").unwrap()
    }

    fn stdio(name: &str, command: &str) -> ScannedMcpServer {
        ScannedMcpServer {
            name: name.into(),
            config: McpServerConfig::Local(McpStdioServerConfig {
                command: command.into(),
                ..Default::default()
            }),
            version: None,
            gallery: None,
            inputs: None,
        }
    }

    #[tokio::test]
    async fn missing_resource_scans_as_empty() {
        let scanner = JsonResourceScanner::new(Arc::new(InMemoryFileService::new()));
        let configuration = scanner.scan_mcp_servers(&resource()).await.unwrap();
        assert!(configuration.is_empty());
        assert!(configuration.inputs.is_none());
    }

    #[tokio::test]
    async fn add_upserts_and_preserves_unknown_members() {
        let files = Arc::new(InMemoryFileService::new());
        files
            .write_file(&resource(), br#"{"$schema":"tether","servers":{"fs":{"type":"stdio","command":"old"}}}"#)
            .await
            .unwrap();
        let scanner = JsonResourceScanner::new(files.clone());

        let mut weather = stdio("weather", "npx");
        weather.inputs = Some(vec![McpServerVariableInput {
            id: "key".into(),
            kind: McpServerVariableType::PromptString,
            description: String::new(),
            password: true,
            default: None,
            options: None,
        }]);
        scanner.add_mcp_servers(&[stdio("fs", "node"), weather], &resource()).await.unwrap();

        let raw: Value = serde_json::from_slice(&files.read_file(&resource()).await.unwrap()).unwrap();
        assert_eq!(raw["$schema"], "tether");
        assert_eq!(raw["servers"]["fs"]["command"], "node");
        assert_eq!(raw["inputs"][0]["id"], "key");

        let configuration = scanner.scan_mcp_servers(&resource()).await.unwrap();
        assert_eq!(configuration.servers.len(), 2);
    }

    #[tokio::test]
    async fn remove_drops_only_named_entries() {
        let files = Arc::new(InMemoryFileService::new());
        let scanner = JsonResourceScanner::new(files.clone());
        scanner.add_mcp_servers(&[stdio("a", "x"), stdio("b", "y")], &resource()).await.unwrap();

        scanner.remove_mcp_servers(&["a".to_string()], &resource()).await.unwrap();

        let configuration = scanner.scan_mcp_servers(&resource()).await.unwrap();
        let names: Vec<&str> = configuration.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn malformed_json_is_a_scan_error() {
        let files = Arc::new(InMemoryFileService::new());
        files.write_file(&resource(), b"{ not json").await.unwrap();
        let scanner = JsonResourceScanner::new(files);

        let error = scanner.scan_mcp_servers(&resource()).await.unwrap_err();
        assert!(matches!(error, ScanError::Malformed { .. }));
    }

    #[tokio::test]
    async fn non_object_servers_is_rejected_and_left_alone() {
        let files = Arc::new(InMemoryFileService::new());
        let original = br#"{"servers":["fs"]}"#;
        files.write_file(&resource(), original).await.unwrap();
        let scanner = JsonResourceScanner::new(files.clone());

        let error = scanner.scan_mcp_servers(&resource()).await.unwrap_err();
        assert!(matches!(error, ScanError::ServersNotAnObject { .. }));

        let error = scanner.add_mcp_servers(&[stdio("fs", "node")], &resource()).await.unwrap_err();
        assert!(matches!(error, ScanError::ServersNotAnObject { .. }));
        assert_eq!(files.read_file(&resource()).await.unwrap(), original.to_vec());
    }
}
