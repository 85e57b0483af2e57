//! Lifecycle notifications published by the management service.
//!
//! Errors are carried as rendered strings so events stay cloneable and can be
//! shipped across a process boundary unchanged.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::GalleryMcpServer;
use crate::server::LocalMcpServer;

/// An install has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMcpServerEvent {
    pub name: String,
    pub mcp_resource: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<GalleryMcpServer>,
}

/// Outcome for one server of an install or update batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMcpServerResult {
    pub name: String,
    pub mcp_resource: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<GalleryMcpServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalMcpServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstallMcpServerResult {
    /// Successful result for a reconciled entry.
    pub fn installed(local: LocalMcpServer) -> Self {
        Self {
            name: local.name.clone(),
            mcp_resource: local.mcp_resource.clone(),
            source: None,
            local: Some(local),
            error: None,
        }
    }

    /// Failed result carrying the rendered error.
    pub fn failed(name: impl Into<String>, mcp_resource: Url, source: Option<GalleryMcpServer>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            mcp_resource,
            source,
            local: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An uninstall has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallMcpServerEvent {
    pub name: String,
    pub mcp_resource: Url,
}

/// A server disappeared from its resource, or its uninstall failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidUninstallMcpServerEvent {
    pub name: String,
    pub mcp_resource: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
