use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use tether_types::{GalleryMcpServer, McpServerManifest};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{GalleryError, McpGalleryService};

/// HTTP gallery client.
///
/// Relative manifest and README URLs resolve against `base_url`. `file://`
/// URLs are read from disk, which lets a gallery be mirrored locally.
#[derive(Debug, Clone)]
pub struct McpGalleryClient {
    http: Client,
    base_url: Option<Url>,
}

impl McpGalleryClient {
    pub fn new(base_url: Option<Url>) -> Result<Self, GalleryError> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json, text/markdown;q=0.9, */*;q=0.8"));

        let http = Client::builder()
            .default_headers(default_headers)
            .user_agent(format!("tether/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GalleryError::Client { reason: e.to_string() })?;

        Ok(Self { http, base_url })
    }

    fn resolve(&self, location: &str) -> Result<Url, GalleryError> {
        let invalid = |reason: String| GalleryError::InvalidUrl {
            url: location.to_string(),
            reason,
        };
        match Url::parse(location) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base.join(location).map_err(|e| invalid(e.to_string())),
                None => Err(invalid("relative URL without a gallery base URL".into())),
            },
            Err(error) => Err(invalid(error.to_string())),
        }
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, GalleryError> {
        if url.scheme() == "file" {
            let path = url.to_file_path().map_err(|_| GalleryError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".into(),
            })?;
            return tokio::fs::read_to_string(&path).await.map_err(|e| GalleryError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        debug!(%url, "fetching from gallery");
        let response = self.http.get(url.clone()).send().await.map_err(|e| GalleryError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(GalleryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| GalleryError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

async fn cancellable<T>(token: &CancellationToken, future: impl Future<Output = Result<T, GalleryError>>) -> Result<T, GalleryError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(GalleryError::Cancelled),
        result = future => result,
    }
}

#[async_trait]
impl McpGalleryService for McpGalleryClient {
    async fn get_manifest(&self, server: &GalleryMcpServer, token: &CancellationToken) -> Result<McpServerManifest, GalleryError> {
        let url = self.resolve(&server.manifest_url)?;
        let body = cancellable(token, self.fetch_text(&url)).await?;
        serde_json::from_str(&body).map_err(|e| GalleryError::InvalidManifest {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_readme(&self, server: &GalleryMcpServer, token: &CancellationToken) -> Result<String, GalleryError> {
        let location = server.readme_url.as_deref().ok_or_else(|| GalleryError::NoReadme { name: server.name.clone() })?;
        let url = self.resolve(location)?;
        cancellable(token, self.fetch_text(&url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery_server(manifest_url: String, readme_url: Option<String>) -> GalleryMcpServer {
        GalleryMcpServer {
            name: "io.github.acme/weather".into(),
            version: Some("1.0.0".into()),
            manifest_url,
            readme_url,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reads_manifest_and_readme_from_local_gallery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("manifest.json"),
            r#"{"packages":[{"registry_name":"npm","name":"@acme/weather","version":"1.0.0"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "# Weather").unwrap();

        let base = Url::from_directory_path(dir.path()).unwrap();
        let client = McpGalleryClient::new(Some(base)).unwrap();
        let server = gallery_server("manifest.json".into(), Some("README.md".into()));
        let token = CancellationToken::new();

        let manifest = client.get_manifest(&server, &token).await.unwrap();
        assert_eq!(manifest.packages()[0].name, "@acme/weather");
        assert_eq!(client.get_readme(&server, &token).await.unwrap(), "# Weather");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = McpGalleryClient::new(None).unwrap();
        let server = gallery_server("https://gallery.invalid/manifest.json".into(), None);
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(client.get_manifest(&server, &token).await, Err(GalleryError::Cancelled)));
    }

    #[tokio::test]
    async fn relative_url_without_base_is_rejected() {
        let client = McpGalleryClient::new(None).unwrap();
        let server = gallery_server("manifest.json".into(), None);

        let error = client.get_manifest(&server, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, GalleryError::InvalidUrl { .. }));
        let readme = client.get_readme(&server, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(readme, GalleryError::NoReadme { .. }));
    }
}
