use std::sync::Arc;

use async_trait::async_trait;
use tether_types::{
    GalleryMcpServer, InstallMcpServerEvent, InstallMcpServerResult, InstallOptions, InstallableMcpServer, LocalMcpServer,
    LocalMcpServerInfo, McpServerManifest, ScannedMcpServer,
};
use tether_util::redact_sensitive;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{LocalServerInfoProvider, McpResourceEngine};
use crate::events::ManagementEvents;
use crate::files::{DeleteOptions, FileError, FileService, join_segment};
use crate::gallery::{GalleryError, McpGalleryService};
use crate::scanner::McpResourceScanner;
use crate::synthesizer::synthesize_launch_config;
use crate::types::McpManagementError;

const MANIFEST_FILE: &str = "manifest.json";
const README_FILE: &str = "README.md";

/// Gallery metadata cached per `(name, version)` under one root folder.
///
/// Layout: `<root>/<name with '/' replaced by '.'>[-<version>]/manifest.json`
/// plus an optional sibling `README.md`.
pub struct GalleryServerCache {
    files: Arc<dyn FileService>,
    root: Url,
}

impl GalleryServerCache {
    pub fn new(files: Arc<dyn FileService>, root: Url) -> Self {
        Self { files, root }
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Cache folder of a server. The same pair always maps to the same folder.
    pub fn location(&self, name: &str, version: Option<&str>) -> Result<Url, FileError> {
        let mut folder = name.replace('/', ".");
        if let Some(version) = version.filter(|version| !version.is_empty()) {
            folder.push('-');
            folder.push_str(version);
        }
        join_segment(&self.root, &folder)
    }

    /// Writes `info` and `readme` into `location`, dropping a stale README.
    pub async fn store(&self, location: &Url, info: &LocalMcpServerInfo, readme: Option<&str>) -> Result<(), McpManagementError> {
        let manifest = serde_json::to_vec_pretty(info)?;
        self.files.write_file(&join_segment(location, MANIFEST_FILE)?, &manifest).await?;

        let readme_file = join_segment(location, README_FILE)?;
        match readme {
            Some(readme) => self.files.write_file(&readme_file, readme.as_bytes()).await?,
            None => {
                if self.files.exists(&readme_file).await? {
                    self.files.del(&readme_file, DeleteOptions::default()).await?;
                }
            }
        }
        Ok(())
    }

    /// Reads the cached record; `None` when nothing is cached.
    pub async fn read(&self, location: &Url) -> Result<Option<LocalMcpServerInfo>, McpManagementError> {
        match self.files.read_file(&join_segment(location, MANIFEST_FILE)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn readme_url(&self, location: &Url) -> Result<Option<Url>, McpManagementError> {
        let readme = join_segment(location, README_FILE)?;
        Ok(self.files.exists(&readme).await?.then_some(readme))
    }

    async fn hydrate(&self, local: &mut LocalMcpServer, location: &Url) -> Result<(), McpManagementError> {
        let Some(info) = self.read(location).await? else {
            return Ok(());
        };
        local.display_name = info.display_name;
        local.description = info.description;
        local.publisher = info.publisher;
        local.publisher_display_name = info.publisher_display_name;
        local.repository_url = info.repository_url;
        local.icon = info.icon;
        local.codicon = info.codicon;
        local.manifest = info.manifest;
        local.readme_url = self.readme_url(location).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalServerInfoProvider for GalleryServerCache {
    async fn local_server(&self, scanned: &ScannedMcpServer, mcp_resource: &Url) -> LocalMcpServer {
        let mut local = LocalMcpServer::minimal(scanned, mcp_resource.clone());
        if !scanned.is_gallery() {
            return local;
        }

        let location = match self.location(&scanned.name, scanned.version.as_deref()) {
            Ok(location) => location,
            Err(error) => {
                tracing::warn!(server = %scanned.name, error = %error, "Cannot resolve gallery cache location");
                return local;
            }
        };
        local.location = Some(location.clone());

        let mut hydrated = local.clone();
        match self.hydrate(&mut hydrated, &location).await {
            Ok(()) => hydrated,
            Err(error) => {
                tracing::warn!(server = %scanned.name, location = %location, error = %error, "Ignoring unreadable gallery cache");
                local
            }
        }
    }
}

/// Resource engine that can also install from a gallery.
///
/// Gallery installs cache the server's manifest and README next to the
/// engine's other cached servers, then persist a launch configuration
/// synthesized from that manifest.
pub struct GalleryResourceEngine {
    engine: Arc<McpResourceEngine>,
    gallery: Arc<dyn McpGalleryService>,
    cache: Arc<GalleryServerCache>,
}

impl GalleryResourceEngine {
    pub fn new(
        mcp_resource: Url,
        files: Arc<dyn FileService>,
        scanner: Arc<dyn McpResourceScanner>,
        gallery: Arc<dyn McpGalleryService>,
        cache_root: Url,
    ) -> Self {
        let cache = Arc::new(GalleryServerCache::new(files.clone(), cache_root));
        let engine = McpResourceEngine::new(mcp_resource, files, scanner, cache.clone());
        Self { engine, gallery, cache }
    }

    pub fn engine(&self) -> &Arc<McpResourceEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &GalleryServerCache {
        &self.cache
    }

    pub fn events(&self) -> &ManagementEvents {
        self.engine.events()
    }

    pub fn mcp_resource(&self) -> &Url {
        self.engine.mcp_resource()
    }

    pub async fn get_installed(&self) -> Result<Vec<LocalMcpServer>, McpManagementError> {
        self.engine.get_installed().await
    }

    pub async fn install(&self, server: InstallableMcpServer) -> Result<LocalMcpServer, McpManagementError> {
        self.engine.install(server).await
    }

    pub async fn uninstall(&self, server: &LocalMcpServer) -> Result<(), McpManagementError> {
        self.engine.uninstall(server).await
    }

    /// Fetches `server` from the gallery, caches its metadata and installs it.
    pub async fn install_from_gallery(
        &self,
        server: &GalleryMcpServer,
        options: &InstallOptions,
        token: &CancellationToken,
    ) -> Result<LocalMcpServer, McpManagementError> {
        let mcp_resource = self.mcp_resource().clone();
        self.events().fire_install(InstallMcpServerEvent {
            name: server.name.clone(),
            mcp_resource: mcp_resource.clone(),
            source: Some(server.clone()),
        });

        let result = async {
            self.engine.initialize().await?;
            let _operation = self.engine.lock_operations().await;

            let version = server.version.as_deref();
            let manifest = self.cache_metadata(server, &server.name, version, token).await?;
            let synthesized = synthesize_launch_config(&manifest, options.package_type.as_deref())?;
            tracing::debug!(
                server = %server.name,
                config = %redact_sensitive(&serde_json::to_string(&synthesized.config)?),
                inputs = synthesized.inputs.len(),
                "Synthesized launch configuration"
            );

            let scanned = ScannedMcpServer {
                name: server.name.clone(),
                config: synthesized.config,
                version: server.version.clone(),
                gallery: Some(true),
                inputs: (!synthesized.inputs.is_empty()).then_some(synthesized.inputs),
            };
            self.engine.persist_and_reconcile_locked(scanned).await
        }
        .await;

        if let Err(error) = &result {
            tracing::warn!(resource = %mcp_resource, server = %server.name, error = %error, "Failed to install MCP server from gallery");
            self.events().fire_did_install(vec![InstallMcpServerResult::failed(
                server.name.clone(),
                mcp_resource,
                Some(server.clone()),
                error,
            )]);
        }
        result
    }

    /// Re-fetches and re-caches gallery metadata for an installed server.
    ///
    /// The launch configuration is left as it is.
    pub async fn update_metadata(
        &self,
        local: &LocalMcpServer,
        gallery: &GalleryMcpServer,
        token: &CancellationToken,
    ) -> Result<LocalMcpServer, McpManagementError> {
        let result = async {
            self.engine.initialize().await?;
            let _operation = self.engine.lock_operations().await;
            self.cache_metadata(gallery, &local.name, local.version.as_deref(), token).await?;
            self.engine.reconcile_locked().await;
            self.engine.find(&local.name).await.ok_or_else(|| McpManagementError::not_found(&local.name))
        }
        .await;

        if let Err(error) = &result {
            tracing::warn!(resource = %self.mcp_resource(), server = %local.name, error = %error, "Failed to update MCP server metadata");
            self.events().fire_did_update(vec![InstallMcpServerResult::failed(
                local.name.clone(),
                self.mcp_resource().clone(),
                Some(gallery.clone()),
                error,
            )]);
        }
        result
    }

    pub fn dispose(&self) {
        self.engine.dispose();
    }

    /// Fetches manifest and README and stores them under `(name, version)`.
    async fn cache_metadata(
        &self,
        server: &GalleryMcpServer,
        name: &str,
        version: Option<&str>,
        token: &CancellationToken,
    ) -> Result<McpServerManifest, McpManagementError> {
        let manifest = self.gallery.get_manifest(server, token).await?;

        let readme = if server.readme_url.is_some() {
            match self.gallery.get_readme(server, token).await {
                Ok(readme) => Some(readme),
                Err(GalleryError::Cancelled) => return Err(GalleryError::Cancelled.into()),
                Err(error) => {
                    tracing::warn!(server = %server.name, error = %error, "Skipping README");
                    None
                }
            }
        } else {
            None
        };

        let location = self.cache.location(name, version)?;
        let info = LocalMcpServerInfo::from_gallery(server, manifest.clone());
        self.cache.store(&location, &info, readme.as_deref()).await?;
        tracing::debug!(server = %name, location = %location, "Cached gallery metadata");
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::InMemoryFileService;
    use crate::scanner::JsonResourceScanner;
    use std::sync::Mutex;
    use tether_types::{McpServerConfig, McpServerPackage, McpServerSource};

    struct StaticGallery {
        manifest: McpServerManifest,
        readme: Option<String>,
        manifest_calls: Mutex<usize>,
    }

    #[async_trait]
    impl McpGalleryService for StaticGallery {
        async fn get_manifest(&self, _server: &GalleryMcpServer, token: &CancellationToken) -> Result<McpServerManifest, GalleryError> {
            if token.is_cancelled() {
                return Err(GalleryError::Cancelled);
            }
            *self.manifest_calls.lock().unwrap() += 1;
            Ok(self.manifest.clone())
        }

        async fn get_readme(&self, server: &GalleryMcpServer, _token: &CancellationToken) -> Result<String, GalleryError> {
            self.readme.clone().ok_or_else(|| GalleryError::NoReadme { name: server.name.clone() })
        }
    }

    fn resource() -> Url {
        Url::parse("file:///home/me/.config/tether/mcp.json").unwrap()
    }

    fn cache_root() -> Url {
        Url::parse("file:///home/me/.cache/tether/scope/").unwrap()
    }

    fn weather() -> GalleryMcpServer {
        GalleryMcpServer {
            name: "io.github.acme/weather".into(),
            display_name: Some("Weather".into()),
            publisher: Some("acme".into()),
            version: Some("1.0.0".into()),
            manifest_url: "https://gallery.example.com/weather/manifest.json".into(),
            readme_url: Some("https://gallery.example.com/weather/README.md".into()),
            ..Default::default()
        }
    }

    fn gallery(readme: Option<&str>) -> Arc<StaticGallery> {
        Arc::new(StaticGallery {
            manifest: McpServerManifest {
                packages: Some(vec![McpServerPackage {
                    registry_name: "npm".into(),
                    name: "@acme/weather".into(),
                    version: Some("1.0.0".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            readme: readme.map(str::to_string),
            manifest_calls: Mutex::new(0),
        })
    }

    fn engine(files: Arc<InMemoryFileService>, gallery: Arc<StaticGallery>) -> GalleryResourceEngine {
        let scanner = Arc::new(JsonResourceScanner::new(files.clone()));
        GalleryResourceEngine::new(resource(), files, scanner, gallery, cache_root())
    }

    #[test]
    fn cache_location_is_deterministic() {
        let cache = GalleryServerCache::new(Arc::new(InMemoryFileService::new()), cache_root());
        let first = cache.location("io.github.acme/weather", Some("1.0.0")).unwrap();
        assert_eq!(first.as_str(), "file:///home/me/.cache/tether/scope/io.github.acme.weather-1.0.0");
        assert_eq!(first, cache.location("io.github.acme/weather", Some("1.0.0")).unwrap());
        assert_eq!(
            cache.location("io.github.acme/weather", None).unwrap().as_str(),
            "file:///home/me/.cache/tether/scope/io.github.acme.weather"
        );
    }

    #[tokio::test]
    async fn install_from_gallery_caches_and_hydrates() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine(files.clone(), gallery(Some("# Weather")));

        let local = engine
            .install_from_gallery(&weather(), &InstallOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(local.source, McpServerSource::Gallery);
        assert_eq!(local.display_name.as_deref(), Some("Weather"));
        assert_eq!(local.version.as_deref(), Some("1.0.0"));
        let location = local.location.clone().unwrap();
        assert_eq!(local.readme_url, Some(join_segment(&location, README_FILE).unwrap()));
        assert!(local.manifest.is_some());
        let McpServerConfig::Local(config) = &local.config else {
            panic!("expected a local config");
        };
        assert_eq!(config.command, "npx");
        assert_eq!(config.args.as_deref().unwrap(), ["@acme/weather@1.0.0"]);

        engine.uninstall(&local).await.unwrap();
        assert!(!files.exists(&location).await.unwrap());
        assert!(engine.get_installed().await.unwrap().is_empty());
        engine.dispose();
    }

    #[tokio::test]
    async fn readme_url_requires_cached_readme() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine(files, gallery(None));

        let local = engine
            .install_from_gallery(&weather(), &InstallOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(local.readme_url.is_none());
        assert_eq!(local.display_name.as_deref(), Some("Weather"));
    }

    #[tokio::test]
    async fn missing_cache_degrades_to_minimal_entry() {
        let files = Arc::new(InMemoryFileService::new());
        files
            .write_file(
                &resource(),
                br#"{"servers":{"io.github.acme/weather":{"type":"stdio","command":"npx","version":"1.0.0","gallery":true}}}"#,
            )
            .await
            .unwrap();
        let engine = engine(files, gallery(None));

        let installed = engine.get_installed().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].source, McpServerSource::Gallery);
        assert!(installed[0].display_name.is_none());
        assert!(installed[0].manifest.is_none());
    }

    #[tokio::test]
    async fn cancelled_install_reports_failure_with_source() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine(files, gallery(None));
        let mut installs = engine.events().on_did_install_mcp_servers();
        let token = CancellationToken::new();
        token.cancel();

        let error = engine.install_from_gallery(&weather(), &InstallOptions::default(), &token).await.unwrap_err();
        assert!(matches!(error, McpManagementError::Gallery(GalleryError::Cancelled)));

        let batch = installs.recv().await.unwrap();
        assert!(batch[0].is_error());
        assert_eq!(batch[0].source.as_ref().map(|s| s.name.as_str()), Some("io.github.acme/weather"));
        assert!(engine.get_installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_metadata_refreshes_display_fields() {
        let files = Arc::new(InMemoryFileService::new());
        let source = gallery(None);
        let engine = engine(files, source.clone());
        let local = engine
            .install_from_gallery(&weather(), &InstallOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let mut renamed = weather();
        renamed.display_name = Some("Weather (new)".into());
        let refreshed = engine.update_metadata(&local, &renamed, &CancellationToken::new()).await.unwrap();

        assert_eq!(refreshed.display_name.as_deref(), Some("Weather (new)"));
        assert_eq!(refreshed.config, local.config);
        assert_eq!(*source.manifest_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn update_metadata_for_unknown_server_is_not_found() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine(files, gallery(None));
        let mut stranger = LocalMcpServer::minimal(
            &ScannedMcpServer {
                name: "stranger".into(),
                config: McpServerConfig::Remote(tether_types::McpRemoteServerConfig {
                    url: "https://x.example.com".into(),
                    headers: None,
                }),
                version: None,
                gallery: Some(true),
                inputs: None,
            },
            resource(),
        );
        stranger.version = Some("0.1.0".into());

        let error = engine.update_metadata(&stranger, &weather(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, McpManagementError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failed_metadata_fetch_reports_update_error() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine(files, gallery(None));
        let local = engine
            .install_from_gallery(&weather(), &InstallOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        let mut updates = engine.events().on_did_update_mcp_servers();
        let token = CancellationToken::new();
        token.cancel();

        let error = engine.update_metadata(&local, &weather(), &token).await.unwrap_err();
        assert!(matches!(error, McpManagementError::Gallery(GalleryError::Cancelled)));

        let batch = updates.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].is_error());
        assert_eq!(batch[0].name, "io.github.acme/weather");
        assert_eq!(engine.get_installed().await.unwrap()[0].config, local.config);
        engine.dispose();
    }
}
