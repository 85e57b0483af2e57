use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use futures_util::future::try_join_all;
use indexmap::IndexMap;
use tether_mcp::management::{CanInstall, InstallCandidate};
use tether_mcp::{
    AccessLevelPolicy, DiskFileService, JsonResourceScanner, ManagementSettings, McpGalleryClient, McpManagementService, McpManager,
    StaticProfileResolver, synthesize_launch_config,
};
use tether_types::{
    GalleryMcpServer, InstallOptions, InstallableMcpServer, McpRemoteServerConfig, McpServerConfig, McpServerManifest, McpStdioServerConfig,
    UninstallOptions,
};
use tether_util::{parse_resource_location, redact_sensitive};
use tokio::sync::broadcast;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    // Synthesis is offline and needs no settings.
    if let Some(("synthesize", sub)) = matches.subcommand() {
        return run_synthesize(sub).await;
    }

    let settings = ManagementSettings::from_env()?;
    tracing::debug!(resource = %settings.mcp_resource, cache = %settings.cache_dir.display(), "Resolved settings");
    let manager = build_manager(&settings)?;

    let outcome = match matches.subcommand() {
        Some(("list", sub)) => run_list(&manager, sub).await,
        Some(("add", sub)) => run_add(&manager, sub).await,
        Some(("remove", sub)) => run_remove(&manager, sub).await,
        Some(("install-from-gallery", sub)) => run_install_from_gallery(&manager, sub).await,
        Some(("watch", sub)) => run_watch(&manager, sub).await,
        _ => run_list(&manager, &ArgMatches::default()).await,
    };
    manager.dispose().await;
    outcome
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resource_arg() -> Arg {
    Arg::new("resource")
        .long("resource")
        .short('r')
        .action(ArgAction::Set)
        .help("Path or URL of the MCP resource; defaults to TETHER_MCP_RESOURCE")
}

fn cli() -> Command {
    Command::new("tether")
        .about("Manage MCP servers across configuration scopes")
        .subcommand(
            Command::new("list").about("List installed MCP servers").arg(
                Arg::new("resource")
                    .long("resource")
                    .short('r')
                    .action(ArgAction::Append)
                    .help("Resource to list; repeat to list several"),
            ),
        )
        .subcommand(
            Command::new("add")
                .about("Install a server from a raw definition")
                .arg(Arg::new("name").required(true).help("Server name"))
                .arg(
                    Arg::new("command")
                        .long("command")
                        .short('c')
                        .action(ArgAction::Set)
                        .conflicts_with("url")
                        .required_unless_present("url")
                        .help("Executable of a stdio server"),
                )
                .arg(Arg::new("arg").long("arg").short('a').action(ArgAction::Append).allow_hyphen_values(true))
                .arg(Arg::new("env").long("env").short('e').action(ArgAction::Append).help("KEY=VALUE"))
                .arg(Arg::new("url").long("url").action(ArgAction::Set).help("Endpoint of a remote server"))
                .arg(Arg::new("header").long("header").action(ArgAction::Append).requires("url").help("NAME=VALUE"))
                .arg(resource_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Uninstall a server by name")
                .arg(Arg::new("name").required(true))
                .arg(resource_arg()),
        )
        .subcommand(
            Command::new("install-from-gallery")
                .about("Install a server from its gallery manifest")
                .arg(Arg::new("manifest").required(true).help("Manifest URL, relative to TETHER_GALLERY_URL if set"))
                .arg(Arg::new("name").long("name").short('n').required(true).action(ArgAction::Set))
                .arg(Arg::new("version").long("version").action(ArgAction::Set))
                .arg(Arg::new("readme").long("readme").action(ArgAction::Set).help("README URL"))
                .arg(
                    Arg::new("package-type")
                        .long("package-type")
                        .action(ArgAction::Set)
                        .help("Registry to launch from (npm, pypi, docker, nuget or remote)"),
                )
                .arg(resource_arg()),
        )
        .subcommand(
            Command::new("synthesize")
                .about("Print the launch configuration synthesized from a manifest file")
                .arg(Arg::new("manifest").required(true).help("Path to a manifest JSON file"))
                .arg(Arg::new("package-type").long("package-type").action(ArgAction::Set)),
        )
        .subcommand(
            Command::new("watch")
                .about("Print management events until interrupted")
                .arg(resource_arg()),
        )
}

fn build_manager(settings: &ManagementSettings) -> Result<McpManager> {
    let files = Arc::new(DiskFileService::new());
    let scanner = Arc::new(JsonResourceScanner::new(files.clone()));
    let gallery = Arc::new(McpGalleryClient::new(settings.gallery_url.clone())?);
    Ok(McpManager::new(
        files,
        scanner,
        gallery,
        Arc::new(AccessLevelPolicy::new(settings.access)),
        Arc::new(StaticProfileResolver::new(settings.mcp_resource.clone())),
        settings.cache_root()?,
    ))
}

fn resource(matches: &ArgMatches) -> Result<Option<Url>> {
    matches
        .get_one::<String>("resource")
        .map(|value| parse_resource_location(value).with_context(|| format!("invalid resource: {value}")))
        .transpose()
}

fn key_values(matches: &ArgMatches, id: &str) -> Result<Option<IndexMap<String, String>>> {
    let Some(values) = matches.get_many::<String>(id) else {
        return Ok(None);
    };
    let mut pairs = IndexMap::new();
    for value in values {
        let (key, value) = value.split_once('=').with_context(|| format!("expected NAME=VALUE, got '{value}'"))?;
        pairs.insert(key.trim().to_string(), value.to_string());
    }
    Ok(Some(pairs))
}

fn ensure_allowed(decision: CanInstall) -> Result<()> {
    match decision {
        CanInstall::Allowed => Ok(()),
        CanInstall::Blocked(reason) => bail!("{}", reason.value),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_list(manager: &McpManager, matches: &ArgMatches) -> Result<()> {
    let resources: Vec<Option<Url>> = match matches.try_get_many::<String>("resource").ok().flatten() {
        Some(values) => values
            .map(|value| parse_resource_location(value).map(Some).with_context(|| format!("invalid resource: {value}")))
            .collect::<Result<_>>()?,
        None => vec![None],
    };

    let listed = try_join_all(resources.into_iter().map(|resource| manager.get_installed(resource))).await?;
    let servers: Vec<_> = listed.into_iter().flatten().collect();
    let rows: Vec<serde_json::Value> = servers
        .iter()
        .map(|server| {
            serde_json::json!({
                "name": server.name,
                "type": server.config.transport_label(),
                "target": redact_sensitive(server.config.command_or_url()),
                "version": server.version,
                "source": server.source,
                "resource": server.mcp_resource,
            })
        })
        .collect();
    print_json(&rows)
}

async fn run_add(manager: &McpManager, matches: &ArgMatches) -> Result<()> {
    let name = matches.get_one::<String>("name").context("missing name")?.clone();
    let config = match matches.get_one::<String>("url") {
        Some(url) => McpServerConfig::Remote(McpRemoteServerConfig {
            url: url.clone(),
            headers: key_values(matches, "header")?,
        }),
        None => McpServerConfig::Local(McpStdioServerConfig {
            command: matches.get_one::<String>("command").context("missing --command")?.clone(),
            args: matches.get_many::<String>("arg").map(|args| args.cloned().collect()),
            env: key_values(matches, "env")?,
        }),
    };
    let server = InstallableMcpServer { name, config, inputs: None };
    ensure_allowed(manager.can_install(InstallCandidate::Local(&server)))?;

    let options = InstallOptions {
        mcp_resource: resource(matches)?,
        ..Default::default()
    };
    let installed = manager.install(server, options).await?;
    tracing::info!(server = %installed.name, resource = %installed.mcp_resource, "Installed MCP server");
    Ok(())
}

async fn run_remove(manager: &McpManager, matches: &ArgMatches) -> Result<()> {
    let name = matches.get_one::<String>("name").context("missing name")?;
    let mcp_resource = resource(matches)?;
    let installed = manager.get_installed(mcp_resource.clone()).await?;
    let Some(server) = installed.into_iter().find(|server| &server.name == name) else {
        bail!("no MCP server named '{name}' is installed");
    };

    manager.uninstall(server, UninstallOptions { mcp_resource }).await?;
    tracing::info!(server = %name, "Uninstalled MCP server");
    Ok(())
}

async fn run_install_from_gallery(manager: &McpManager, matches: &ArgMatches) -> Result<()> {
    let server = GalleryMcpServer {
        name: matches.get_one::<String>("name").context("missing --name")?.clone(),
        version: matches.get_one::<String>("version").cloned(),
        manifest_url: matches.get_one::<String>("manifest").context("missing manifest")?.clone(),
        readme_url: matches.get_one::<String>("readme").cloned(),
        ..Default::default()
    };
    ensure_allowed(manager.can_install(InstallCandidate::Gallery(&server)))?;

    let options = InstallOptions {
        mcp_resource: resource(matches)?,
        package_type: matches.get_one::<String>("package-type").cloned(),
    };
    let installed = manager.install_from_gallery(server, options).await?;
    tracing::info!(
        server = %installed.name,
        resource = %installed.mcp_resource,
        command = %redact_sensitive(installed.config.command_or_url()),
        "Installed MCP server from gallery"
    );
    Ok(())
}

async fn run_synthesize(matches: &ArgMatches) -> Result<()> {
    let path = matches.get_one::<String>("manifest").context("missing manifest")?;
    let contents = tokio::fs::read(tether_util::expand_tilde(path))
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let manifest: McpServerManifest = serde_json::from_slice(&contents).with_context(|| format!("{path} is not a valid manifest"))?;

    let synthesized = synthesize_launch_config(&manifest, matches.get_one::<String>("package-type").map(String::as_str))?;
    print_json(&serde_json::json!({
        "config": synthesized.config,
        "inputs": synthesized.inputs,
    }))
}

async fn run_watch(manager: &McpManager, matches: &ArgMatches) -> Result<()> {
    let mcp_resource = resource(matches)?;
    let events = manager.events();
    let mut installs = events.on_did_install_mcp_servers();
    let mut updates = events.on_did_update_mcp_servers();
    let mut uninstalls = events.on_did_uninstall_mcp_server();

    let servers = manager.get_installed(mcp_resource.clone()).await?;
    let watched = mcp_resource.unwrap_or_else(|| manager.default_mcp_resource());
    tracing::info!(resource = %watched, count = servers.len(), "Watching MCP resource; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            batch = installs.recv() => match batch {
                Ok(results) => print_json(&serde_json::json!({ "event": "installed", "results": results }))?,
                Err(error) => log_lag("installed", error)?,
            },
            batch = updates.recv() => match batch {
                Ok(results) => print_json(&serde_json::json!({ "event": "updated", "results": results }))?,
                Err(error) => log_lag("updated", error)?,
            },
            removed = uninstalls.recv() => match removed {
                Ok(event) => print_json(&serde_json::json!({ "event": "uninstalled", "server": event }))?,
                Err(error) => log_lag("uninstalled", error)?,
            },
        }
    }
    Ok(())
}

fn log_lag(stream: &str, error: broadcast::error::RecvError) -> Result<()> {
    match error {
        broadcast::error::RecvError::Lagged(skipped) => {
            tracing::warn!(stream, skipped, "Event stream lagged");
            Ok(())
        }
        broadcast::error::RecvError::Closed => bail!("{stream} event stream closed"),
    }
}
