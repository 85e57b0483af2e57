//! Launch-configuration synthesis.
//!
//! Turns a gallery manifest into something runnable: a child-process spec
//! (`command`, `args`, `env`) for a registry package, or an HTTP spec for a
//! remote endpoint. Placeholders written as `{id}` in argument, header and
//! environment values are rewritten to `{input:id}` and each declared variable
//! becomes an input the user is prompted for later.
//!
//! Everything here is pure: no state, no I/O.

use indexmap::IndexMap;
use tether_types::{
    McpRemoteServerConfig, McpServerArgument, McpServerConfig, McpServerKeyValueInput, McpServerManifest, McpServerPackage,
    McpServerRemote, McpServerVariable, McpServerVariableInput, McpServerVariableType, McpServerVariables, McpStdioServerConfig,
};
use thiserror::Error;

/// Selector value choosing a manifest's remote endpoint instead of a package.
pub const REMOTE_SELECTOR: &str = "remote";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Manifest declares neither packages nor remotes")]
    NoDistribution,

    #[error("Manifest declares no package to launch for '{registry}'")]
    NoPackage { registry: String },
}

/// How a registry's packages are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegistryRule {
    tag: &'static str,
    launcher: &'static str,
    version_separator: &'static str,
    seed_args: &'static [&'static str],
    /// Flag that must precede each environment variable name on the command line.
    env_flag: Option<&'static str>,
    /// Separator placed before package arguments, when there are any.
    package_argument_separator: Option<&'static str>,
}

const REGISTRY_RULES: &[RegistryRule] = &[
    RegistryRule {
        tag: "npm",
        launcher: "npx",
        version_separator: "@",
        seed_args: &[],
        env_flag: None,
        package_argument_separator: None,
    },
    RegistryRule {
        tag: "docker",
        launcher: "docker",
        version_separator: ":",
        seed_args: &["run", "-i", "--rm"],
        env_flag: Some("-e"),
        package_argument_separator: None,
    },
    RegistryRule {
        tag: "pypi",
        launcher: "uvx",
        version_separator: "==",
        seed_args: &[],
        env_flag: None,
        package_argument_separator: None,
    },
    RegistryRule {
        tag: "nuget",
        launcher: "dnx",
        version_separator: "@",
        seed_args: &[],
        env_flag: None,
        package_argument_separator: Some("--"),
    },
];

/// Package registry a manifest package is published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRegistry {
    Npm,
    Docker,
    Pypi,
    Nuget,
    /// Any other tag; launched with the tag itself as the command.
    Other(String),
}

impl PackageRegistry {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "npm" => Self::Npm,
            "docker" => Self::Docker,
            "pypi" => Self::Pypi,
            "nuget" => Self::Nuget,
            _ => Self::Other(tag.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Npm => "npm",
            Self::Docker => "docker",
            Self::Pypi => "pypi",
            Self::Nuget => "nuget",
            Self::Other(tag) => tag,
        }
    }

    fn rule(&self) -> Option<&'static RegistryRule> {
        REGISTRY_RULES.iter().find(|rule| rule.tag == self.tag())
    }

    /// Binary that launches packages of this registry.
    pub fn launcher(&self) -> &str {
        self.rule().map(|rule| rule.launcher).unwrap_or_else(|| self.tag())
    }

    /// Package reference as passed to the launcher, pinned to `version` when known.
    pub fn package_identifier(&self, name: &str, version: Option<&str>) -> String {
        match (self.rule(), version.filter(|v| !v.is_empty())) {
            (Some(rule), Some(version)) => format!("{name}{}{version}", rule.version_separator),
            _ => name.to_string(),
        }
    }
}

/// What a caller asked to launch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySelector {
    Remote,
    Package(PackageRegistry),
}

impl RegistrySelector {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case(REMOTE_SELECTOR) {
            Self::Remote
        } else {
            Self::Package(PackageRegistry::from_tag(value))
        }
    }
}

/// A launch configuration and the inputs its placeholders refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedLaunchConfig {
    pub config: McpServerConfig,
    pub inputs: Vec<McpServerVariableInput>,
}

/// Builds the launch configuration for `manifest`.
///
/// Without a `selector` the first package's registry is used, or the remote
/// endpoint when the manifest has no packages.
pub fn synthesize_launch_config(manifest: &McpServerManifest, selector: Option<&str>) -> Result<SynthesizedLaunchConfig, SynthesisError> {
    let selector = match selector {
        Some(value) => RegistrySelector::parse(value),
        None => match (manifest.packages().first(), manifest.remotes().is_empty()) {
            (Some(package), _) => RegistrySelector::Package(PackageRegistry::from_tag(&package.registry_name)),
            (None, false) => RegistrySelector::Remote,
            (None, true) => return Err(SynthesisError::NoDistribution),
        },
    };

    if selector == RegistrySelector::Remote
        && let Some(remote) = manifest.remotes().first()
    {
        return Ok(synthesize_remote(remote));
    }

    let registry_tag = match &selector {
        RegistrySelector::Package(registry) => registry.tag().to_string(),
        RegistrySelector::Remote => REMOTE_SELECTOR.to_string(),
    };
    let package = manifest
        .packages()
        .iter()
        .find(|package| PackageRegistry::from_tag(&package.registry_name).tag().eq_ignore_ascii_case(&registry_tag))
        .or_else(|| manifest.packages().first())
        .ok_or(SynthesisError::NoPackage { registry: registry_tag })?;

    Ok(synthesize_package(package))
}

fn synthesize_remote(remote: &McpServerRemote) -> SynthesizedLaunchConfig {
    let mut collector = InputCollector::default();
    let mut headers = IndexMap::new();
    for header in remote.headers.iter().flatten() {
        let value = collector.key_value(header);
        headers.insert(header.name.clone(), value);
    }

    SynthesizedLaunchConfig {
        config: McpServerConfig::Remote(McpRemoteServerConfig {
            url: remote.url.clone(),
            headers: (!headers.is_empty()).then_some(headers),
        }),
        inputs: collector.inputs,
    }
}

fn synthesize_package(package: &McpServerPackage) -> SynthesizedLaunchConfig {
    let registry = PackageRegistry::from_tag(&package.registry_name);
    let rule = registry.rule();
    let mut collector = InputCollector::default();
    let mut args: Vec<String> = rule.map(|rule| rule.seed_args.iter().map(|arg| arg.to_string()).collect()).unwrap_or_default();
    let mut env = IndexMap::new();

    for argument in package.runtime_arguments.iter().flatten() {
        collector.argument(argument, &mut args);
    }

    for variable in package.environment_variables.iter().flatten() {
        let value = collector.key_value(variable);
        env.insert(variable.name.clone(), value);
        if let Some(flag) = rule.and_then(|rule| rule.env_flag) {
            args.push(flag.to_string());
            args.push(variable.name.clone());
        }
    }

    args.push(registry.package_identifier(&package.name, package.version.as_deref()));

    let package_arguments = package.package_arguments.as_deref().unwrap_or_default();
    if !package_arguments.is_empty()
        && let Some(separator) = rule.and_then(|rule| rule.package_argument_separator)
    {
        args.push(separator.to_string());
    }
    for argument in package_arguments {
        collector.argument(argument, &mut args);
    }

    SynthesizedLaunchConfig {
        config: McpServerConfig::Local(McpStdioServerConfig {
            command: registry.launcher().to_string(),
            args: (!args.is_empty()).then_some(args),
            env: (!env.is_empty()).then_some(env),
        }),
        inputs: collector.inputs,
    }
}

/// Accumulates declared variables as inputs, first declaration of an id wins.
#[derive(Debug, Default)]
struct InputCollector {
    inputs: Vec<McpServerVariableInput>,
}

impl InputCollector {
    fn push(&mut self, input: McpServerVariableInput) {
        if !self.inputs.iter().any(|existing| existing.id == input.id) {
            self.inputs.push(input);
        }
    }

    fn declare(&mut self, id: &str, variable: &McpServerVariable) {
        let choices = variable.choices.clone().filter(|choices| !choices.is_empty());
        self.push(McpServerVariableInput {
            id: id.to_string(),
            kind: if choices.is_some() { McpServerVariableType::Pick } else { McpServerVariableType::PromptString },
            description: variable.description.clone().unwrap_or_default(),
            password: variable.is_secret.unwrap_or(false),
            default: variable.default.clone(),
            options: choices,
        });
    }

    fn declare_all(&mut self, variables: Option<&McpServerVariables>) {
        for (id, variable) in variables.into_iter().flatten() {
            self.declare(id, variable);
        }
    }

    /// Declares `variables` and rewrites each `{id}` occurrence in `value` to `{input:id}`.
    fn substitute(&mut self, value: &str, variables: Option<&McpServerVariables>) -> String {
        self.declare_all(variables);
        let mut substituted = value.to_string();
        for id in variables.into_iter().flat_map(|variables| variables.keys()) {
            substituted = substituted.replace(&format!("{{{id}}}"), &input_reference(id));
        }
        substituted
    }

    fn argument(&mut self, argument: &McpServerArgument, args: &mut Vec<String>) {
        match argument {
            McpServerArgument::Positional {
                value,
                value_hint,
                variables,
                ..
            } => {
                match value.as_ref().or(value_hint.as_ref()) {
                    Some(arg) => args.push(self.substitute(arg, variables.as_ref())),
                    None => self.declare_all(variables.as_ref()),
                }
            }
            McpServerArgument::Named { name, value, variables, .. } => {
                args.push(name.clone());
                match value {
                    Some(value) => args.push(self.substitute(value, variables.as_ref())),
                    None => self.declare_all(variables.as_ref()),
                }
            }
        }
    }

    /// Resolved value of an environment variable or header.
    ///
    /// An entry without a value becomes an input of its own, keyed by its name.
    fn key_value(&mut self, entry: &McpServerKeyValueInput) -> String {
        match &entry.value {
            Some(value) => self.substitute(value, entry.variables.as_ref()),
            None => {
                self.declare_all(entry.variables.as_ref());
                self.push(McpServerVariableInput {
                    id: entry.name.clone(),
                    kind: McpServerVariableType::PromptString,
                    description: entry.description.clone().unwrap_or_default(),
                    password: entry.is_secret.unwrap_or(false),
                    default: entry.default.clone(),
                    options: None,
                });
                input_reference(&entry.name)
            }
        }
    }
}

fn input_reference(id: &str) -> String {
    format!("{{input:{id}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variables(entries: &[(&str, McpServerVariable)]) -> Option<McpServerVariables> {
        Some(entries.iter().map(|(id, variable)| (id.to_string(), variable.clone())).collect())
    }

    fn package(registry: &str, name: &str, version: Option<&str>) -> McpServerPackage {
        McpServerPackage {
            registry_name: registry.into(),
            name: name.into(),
            version: version.map(str::to_string),
            ..Default::default()
        }
    }

    fn manifest(packages: Vec<McpServerPackage>) -> McpServerManifest {
        McpServerManifest {
            packages: Some(packages),
            ..Default::default()
        }
    }

    fn local(config: &McpServerConfig) -> &McpStdioServerConfig {
        match config {
            McpServerConfig::Local(local) => local,
            McpServerConfig::Remote(_) => panic!("expected a local config"),
        }
    }

    #[test]
    fn npm_package_with_port_and_api_key() {
        let mut npm = package("npm", "pkg", Some("1.0.0"));
        npm.runtime_arguments = Some(vec![McpServerArgument::Named {
            name: "--port".into(),
            value: Some("{port}".into()),
            description: None,
            variables: variables(&[("port", McpServerVariable::default())]),
        }]);
        npm.environment_variables = Some(vec![McpServerKeyValueInput {
            name: "API_KEY".into(),
            value: Some("{key}".into()),
            variables: variables(&[(
                "key",
                McpServerVariable {
                    is_secret: Some(true),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![npm]), None).unwrap();
        let config = local(&synthesized.config);
        assert_eq!(config.command, "npx");
        assert_eq!(config.args.as_deref().unwrap(), ["--port", "{input:port}", "pkg@1.0.0"]);
        assert_eq!(config.env.as_ref().unwrap().get("API_KEY").unwrap(), "{input:key}");
        let ids: Vec<&str> = synthesized.inputs.iter().map(|input| input.id.as_str()).collect();
        assert_eq!(ids, ["port", "key"]);
        assert!(synthesized.inputs[1].password);
    }

    #[test]
    fn package_arguments_follow_identifier() {
        let mut npm = package("npm", "pkg", Some("1.0.0"));
        npm.package_arguments = Some(vec![McpServerArgument::Named {
            name: "--port".into(),
            value: Some("{port}".into()),
            description: None,
            variables: variables(&[("port", McpServerVariable::default())]),
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![npm]), Some("npm")).unwrap();
        assert_eq!(local(&synthesized.config).args.as_deref().unwrap(), ["pkg@1.0.0", "--port", "{input:port}"]);
    }

    #[test]
    fn docker_seeds_run_flags_and_env_switches() {
        let mut image = package("docker", "acme/weather", Some("2.1"));
        image.environment_variables = Some(vec![McpServerKeyValueInput {
            name: "TOKEN".into(),
            value: Some("{token}".into()),
            variables: variables(&[("token", McpServerVariable::default())]),
            ..Default::default()
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![image]), None).unwrap();
        let config = local(&synthesized.config);
        assert_eq!(config.command, "docker");
        assert_eq!(config.args.as_deref().unwrap(), ["run", "-i", "--rm", "-e", "TOKEN", "acme/weather:2.1"]);
        assert_eq!(config.env.as_ref().unwrap().get("TOKEN").unwrap(), "{input:token}");
    }

    #[test]
    fn registry_identifiers_and_launchers() {
        let cases = [
            ("npm", "npx", "pkg@1.0.0"),
            ("pypi", "uvx", "pkg==1.0.0"),
            ("docker", "docker", "pkg:1.0.0"),
            ("nuget", "dnx", "pkg@1.0.0"),
            ("cargo", "cargo", "pkg"),
        ];
        for (registry, launcher, identifier) in cases {
            let synthesized = synthesize_launch_config(&manifest(vec![package(registry, "pkg", Some("1.0.0"))]), None).unwrap();
            let config = local(&synthesized.config);
            assert_eq!(config.command, launcher, "launcher for {registry}");
            assert_eq!(config.args.as_ref().unwrap().last().unwrap(), identifier, "identifier for {registry}");
        }
    }

    #[test]
    fn unversioned_package_uses_plain_name() {
        let synthesized = synthesize_launch_config(&manifest(vec![package("pypi", "weather-mcp", None)]), None).unwrap();
        let config = local(&synthesized.config);
        assert_eq!(config.args.as_deref().unwrap(), ["weather-mcp"]);
        assert!(config.env.is_none());
        assert!(synthesized.inputs.is_empty());
    }

    #[test]
    fn nuget_separates_package_arguments() {
        let mut nuget = package("nuget", "Acme.Weather", Some("0.3.0"));
        nuget.package_arguments = Some(vec![McpServerArgument::Positional {
            value: None,
            value_hint: Some("stdio".into()),
            description: None,
            variables: None,
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![nuget]), None).unwrap();
        assert_eq!(local(&synthesized.config).args.as_deref().unwrap(), ["Acme.Weather@0.3.0", "--", "stdio"]);
    }

    #[test]
    fn value_hint_is_substituted_like_a_value() {
        let mut npm = package("npm", "pkg", None);
        npm.package_arguments = Some(vec![McpServerArgument::Positional {
            value: None,
            value_hint: Some("{dir}".into()),
            description: None,
            variables: variables(&[("dir", McpServerVariable::default())]),
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![npm]), None).unwrap();
        assert_eq!(local(&synthesized.config).args.as_deref().unwrap(), ["pkg", "{input:dir}"]);
        assert_eq!(synthesized.inputs[0].id, "dir");
    }

    #[test]
    fn selector_picks_matching_package_or_falls_back_to_first() {
        let packages = vec![package("npm", "pkg", Some("1.0.0")), package("pypi", "pkg", Some("1.0.0"))];

        let pypi = synthesize_launch_config(&manifest(packages.clone()), Some("pypi")).unwrap();
        assert_eq!(local(&pypi.config).command, "uvx");

        let fallback = synthesize_launch_config(&manifest(packages), Some("docker")).unwrap();
        assert_eq!(local(&fallback.config).command, "npx");
    }

    #[test]
    fn remote_headers_become_inputs() {
        let remote_manifest = McpServerManifest {
            remotes: Some(vec![McpServerRemote {
                transport_type: Some("streamable-http".into()),
                url: "https://weather.example.com/mcp".into(),
                headers: Some(vec![McpServerKeyValueInput {
                    name: "Authorization".into(),
                    value: Some("Bearer {token}".into()),
                    variables: variables(&[(
                        "token",
                        McpServerVariable {
                            is_secret: Some(true),
                            description: Some("Access token".into()),
                            ..Default::default()
                        },
                    )]),
                    ..Default::default()
                }]),
            }]),
            ..Default::default()
        };

        let synthesized = synthesize_launch_config(&remote_manifest, None).unwrap();
        let McpServerConfig::Remote(remote) = &synthesized.config else {
            panic!("expected a remote config");
        };
        assert_eq!(remote.url, "https://weather.example.com/mcp");
        assert_eq!(remote.headers.as_ref().unwrap().get("Authorization").unwrap(), "Bearer {input:token}");
        assert_eq!(synthesized.inputs[0].description, "Access token");
        assert!(synthesized.inputs[0].password);
    }

    #[test]
    fn remote_selector_without_remotes_uses_packages() {
        let synthesized = synthesize_launch_config(&manifest(vec![package("npm", "pkg", None)]), Some("remote")).unwrap();
        assert_eq!(local(&synthesized.config).command, "npx");
    }

    #[test]
    fn empty_manifest_is_an_error() {
        assert_eq!(
            synthesize_launch_config(&McpServerManifest::default(), None),
            Err(SynthesisError::NoDistribution)
        );
        assert!(matches!(
            synthesize_launch_config(&McpServerManifest::default(), Some("npm")),
            Err(SynthesisError::NoPackage { .. })
        ));
    }

    #[test]
    fn every_occurrence_is_substituted_and_inputs_dedupe() {
        let mut npm = package("npm", "pkg", None);
        npm.package_arguments = Some(vec![
            McpServerArgument::Positional {
                value: Some("{dir}:{dir}".into()),
                value_hint: None,
                description: None,
                variables: variables(&[(
                    "dir",
                    McpServerVariable {
                        default: Some("/first".into()),
                        ..Default::default()
                    },
                )]),
            },
            McpServerArgument::Named {
                name: "--mode".into(),
                value: Some("{dir}-{mode}".into()),
                description: None,
                variables: variables(&[
                    (
                        "dir",
                        McpServerVariable {
                            default: Some("/second".into()),
                            ..Default::default()
                        },
                    ),
                    (
                        "mode",
                        McpServerVariable {
                            choices: Some(vec!["fast".into(), "safe".into()]),
                            ..Default::default()
                        },
                    ),
                ]),
            },
        ]);

        let synthesized = synthesize_launch_config(&manifest(vec![npm]), None).unwrap();
        let args = local(&synthesized.config).args.clone().unwrap();
        assert_eq!(args, ["pkg", "{input:dir}:{input:dir}", "--mode", "{input:dir}-{input:mode}"]);
        assert!(args.iter().all(|arg| !arg.contains("{dir}") && !arg.contains("{mode}")));

        assert_eq!(synthesized.inputs.len(), 2);
        assert_eq!(synthesized.inputs[0].default.as_deref(), Some("/first"));
        assert_eq!(synthesized.inputs[1].kind, McpServerVariableType::Pick);
        assert_eq!(synthesized.inputs[1].options.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn environment_variable_without_value_is_prompted() {
        let mut npm = package("npm", "pkg", None);
        npm.environment_variables = Some(vec![McpServerKeyValueInput {
            name: "GITHUB_TOKEN".into(),
            description: Some("Personal access token".into()),
            is_secret: Some(true),
            ..Default::default()
        }]);

        let synthesized = synthesize_launch_config(&manifest(vec![npm]), None).unwrap();
        let config = local(&synthesized.config);
        assert_eq!(config.env.as_ref().unwrap().get("GITHUB_TOKEN").unwrap(), "{input:GITHUB_TOKEN}");
        assert_eq!(synthesized.inputs[0].id, "GITHUB_TOKEN");
        assert!(synthesized.inputs[0].password);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let mut npm = package("npm", "pkg", Some("1.0.0"));
        npm.environment_variables = Some(vec![McpServerKeyValueInput {
            name: "A".into(),
            value: Some("{a}".into()),
            variables: variables(&[("a", McpServerVariable::default())]),
            ..Default::default()
        }]);
        let manifest = manifest(vec![npm]);

        let first = synthesize_launch_config(&manifest, Some("npm")).unwrap();
        let second = synthesize_launch_config(&manifest, Some("npm")).unwrap();
        assert_eq!(serde_json::to_string(&first.config).unwrap(), serde_json::to_string(&second.config).unwrap());
        assert_eq!(first.inputs, second.inputs);
    }
}
