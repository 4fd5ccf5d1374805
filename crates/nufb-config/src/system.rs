//! System configuration parsing.
//!
//! The system configuration is a KDL document describing the shared flatpak
//! repository, where builds happen and which apps belong to which branch.

use crate::substitution::expand_path;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default file name of the system configuration.
pub const DEFAULT_CONFIG_FILE: &str = "nufb.kdl";
/// Environment variable overriding the configuration path.
pub const CONFIG_ENV_VAR: &str = "NUFB_CONFIG";

const DEFAULT_BRANCH: &str = "stable";
const DEFAULT_BUILD_ROOT_NAME: &str = "nuvola-flatpaks";

/// System-wide configuration, constructed once and passed explicitly to every
/// component that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub repository: RepositoryConfig,
    pub build: BuildSettings,
    pub apps: AppLists,
    pub tools: ToolSettings,
}

/// The shared flatpak repository builds are exported to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository directory.
    pub path: PathBuf,
    /// GPG key used to sign commits and the summary.
    pub key_id: String,
    /// Title of the repository.
    pub name: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Root of build directories and the shared flatpak-builder state.
    pub root: PathBuf,
    /// Directory with local sources referenced by manifests.
    pub resources: PathBuf,
    /// Directory with `<branch>/<id>.yaml` manifests.
    pub manifests: PathBuf,
    /// Upper bound of concurrently running tasks in a batch.
    pub concurrency: Option<usize>,
}

/// Per-branch lists of app names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLists {
    pub default: Option<Vec<String>>,
    pub branches: BTreeMap<String, Vec<String>>,
}

impl AppLists {
    /// Apps of `branch`, falling back to the default list.
    pub fn apps_for_branch(&self, branch: &str) -> &[String] {
        self.branches
            .get(branch)
            .or(self.default.as_ref())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Names of the external programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    pub builder: String,
    pub flatpak: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            builder: "flatpak-builder".to_string(),
            flatpak: "flatpak".to_string(),
        }
    }
}

/// Resolve the configuration file path from an explicit argument, the
/// environment, or the default file name.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
    }
}

/// Read and parse the system configuration file.
pub async fn load_system_config(path: &Path) -> ConfigResult<SystemConfig> {
    debug!(path = %path.display(), "Loading system configuration");
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut repository = None;
    let mut build = None;
    let mut apps = None;
    let mut tools = None;

    for node in doc.nodes() {
        match node.name().value() {
            "repository" => set_once(&mut repository, "repository", parse_repository(node)?)?,
            "build" => set_once(&mut build, "build", parse_build(node)?)?,
            "apps" => set_once(&mut apps, "apps", parse_apps(node)?)?,
            "tools" => set_once(&mut tools, "tools", parse_tools(node))?,
            _ => {} // Ignore unknown nodes
        }
    }

    let repository =
        repository.ok_or_else(|| ConfigError::MissingField("repository".to_string()))?;
    let build = match build {
        Some(build) => build,
        None => parse_build(&KdlNode::new("build"))?,
    };

    Ok(SystemConfig {
        repository,
        build,
        apps: apps.unwrap_or_default(),
        tools: tools.unwrap_or_default(),
    })
}

fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> ConfigResult<()> {
    if slot.is_some() {
        return Err(ConfigError::Duplicate(name.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_repository(node: &KdlNode) -> ConfigResult<RepositoryConfig> {
    let path = get_child_string(node, "path")
        .ok_or_else(|| ConfigError::MissingField("repository path".to_string()))?;
    let key_id = get_child_string(node, "key-id")
        .ok_or_else(|| ConfigError::MissingField("repository key-id".to_string()))?;
    let name = get_child_string(node, "name")
        .ok_or_else(|| ConfigError::MissingField("repository name".to_string()))?;
    let default_branch =
        get_child_string(node, "default-branch").unwrap_or_else(|| DEFAULT_BRANCH.to_string());

    Ok(RepositoryConfig {
        path: expand_path(&path),
        key_id,
        name,
        default_branch,
    })
}

fn parse_build(node: &KdlNode) -> ConfigResult<BuildSettings> {
    let root = match get_child_string(node, "root") {
        Some(root) => expand_path(&root),
        None => default_build_root(),
    };
    let resources = expand_path(&get_child_string(node, "resources").unwrap_or_else(|| "data".to_string()));
    let manifests =
        expand_path(&get_child_string(node, "manifests").unwrap_or_else(|| "manifests".to_string()));

    let concurrency = match find_child(node, "concurrency") {
        None => None,
        Some(child) => {
            let value = child
                .entries()
                .iter()
                .find(|e| e.name().is_none())
                .and_then(|e| e.value().as_integer());
            match value {
                Some(n) if n > 0 => Some(usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
                    field: "build concurrency".to_string(),
                    message: format!("{n} is too large"),
                })?),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "build concurrency".to_string(),
                        message: "expected a positive integer".to_string(),
                    });
                }
            }
        }
    };

    Ok(BuildSettings {
        root,
        resources,
        manifests,
        concurrency,
    })
}

fn default_build_root() -> PathBuf {
    let cache = dirs::cache_dir().unwrap_or_else(|| expand_path("~/.cache"));
    cache.join(DEFAULT_BUILD_ROOT_NAME)
}

fn parse_apps(node: &KdlNode) -> ConfigResult<AppLists> {
    let mut lists = AppLists::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "default" => {
                    if lists.default.is_some() {
                        return Err(ConfigError::Duplicate("apps default".to_string()));
                    }
                    lists.default = Some(get_all_string_args(child));
                }
                "branch" => {
                    let mut args = get_all_string_args(child).into_iter();
                    let branch = args
                        .next()
                        .ok_or_else(|| ConfigError::MissingField("apps branch name".to_string()))?;
                    if lists.branches.contains_key(&branch) {
                        return Err(ConfigError::Duplicate(format!("apps branch '{}'", branch)));
                    }
                    lists.branches.insert(branch, args.collect());
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "apps".to_string(),
                        message: format!("unknown entry: {}", other),
                    });
                }
            }
        }
    }

    Ok(lists)
}

fn parse_tools(node: &KdlNode) -> ToolSettings {
    let defaults = ToolSettings::default();
    ToolSettings {
        builder: get_child_string(node, "builder").unwrap_or(defaults.builder),
        flatpak: get_child_string(node, "flatpak").unwrap_or(defaults.flatpak),
    }
}

// Helper functions for extracting values from KDL nodes

fn find_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

fn get_child_string(node: &KdlNode, name: &str) -> Option<String> {
    find_child(node, name).and_then(get_first_string_arg)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        repository {
            path "/srv/flatpak/repo"
            key-id "0123ABCD"
            name "Nuvola Apps"
            default-branch "master"
        }
        build {
            root "/var/cache/nufb"
            resources "/srv/nuvola/data"
            manifests "/srv/nuvola/manifests"
            concurrency 4
        }
        apps {
            default "deezer" "spotify"
            branch "master" "deezer" "tidal"
        }
        tools {
            builder "/usr/local/bin/flatpak-builder"
        }
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_system_config(FULL).unwrap();
        assert_eq!(config.repository.path, PathBuf::from("/srv/flatpak/repo"));
        assert_eq!(config.repository.key_id, "0123ABCD");
        assert_eq!(config.repository.name, "Nuvola Apps");
        assert_eq!(config.repository.default_branch, "master");
        assert_eq!(config.build.root, PathBuf::from("/var/cache/nufb"));
        assert_eq!(config.build.concurrency, Some(4));
        assert_eq!(config.tools.builder, "/usr/local/bin/flatpak-builder");
        assert_eq!(config.tools.flatpak, "flatpak");
    }

    #[test]
    fn test_defaults() {
        let config = parse_system_config(
            r#"
            repository {
                path "/srv/repo"
                key-id "KEY"
                name "Repo"
            }
            "#,
        )
        .unwrap();
        assert_eq!(config.repository.default_branch, "stable");
        assert!(config.build.root.ends_with("nuvola-flatpaks"));
        assert!(config.build.resources.is_absolute());
        assert!(config.build.resources.ends_with("data"));
        assert!(config.build.manifests.ends_with("manifests"));
        assert_eq!(config.build.concurrency, None);
        assert!(config.apps.apps_for_branch("master").is_empty());
        assert_eq!(config.tools, ToolSettings::default());
    }

    #[test]
    fn test_apps_for_branch() {
        let config = parse_system_config(FULL).unwrap();
        assert_eq!(config.apps.apps_for_branch("master"), ["deezer", "tidal"]);
        assert_eq!(config.apps.apps_for_branch("stable"), ["deezer", "spotify"]);

        let lists = AppLists {
            default: None,
            branches: BTreeMap::from([("master".to_string(), vec!["deezer".to_string()])]),
        };
        assert!(lists.apps_for_branch("stable").is_empty());
    }

    #[test]
    fn test_missing_repository_fields() {
        let result = parse_system_config(r#"repository { path "/srv/repo"; name "Repo"; }"#);
        assert!(matches!(result, Err(ConfigError::MissingField(field)) if field.contains("key-id")));

        let result = parse_system_config("build { concurrency 2; }");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_invalid_concurrency() {
        let kdl = r#"
            repository { path "/r"; key-id "K"; name "N"; }
            build { concurrency 0; }
        "#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_duplicate_blocks() {
        let kdl = r#"
            repository { path "/r"; key-id "K"; name "N"; }
            repository { path "/r"; key-id "K"; name "N"; }
        "#;
        assert!(matches!(parse_system_config(kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_config_path() {
        assert_eq!(
            config_path(Some(Path::new("/etc/nufb.kdl"))),
            PathBuf::from("/etc/nufb.kdl")
        );
    }

    #[tokio::test]
    async fn test_load_system_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nufb.kdl");
        tokio::fs::write(&path, FULL).await.unwrap();

        let config = load_system_config(&path).await.unwrap();
        assert_eq!(config.repository.name, "Nuvola Apps");

        let err = load_system_config(&dir.path().join("missing.kdl")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
