use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{diff::DEFAULT_IGNORED_PATHS, logger, resource::DEFAULT_SCAN_EXCLUDES};

pub const PROJECT_CONFIG_FILE: &str = ".monokle";

pub const ENV_PREFIX: &str = "MONOKLE_";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum ConfigLoadOption {
    #[default]
    Default,

    Path(PathBuf),
}

/// Namespace a context is allowed to be queried in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ClusterAccess {
    pub context: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub kube_config_path: Option<PathBuf>,
    pub current_context: Option<String>,
    pub cluster_access: Vec<ClusterAccess>,
    pub use_kubectl_proxy: bool,
    pub hide_ignored_fields: bool,
    pub ignored_paths: Vec<String>,
    pub scan_excludes: Vec<String>,
    pub file_includes: Vec<String>,
    pub warn_on_partial_load: bool,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kube_config_path: None,
            current_context: None,
            cluster_access: Vec::new(),
            use_kubectl_proxy: false,
            hide_ignored_fields: true,
            ignored_paths: DEFAULT_IGNORED_PATHS.iter().map(ToString::to_string).collect(),
            scan_excludes: DEFAULT_SCAN_EXCLUDES.iter().map(ToString::to_string).collect(),
            file_includes: Vec::new(),
            warn_on_partial_load: false,
            log_level: None,
        }
    }
}

impl Settings {
    pub fn access_namespaces(&self, context: &str) -> Vec<String> {
        access_namespaces(&self.cluster_access, context)
    }
}

/// Namespaces configured for `context`, in order and without repeats.
pub fn access_namespaces(cluster_access: &[ClusterAccess], context: &str) -> Vec<String> {
    let mut namespaces: Vec<String> = Vec::new();

    for access in cluster_access.iter().filter(|a| a.context == context) {
        if !namespaces.contains(&access.namespace) {
            namespaces.push(access.namespace.clone());
        }
    }

    namespaces
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct ProjectKubeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
}

/// `.monokle` file kept in the project root. Only present keys override
/// the global settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct ProjectConfig {
    #[serde(default, skip_serializing)]
    pub kube_config: ProjectKubeConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_access: Option<Vec<ClusterAccess>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_excludes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_includes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_kubectl_proxy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_ignored_fields: Option<bool>,
}

impl ProjectConfig {
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(PROJECT_CONFIG_FILE);

        if !path.try_exists()? {
            return Ok(None);
        }

        let project = Figment::from(Json::file(&path)).extract()?;

        Ok(Some(project))
    }

    /// The overriding part in the shape of [`Settings`].
    fn overrides(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(self));

        if let Some(path) = &self.kube_config.path {
            figment = figment.merge(Serialized::default("kube_config_path", path));
        }

        if let Some(context) = &self.kube_config.current_context {
            figment = figment.merge(Serialized::default("current_context", context));
        }

        figment
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub settings: Settings,
    global_kube_config_path: Option<PathBuf>,
    project_kube_config_path: Option<PathBuf>,
}

impl Config {
    /// Layers defaults, the global YAML file, the project `.monokle` file and
    /// `MONOKLE_*` environment variables, later layers winning.
    pub fn load(option: ConfigLoadOption, project_root: Option<&Path>) -> Result<Self> {
        let global = match option {
            ConfigLoadOption::Default => Figment::new(),
            ConfigLoadOption::Path(path) => Figment::from(Yaml::file(path)),
        };

        let global_kube_config_path: Option<PathBuf> =
            global.extract_inner("kube_config_path").ok();

        let project = match project_root {
            Some(root) => ProjectConfig::load(root)?,
            None => None,
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(global);

        if let Some(project) = &project {
            figment = figment.merge(project.overrides());
        }

        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract_lossy()?;

        logger!(debug, "settings loaded {:?}", settings);

        Ok(Self {
            settings,
            global_kube_config_path,
            project_kube_config_path: project.and_then(|p| p.kube_config.path),
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Puts `path` ahead of every other kubeconfig candidate.
    pub fn prefer_kubeconfig(&mut self, path: PathBuf) {
        self.project_kube_config_path = Some(path);
    }

    /// Kubeconfig files to merge, most specific first.
    pub fn kubeconfig_paths(&self) -> Vec<PathBuf> {
        kubeconfig_candidates(
            self.project_kube_config_path.as_deref(),
            self.global_kube_config_path
                .as_deref()
                .or(self.settings.kube_config_path.as_deref()),
            std::env::var_os("KUBECONFIG"),
        )
    }
}

/// Candidates from project settings, global settings and `KUBECONFIG`,
/// without repeats. Falls back to `~/.kube/config`.
pub fn kubeconfig_candidates(
    project: Option<&Path>,
    global: Option<&Path>,
    env: Option<OsString>,
) -> Vec<PathBuf> {
    let from_env: Vec<PathBuf> = env
        .map(|value| {
            std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut candidates: Vec<PathBuf> = Vec::new();

    for path in project
        .into_iter()
        .chain(global)
        .map(Path::to_path_buf)
        .chain(from_env)
    {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }

    if candidates.is_empty() {
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".kube").join("config"));
        }
    }

    candidates
}

pub fn xdg_config_home() -> Option<PathBuf> {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => Some(PathBuf::from(path).join("monokle")),
        None => dirs::home_dir().map(|home| home.join(".config").join("monokle")),
    }
}
