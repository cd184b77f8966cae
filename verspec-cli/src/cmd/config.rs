use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use verspec_core::{VersionDecl, VersionError, VersionGraph};
use verspec_exec::ExecutorConfig;

use crate::ExecArgs;

pub const CONFIG_FILE: &str = "verspec.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{CONFIG_FILE} declares no versions")]
    NoVersions,
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// `verspec.yaml` at the project root. Every field is optional; a missing
/// file is an empty config.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: Vec<VersionDecl>,
}

impl ProjectConfig {
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn version_graph(&self) -> Result<VersionGraph, ConfigError> {
        if self.versions.is_empty() {
            return Err(ConfigError::NoVersions);
        }
        Ok(VersionGraph::new(self.versions.clone())?)
    }
}

/// Why executor settings could not be built from flags and config.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid base URL `{value}`: {source}")]
    BaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid --var `{0}` (expected KEY=VALUE)")]
    Var(String),
}

/// Flags win over `VERSPEC_BASE_URL`, which wins over the config file.
pub fn build_executor_config(
    exec: &ExecArgs,
    config: &ProjectConfig,
) -> Result<ExecutorConfig, SettingsError> {
    let defaults = ExecutorConfig::default();

    let base_url = exec
        .base_url
        .clone()
        .or_else(|| std::env::var("VERSPEC_BASE_URL").ok().filter(|v| !v.is_empty()))
        .or_else(|| config.base_url.clone())
        .map(|value| Url::parse(&value).map_err(|source| SettingsError::BaseUrl { value, source }))
        .transpose()?;

    let mut variables = config.variables.clone();
    for s in &exec.vars {
        match s.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                variables.insert(k.trim().to_string(), v.to_string());
            }
            _ => return Err(SettingsError::Var(s.clone())),
        }
    }

    Ok(ExecutorConfig {
        concurrency: exec
            .concurrency
            .or(config.concurrency)
            .unwrap_or(defaults.concurrency),
        timeout: exec
            .timeout
            .or(config.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
        max_response_bytes: config
            .max_response_bytes
            .unwrap_or(defaults.max_response_bytes),
        keep_going: exec.keep_going,
        base_url,
        variables,
    })
}
