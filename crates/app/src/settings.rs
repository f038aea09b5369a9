use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::harness::{
    Backend, LifecycleError, LogPolicy, ReadinessProber, Tools, select_backend, workspace_root,
};

static APP_NAME: &str = "analytics-integration";

/// Prefix for environment overrides, e.g. `ANALYTICS_IT_DUMP_LOGS=yes`.
pub const ENV_PREFIX: &str = "ANALYTICS_IT_";

/// A boolean setting as it arrives from TOML, the environment or the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FlagValue {
    fn as_text(&self) -> String {
        match self {
            FlagValue::Bool(value) => value.to_string(),
            FlagValue::Int(value) => value.to_string(),
            FlagValue::Text(value) => value.clone(),
        }
    }
}

/// Parse a boolean setting: `1/yes/true/on` or `""/0/no/false/off`, case-insensitive.
///
/// Surrounding whitespace is not stripped; `" yes"` is rejected.
pub fn parse_bool_setting(name: &str, raw: &str) -> Result<bool, LifecycleError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "" | "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(LifecycleError::Configuration(format!(
            "{raw:?} is not a valid option for boolean setting {name:?}"
        ))),
    }
}

fn flag(name: &str, value: Option<&FlagValue>) -> Result<bool, LifecycleError> {
    match value {
        Some(value) => parse_bool_setting(name, &value.as_text()),
        None => Ok(false),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Cluster manifest path; when set the cluster backend replaces compose.
    #[serde(default)]
    pub kubernetes_dir: Option<Utf8PathBuf>,
    #[serde(default = "default_compose_file")]
    pub compose_file: Utf8PathBuf,
    #[serde(default = "default_compose_program")]
    pub compose_program: Vec<String>,
    #[serde(default)]
    pub compose_project: Option<String>,
    #[serde(default = "default_kubectl_program")]
    pub kubectl_program: String,
    #[serde(default = "default_docker_program")]
    pub docker_program: String,
    #[serde(default = "default_coreapi_url")]
    pub coreapi_url: String,
    #[serde(default = "default_anitya_url")]
    pub anitya_url: String,
    #[serde(default)]
    pub dump_logs: Option<FlagValue>,
    #[serde(default)]
    pub dump_errors: Option<FlagValue>,
    #[serde(default)]
    pub tail_logs: u32,
    /// Seconds to let the system settle once it first reports ready.
    #[serde(default = "default_breath_time")]
    pub breath_time: u64,
    /// Seconds to wait for readiness on start and restart.
    #[serde(default = "default_wait_for_server")]
    pub wait_for_server: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sudo_volume_reset")]
    pub sudo_volume_reset: bool,
    #[serde(default)]
    pub logs_dir: Option<Utf8PathBuf>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            kubernetes_dir: None,
            compose_file: default_compose_file(),
            compose_program: default_compose_program(),
            compose_project: None,
            kubectl_program: default_kubectl_program(),
            docker_program: default_docker_program(),
            coreapi_url: default_coreapi_url(),
            anitya_url: default_anitya_url(),
            dump_logs: None,
            dump_errors: None,
            tail_logs: 0,
            breath_time: default_breath_time(),
            wait_for_server: default_wait_for_server(),
            poll_interval_ms: default_poll_interval_ms(),
            sudo_volume_reset: default_sudo_volume_reset(),
            logs_dir: None,
        }
    }
}

fn default_compose_file() -> Utf8PathBuf {
    Utf8PathBuf::from("docker-compose.yml")
}

fn default_compose_program() -> Vec<String> {
    vec!["docker-compose".into()]
}

fn default_kubectl_program() -> String {
    "kubectl".into()
}

fn default_docker_program() -> String {
    "docker".into()
}

fn default_coreapi_url() -> String {
    "http://localhost:32000/".into()
}

fn default_anitya_url() -> String {
    "http://localhost:31005/".into()
}

fn default_breath_time() -> u64 {
    5
}

fn default_wait_for_server() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_sudo_volume_reset() -> bool {
    true
}

/// Validated settings the lifecycle controller and scenario hooks are built from.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub backend: Backend,
    pub tools: Tools,
    pub api_url: String,
    pub anitya_url: String,
    pub prober: ReadinessProber,
    pub wait_timeout: Duration,
    pub sudo_volume_reset: bool,
    pub logs: LogPolicy,
}

impl HarnessSettings {
    pub fn resolve(&self) -> Result<HarnessConfig, LifecycleError> {
        let dump_logs = flag("dump_logs", self.dump_logs.as_ref())?;
        let dump_errors = flag("dump_errors", self.dump_errors.as_ref())?;
        if self.poll_interval_ms == 0 {
            return Err(LifecycleError::Configuration(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }

        let tools = Tools {
            compose: self.compose_program.clone(),
            kubectl: self.kubectl_program.clone(),
            docker: self.docker_program.clone(),
        };
        let backend = select_backend(
            self.kubernetes_dir.as_deref(),
            Some(self.compose_file.as_path()),
            self.compose_project.clone(),
            &tools,
        )?;

        Ok(HarnessConfig {
            backend,
            tools,
            api_url: add_slash(&self.coreapi_url),
            anitya_url: add_slash(&self.anitya_url),
            prober: ReadinessProber::new(
                Duration::from_millis(self.poll_interval_ms),
                Duration::from_secs(self.breath_time),
            ),
            wait_timeout: Duration::from_secs(self.wait_for_server),
            sudo_volume_reset: self.sudo_volume_reset,
            logs: LogPolicy::new(
                dump_logs,
                dump_errors,
                self.tail_logs,
                self.logs_dir.clone(),
            ),
        })
    }
}

fn add_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Split a `key=value` override. Integers and `true`/`false` keep their type.
pub fn parse_override(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("override {raw:?} must look like key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("override {raw:?} has an empty key");
    }
    let value = if let Ok(number) = value.parse::<i64>() {
        serde_json::Value::from(number)
    } else if let Ok(flag) = value.parse::<bool>() {
        serde_json::Value::Bool(flag)
    } else {
        serde_json::Value::String(value.to_string())
    };
    Ok((key.to_string(), value))
}

/// Layer defaults < TOML file < `ANALYTICS_IT_*` environment < explicit overrides.
pub fn load_settings(
    explicit_path: Option<&Utf8Path>,
    overrides: &[(String, serde_json::Value)],
) -> Result<HarnessSettings> {
    let mut figment = Figment::from(Serialized::defaults(HarnessSettings::default()));

    if let Some(path) = explicit_path {
        if !path.exists() {
            anyhow::bail!("config file not found at {path}");
        }
        figment = figment.merge(Toml::file(path));
    } else if let Some(path) = resolve_default_config_path() {
        figment = figment.merge(Toml::file(path));
    } else {
        warn!("no config file found; relying on defaults + env overrides");
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX));
    for (key, value) in overrides {
        figment = figment.merge(Serialized::default(key.as_str(), value.clone()));
    }

    figment
        .extract()
        .context("failed to load analytics-integration configuration")
}

fn resolve_default_config_path() -> Option<Utf8PathBuf> {
    let repo_relative = workspace_root().join("config/integration.toml");
    if repo_relative.exists() {
        return Some(repo_relative);
    }

    if let Some(dirs) = ProjectDirs::from("io", "Analytics", APP_NAME)
        && let Ok(path) = Utf8PathBuf::from_path_buf(dirs.config_dir().join("config.toml"))
        && path.exists()
    {
        return Some(path);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_settings_accept_documented_spellings() {
        for raw in ["1", "yes", "true", "on", "YES", "On"] {
            assert!(parse_bool_setting("dump_logs", raw).unwrap(), "{raw}");
        }
        for raw in ["", "0", "no", "false", "off", "Off"] {
            assert!(!parse_bool_setting("dump_logs", raw).unwrap(), "{raw}");
        }
    }

    #[test]
    fn boolean_settings_reject_anything_else() {
        for raw in ["2", "maybe", "y", "enabled", " yes", "on ", "\tfalse", " "] {
            let err = parse_bool_setting("dump_errors", raw).unwrap_err();
            assert!(matches!(err, LifecycleError::Configuration(_)));
            assert!(err.to_string().contains("dump_errors"));
        }
    }

    #[test]
    fn typed_flag_values_are_parsed_like_text() {
        assert!(flag("x", Some(&FlagValue::Bool(true))).unwrap());
        assert!(flag("x", Some(&FlagValue::Int(1))).unwrap());
        assert!(!flag("x", Some(&FlagValue::Int(0))).unwrap());
        assert!(flag("x", Some(&FlagValue::Int(7))).is_err());
        assert!(!flag("x", None).unwrap());
    }

    #[test]
    fn defaults_resolve_to_compose_backend() {
        let config = HarnessSettings::default().resolve().unwrap();
        assert_eq!(config.backend.kind(), "compose");
        assert_eq!(config.api_url, "http://localhost:32000/");
        assert_eq!(config.wait_timeout, Duration::from_secs(60));
        assert_eq!(config.prober.settle(), Duration::from_secs(5));
        assert_eq!(config.prober.tick(), Duration::from_secs(1));
        assert_eq!(config.logs.tail, 50);
        assert!(!config.logs.dump_logs);
    }

    #[test]
    fn kubernetes_dir_selects_cluster_backend() {
        let settings = HarnessSettings {
            kubernetes_dir: Some("/srv/kubernetes".into()),
            coreapi_url: "http://api:32000".into(),
            ..HarnessSettings::default()
        };
        let config = settings.resolve().unwrap();
        assert_eq!(config.backend.kind(), "cluster");
        assert_eq!(config.api_url, "http://api:32000/");
    }

    #[test]
    fn service_urls_gain_trailing_slash() {
        let settings = HarnessSettings {
            anitya_url: "http://anitya:31005".into(),
            ..HarnessSettings::default()
        };
        let config = settings.resolve().unwrap();
        assert_eq!(config.anitya_url, "http://anitya:31005/");
        assert_eq!(
            HarnessSettings::default().resolve().unwrap().anitya_url,
            "http://localhost:31005/"
        );
    }

    #[test]
    fn invalid_flag_aborts_resolution() {
        let settings = HarnessSettings {
            dump_logs: Some(FlagValue::Text("sometimes".into())),
            ..HarnessSettings::default()
        };
        assert!(matches!(
            settings.resolve(),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[test]
    fn overrides_keep_numbers_and_text() {
        assert_eq!(
            parse_override("tail_logs=20").unwrap(),
            ("tail_logs".to_string(), serde_json::json!(20))
        );
        assert_eq!(
            parse_override("dump_errors=yes").unwrap(),
            ("dump_errors".to_string(), serde_json::json!("yes"))
        );
        assert!(parse_override("missing-equals").is_err());
        assert!(parse_override("=value").is_err());
    }
}
