//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level devops-pack configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    5555
}

/// How `run_script` requests are executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Shell command run for every request (via `sh -c`). Unset means the
    /// gateway only prepares credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Timeout in milliseconds for the command (default: 1 hour).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Where the `[default]` AWS profile is written (default: `~/.devops_pack/aws`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_dir: Option<String>,

    #[serde(default = "default_project")]
    pub default_project: String,

    #[serde(default = "default_region")]
    pub default_region: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_ms: default_timeout_ms(),
            credentials_dir: None,
            default_project: default_project(),
            default_region: default_region(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    3_600_000
}

fn default_project() -> String {
    "dev-ops-tools-pack".into()
}

fn default_region() -> String {
    "eu-central-1".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "devops_pack_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::DevopsPackError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::DevopsPackError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Runner settings, with defaults when the section is absent.
    pub fn runner(&self) -> RunnerConfig {
        self.runner.clone().unwrap_or_default()
    }

    /// Directory the `[default]` AWS profile is written to.
    pub fn credentials_dir(&self) -> PathBuf {
        self.runner
            .as_ref()
            .and_then(|r| r.credentials_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("aws"))
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "runner.default_region").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        match &self.runner {
            Some(runner) => {
                if runner.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    warnings.push(
                        "No runner command configured; runs will only prepare credentials"
                            .to_string(),
                    );
                }
                if runner.timeout_ms == 0 {
                    errors.push("Runner timeout_ms cannot be 0".to_string());
                }
            }
            None => warnings.push(
                "No runner section configured; runs will only prepare credentials".to_string(),
            ),
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                errors.push(format!("Unknown log format: {}", logging.format));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                errors.push(format!("Unknown log output: {}", logging.output));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for devops-pack data: `~/.devops_pack/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devops_pack")
}
