//! Configuration resolution for hcb-analyzer
//!
//! Priority: CLI → ENV → TOML → built-in defaults. CLI arguments are
//! handled in `main`; this module covers the TOML schema and ENV overrides.

use hcb_common::config::LoggingConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::models::AnalysisKind;
use crate::services::process_runner::ProcessInvocation;

/// Module name used for the default config file name and logs
pub const MODULE_NAME: &str = "hcb-analyzer";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder for staging and artifacts (optional)
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// External analysis engine invocation
///
/// The artifact path is appended after the kind-specific leading args.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub beat_grid_args: Vec<String>,
    pub feature_set_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let program = if cfg!(target_os = "windows") {
            PathBuf::from("scripts").join("venv").join("Scripts").join("python.exe")
        } else {
            PathBuf::from("scripts").join("venv").join("bin").join("python")
        };

        Self {
            program,
            beat_grid_args: vec!["scripts/GenerateBeatgrid.py".to_string()],
            feature_set_args: vec!["scripts/ExtractFeatures.py".to_string()],
            working_dir: None,
            timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Per-invocation process configuration for an analysis kind
    pub fn invocation(&self, kind: AnalysisKind) -> ProcessInvocation {
        let args = match kind {
            AnalysisKind::BeatGrid => &self.beat_grid_args,
            AnalysisKind::FeatureSet => &self.feature_set_args,
        };

        ProcessInvocation {
            program: self.program.clone(),
            args: args.iter().map(Into::into).collect(),
            working_dir: self.working_dir.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

/// Object storage collaborator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL, e.g. `https://project.supabase.co`; unset disables storage
    pub url: Option<String>,
    pub bucket: String,
    pub api_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            bucket: "songs".to_string(),
            api_key: None,
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_chunk_bytes: u64,
    pub max_body_bytes: usize,
    /// Sessions untouched for this long are purged
    pub stale_session_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 8 * 1024 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
            stale_session_secs: 24 * 60 * 60,
        }
    }
}

impl TomlConfig {
    /// Apply environment overrides on top of TOML values
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_value("HCB_STORAGE_URL") {
            info!("Storage URL loaded from environment variable");
            self.storage.url = Some(url);
        }
        if let Some(bucket) = env_value("HCB_STORAGE_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(key) = env_value("HCB_STORAGE_API_KEY") {
            info!("Storage API key loaded from environment variable");
            self.storage.api_key = Some(key);
        }
        if let Some(program) = env_value("HCB_ENGINE_PROGRAM") {
            self.engine.program = PathBuf::from(program);
        }
        if let Some(secs) = env_value("HCB_ENGINE_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => self.engine.timeout_secs = secs,
                Err(_) => tracing::warn!(
                    value = %secs,
                    "Ignoring invalid HCB_ENGINE_TIMEOUT_SECS"
                ),
            }
        }
    }
}

/// Non-blank environment value
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
[engine]
program = "/usr/bin/python3"
timeout_secs = 30

[storage]
url = "https://example.supabase.co"
"#,
        )
        .unwrap();

        assert_eq!(config.engine.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(config.engine.beat_grid_args, vec!["scripts/GenerateBeatgrid.py"]);
        assert_eq!(config.storage.bucket, "songs");
        assert_eq!(config.server.port, 5730);
        assert_eq!(config.uploads.max_chunk_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_invocation_per_kind() {
        let engine = EngineConfig {
            timeout_secs: 12,
            ..Default::default()
        };

        let beat = engine.invocation(AnalysisKind::BeatGrid);
        assert_eq!(beat.args, vec![std::ffi::OsString::from("scripts/GenerateBeatgrid.py")]);
        assert_eq!(beat.timeout, Duration::from_secs(12));

        let features = engine.invocation(AnalysisKind::FeatureSet);
        assert_eq!(features.args, vec![std::ffi::OsString::from("scripts/ExtractFeatures.py")]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_storage_and_timeout() {
        std::env::set_var("HCB_STORAGE_API_KEY", "secret");
        std::env::set_var("HCB_ENGINE_TIMEOUT_SECS", "45");

        let mut config = TomlConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("HCB_STORAGE_API_KEY");
        std::env::remove_var("HCB_ENGINE_TIMEOUT_SECS");

        assert_eq!(config.storage.api_key.as_deref(), Some("secret"));
        assert_eq!(config.engine.timeout_secs, 45);
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_env_ignored() {
        std::env::set_var("HCB_ENGINE_TIMEOUT_SECS", "soon");

        let mut config = TomlConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("HCB_ENGINE_TIMEOUT_SECS");
        assert_eq!(config.engine.timeout_secs, 300);
    }
}
