//! Layered configuration for the CLI.
//!
//! Precedence: defaults < config file < environment (`XFER_`) < CLI flags.
//! Nested keys in the environment use a double underscore, e.g.
//! `XFER_RETRY__MAX_RETRIES_PER_FILE=4`.

use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};
use xfer_engine::{EngineConfig, FileExistsPolicy};

/// Default config file location, `xfer.toml` in the platform config dir.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "xfer")
        .map(|p| p.config_dir().join("xfer.toml"))
        .unwrap_or_else(|| PathBuf::from("xfer.toml"))
}

/// Values given on the command line; unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub file_exists: Option<FileExistsPolicy>,
    pub max_retries_per_file: Option<u32>,
    pub max_consecutive_errors: Option<u32>,
}

/// Load the engine config from every layer and validate it.
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<EngineConfig> {
    let file = match path {
        Some(path) => {
            ensure!(path.is_file(), "Config file does not exist: {}", path.display());
            path.to_path_buf()
        }
        None => config_path(),
    };

    let mut figment = Figment::new()
        .merge(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(&file))
        .merge(Env::prefixed("XFER_").split("__"));

    if let Some(policy) = overrides.file_exists {
        figment = figment.merge(Serialized::default("file_exists", policy));
    }
    if let Some(retries) = overrides.max_retries_per_file {
        figment = figment.merge(Serialized::default("retry.max_retries_per_file", retries));
    }
    if let Some(threshold) = overrides.max_consecutive_errors {
        figment = figment.merge(Serialized::default("retry.max_consecutive_errors", threshold));
    }

    let config: EngineConfig = figment
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", file.display()))?;

    config.validate().context("Invalid configuration")?;
    tracing::debug!("Loaded configuration: {:?}", config);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("xfer.toml");
        std::fs::write(&path, contents).expect("Failed to write config");
        path
    }

    #[test]
    fn test_file_values_override_defaults() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            temp_dir.path(),
            "file_exists = \"skip\"\n\n[retry]\nmax_retries_per_file = 5\n",
        );

        let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.file_exists, FileExistsPolicy::Skip);
        assert_eq!(config.retry.max_retries_per_file, 5);
        // untouched keys keep their defaults
        assert_eq!(config.retry.base_retry_delay_ms, 1000);
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            temp_dir.path(),
            "file_exists = \"skip\"\n\n[retry]\nmax_consecutive_errors = 4\n",
        );
        let overrides = ConfigOverrides {
            file_exists: Some(FileExistsPolicy::Rename),
            max_consecutive_errors: Some(7),
            ..ConfigOverrides::default()
        };

        let config = load_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.file_exists, FileExistsPolicy::Rename);
        assert_eq!(config.retry.max_consecutive_errors, 7);
    }

    #[test]
    fn test_unset_overrides_leave_file_values() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            temp_dir.path(),
            "file_exists = \"rename\"\n\n[retry]\nmax_retries_per_file = 4\n",
        );
        let overrides = ConfigOverrides {
            max_consecutive_errors: Some(9),
            ..ConfigOverrides::default()
        };

        let config = load_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.file_exists, FileExistsPolicy::Rename);
        assert_eq!(config.retry.max_retries_per_file, 4);
        assert_eq!(config.retry.max_consecutive_errors, 9);
    }

    #[test]
    fn test_legacy_policy_name_accepted() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "file_exists = \"skip_if_identical\"\n");

        let config = load_config(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.file_exists, FileExistsPolicy::OverwriteIfDifferent);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            temp_dir.path(),
            "[retry]\nbase_retry_delay_ms = 20000\nmax_retry_delay_ms = 1000\n",
        );
        assert!(load_config(Some(&path), &ConfigOverrides::default()).is_err());
    }

    #[test]
    fn test_missing_explicit_file_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = load_config(
            Some(&temp_dir.path().join("nope.toml")),
            &ConfigOverrides::default(),
        );
        assert!(result.is_err());
    }
}
