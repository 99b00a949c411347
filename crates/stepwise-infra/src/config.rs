//! Configuration loader for Stepwise.
//!
//! Reads `stepwise.toml` from the data directory (`~/.stepwise/` unless
//! `STEPWISE_DATA_DIR` is set) and deserializes it into
//! [`OrchestratorConfig`]. A missing file yields the defaults; a file that
//! exists but cannot be read or parsed is an error.

use std::path::{Path, PathBuf};

use stepwise_types::config::OrchestratorConfig;

pub const CONFIG_FILE: &str = "stepwise.toml";
pub const DATA_DIR_ENV: &str = "STEPWISE_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot determine a data directory: set {DATA_DIR_ENV}")]
    NoDataDir,
}

/// Resolve the data directory: `STEPWISE_DATA_DIR`, else `~/.stepwise`.
pub fn resolve_data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".stepwise"))
        .ok_or(ConfigError::NoDataDir)
}

/// Load `{data_dir}/stepwise.toml`.
pub async fn load_config(data_dir: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", path.display());
            return Ok(OrchestratorConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config: OrchestratorConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
    tracing::debug!(
        path = %path.display(),
        workflows = config.workflows.len(),
        "loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::config::DispatchDriver;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await.unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.dispatch.driver, DispatchDriver::Durable);
        assert!(config.workflows.is_empty());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[retry]
max_attempts = 5
delay_secs = 2
backoff = false
non_retryable = ["validation"]

[dispatch]
driver = "sync"

[[workflows]]
type = "order"
blocks = [
  { sequential = ["reserve-stock"] },
  { concurrent = ["charge-card", "send-email"] },
]
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await.unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.retry.backoff);
        assert!(config.retry.non_retryable.contains("validation"));
        assert_eq!(config.dispatch.driver, DispatchDriver::Sync);
        assert_eq!(config.workflows[0].workflow_type, "order");
        assert_eq!(config.workflows[0].action_specs().len(), 3);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_names_the_file() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let err = load_config(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[tokio::test]
    async fn load_config_rejects_unknown_driver() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "[dispatch]\ndriver = \"redis\"\n")
            .await
            .unwrap();

        assert!(load_config(tmp.path()).await.is_err());
    }
}
