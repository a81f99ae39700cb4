//! Configuration loading for Cadence.
//!
//! Reads `config.toml` from the data directory (`~/.cadence/` in production)
//! into [`EngineConfig`], and resolves where the data directory and database
//! live. Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use cadence_types::config::EngineConfig;

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "CADENCE_DATA_DIR";
/// Overrides the database URL derived from the data directory.
pub const DATABASE_URL_ENV: &str = "CADENCE_DATABASE_URL";

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `CADENCE_DATA_DIR` environment variable
/// 2. `~/.cadence`
/// 3. `.cadence` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    data_dir_from(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
}

fn data_dir_from(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
        return dir;
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cadence");
    }
    PathBuf::from(".cadence")
}

/// Resolve the SQLite URL: `CADENCE_DATABASE_URL`, else
/// `sqlite://{data_dir}/cadence.db?mode=rwc`.
pub fn database_url(data_dir: &Path) -> String {
    database_url_from(std::env::var(DATABASE_URL_ENV).ok(), data_dir)
}

fn database_url_from(explicit: Option<String>, data_dir: &Path) -> String {
    match explicit {
        Some(url) if !url.trim().is_empty() => url,
        _ => format!("sqlite://{}?mode=rwc", data_dir.join("cadence.db").display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::workflow::StepType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_pass, 50);
        assert_eq!(config.retry.default.max_attempts, 3);
        assert!(config.collaborators.message_gateway_url.is_none());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
max_steps_per_pass = 10
action_timeout_secs = 5

[retry.default]
max_attempts = 5
base_delay_secs = 30

[retry.per_step_type.send_message]
max_attempts = 2

[collaborators]
message_gateway_url = "https://gateway.example.com/messages"

[server]
port = 9000
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_pass, 10);
        assert_eq!(config.action_timeout_secs, 5);
        // Unset keys keep their defaults.
        assert_eq!(config.sweep_batch_limit, 100);
        assert_eq!(config.retry.default.max_attempts, 5);
        assert_eq!(config.retry.default.base_delay_secs, 30);
        assert_eq!(config.retry.for_step_type(StepType::SendMessage).max_attempts, 2);
        assert_eq!(config.retry.for_step_type(StepType::InvokeExternalAction).max_attempts, 5);
        assert_eq!(
            config.collaborators.message_gateway_url.as_deref(),
            Some("https://gateway.example.com/messages")
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_steps_per_pass, 50);
    }

    #[test]
    fn data_dir_prefers_explicit_path() {
        assert_eq!(
            data_dir_from(Some(PathBuf::from("/tmp/test-cadence"))),
            PathBuf::from("/tmp/test-cadence")
        );
        assert!(data_dir_from(Some(PathBuf::new())).ends_with(".cadence"));
        assert!(data_dir_from(None).ends_with(".cadence"));
    }

    #[test]
    fn database_url_defaults_into_data_dir() {
        let dir = Path::new("/var/lib/cadence");
        assert_eq!(
            database_url_from(None, dir),
            "sqlite:///var/lib/cadence/cadence.db?mode=rwc"
        );
        assert_eq!(
            database_url_from(Some("sqlite::memory:".into()), dir),
            "sqlite::memory:"
        );
    }
}
