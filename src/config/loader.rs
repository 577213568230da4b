//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::EngineConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.connection.max_reuses, 100);
        assert_eq!(config.connection.first_request_timeout_secs, 90);
        assert!(config.websocket.keep_clean);
    }

    #[test]
    fn loads_partial_sections_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nurl = \"http://127.0.0.1:9000/\"\n\n[websocket]\nwait_time_ms = 250"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.url, "http://127.0.0.1:9000/");
        assert_eq!(config.websocket.wait_time_ms, 250);
        assert_eq!(config.websocket.sweep_interval_secs, 60);
    }

    #[test]
    fn reports_validation_failures() {
        let err = parse_config("[connection]\nreuse_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref v) if v.len() == 1));
        assert!(err.to_string().contains("connection.reuse_timeout_secs"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/ws-engine.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
