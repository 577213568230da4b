//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic checks serde cannot express (non-zero limits, parsable
//!   addresses, a well-formed listening prefix)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&EngineConfig` → `Result<(), Vec<ValidationError>>`

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::EngineConfig;
use crate::routing::prefix::ListenerPrefix;

/// One failed check: the offending field and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every field and collect all failures.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = ListenerPrefix::parse(&config.server.url) {
        errors.push(ValidationError::new("server.url", e.to_string()));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }

    let conn = &config.connection;
    if conn.first_request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "connection.first_request_timeout_secs",
            "must be greater than 0",
        ));
    }
    if conn.reuse_timeout_secs == 0 {
        errors.push(ValidationError::new("connection.reuse_timeout_secs", "must be greater than 0"));
    }
    if conn.buffer_length < 64 {
        errors.push(ValidationError::new("connection.buffer_length", "must be at least 64 bytes"));
    }
    if conn.max_input_length < conn.buffer_length {
        errors.push(ValidationError::new(
            "connection.max_input_length",
            "must not be smaller than connection.buffer_length",
        ));
    }
    if conn.max_reuses == 0 {
        errors.push(ValidationError::new("connection.max_reuses", "must be greater than 0"));
    }
    if conn.write_timeout_secs == 0 {
        errors.push(ValidationError::new("connection.write_timeout_secs", "must be greater than 0"));
    }

    let ws = &config.websocket;
    if ws.wait_time_ms == 0 {
        errors.push(ValidationError::new("websocket.wait_time_ms", "must be greater than 0"));
    }
    if ws.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("websocket.sweep_interval_secs", "must be greater than 0"));
    }
    if ws.max_payload_length == 0 {
        errors.push(ValidationError::new("websocket.max_payload_length", "must be greater than 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = EngineConfig::default();
        config.server.url = "ftp://host/".to_string();
        config.connection.max_reuses = 0;
        config.websocket.wait_time_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["server.url", "connection.max_reuses", "websocket.wait_time_ms"]
        );
    }

    #[test]
    fn rejects_zero_write_timeout_and_payload_limit() {
        let mut config = EngineConfig::default();
        config.connection.write_timeout_secs = 0;
        config.websocket.max_payload_length = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["connection.write_timeout_secs", "websocket.max_payload_length"]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = EngineConfig::default();
        config.observability.metrics_address = "nope".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
