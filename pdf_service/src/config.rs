//! Service configuration read from the environment

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Listen address (`PDF_SERVICE_ADDR`)
    pub addr: SocketAddr,

    /// Jobs waiting for the worker before requests are refused (`PDF_SERVICE_QUEUE`)
    pub queue_depth: usize,

    /// Request body limit in bytes (`PDF_SERVICE_MAX_BODY_MB`)
    pub max_body_bytes: usize,

    /// Passed to `wkhtmltopdf_init` (`PDF_SERVICE_USE_GRAPHICS`)
    pub use_graphics: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            queue_depth: 16,
            max_body_bytes: 32 * 1024 * 1024,
            use_graphics: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServiceConfig::default();

        if let Some(value) = lookup("PDF_SERVICE_ADDR") {
            config.addr = value
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid("PDF_SERVICE_ADDR", &value, e))?;
        }

        if let Some(value) = lookup("PDF_SERVICE_QUEUE") {
            config.queue_depth = parse_positive("PDF_SERVICE_QUEUE", &value)?;
        }

        if let Some(value) = lookup("PDF_SERVICE_MAX_BODY_MB") {
            let megabytes = parse_positive("PDF_SERVICE_MAX_BODY_MB", &value)?;
            config.max_body_bytes = megabytes
                .checked_mul(1024 * 1024)
                .ok_or_else(|| invalid("PDF_SERVICE_MAX_BODY_MB", &value, "too large"))?;
        }

        if let Some(value) = lookup("PDF_SERVICE_USE_GRAPHICS") {
            config.use_graphics = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid("PDF_SERVICE_USE_GRAPHICS", &value, "expected a boolean")),
            };
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid(name, value, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(name, value, e)),
    }
}

fn invalid(name: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.addr.port(), 8080);
    }

    #[test]
    fn test_reads_every_variable() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PDF_SERVICE_ADDR", "127.0.0.1:9000"),
            ("PDF_SERVICE_QUEUE", "4"),
            ("PDF_SERVICE_MAX_BODY_MB", "2"),
            ("PDF_SERVICE_USE_GRAPHICS", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert!(config.use_graphics);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = ServiceConfig::from_lookup(lookup(&[("PDF_SERVICE_QUEUE", "0")])).unwrap_err();
        assert!(err.to_string().starts_with("PDF_SERVICE_QUEUE has invalid value '0'"));

        assert!(ServiceConfig::from_lookup(lookup(&[("PDF_SERVICE_ADDR", "nowhere")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("PDF_SERVICE_USE_GRAPHICS", "maybe")])).is_err());
    }
}
