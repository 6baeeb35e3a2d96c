use crate::defaults::{
    DEFAULT_CA_CERT_PATH, DEFAULT_CA_KEY_PATH, DEFAULT_DB_FILE, DEFAULT_GRACE_PERIOD,
    DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT, DEFAULT_SHUTDOWN_TIMEOUT,
};
use needle_core::DEFAULT_CERTIFICATE_NAME;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for `needle-server start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Root CA certificate (PEM)
    pub ca_cert: PathBuf,
    /// Root CA private key (PEM)
    pub ca_key: PathBuf,
    /// SQLite certificate cache
    pub db_file: PathBuf,
    pub http_port: u16,
    pub https_port: u16,
    /// Certificate name used when the client sends no SNI
    pub default_name: String,
    /// Time pingora keeps accepting after a shutdown signal
    pub grace_period: Duration,
    /// Upper bound for draining in-flight requests
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ca_cert: PathBuf::from(DEFAULT_CA_CERT_PATH),
            ca_key: PathBuf::from(DEFAULT_CA_KEY_PATH),
            db_file: PathBuf::from(DEFAULT_DB_FILE),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            default_name: DEFAULT_CERTIFICATE_NAME.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn http_addr(&self) -> String {
        format!("0.0.0.0:{}", self.http_port)
    }

    pub fn https_addr(&self) -> String {
        format!("0.0.0.0:{}", self.https_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.ca_cert, PathBuf::from("data/certs/root-ca.crt"));
        assert_eq!(config.ca_key, PathBuf::from("data/certs/root-ca.key"));
        assert_eq!(config.db_file, PathBuf::from("data/cache.db"));
        assert_eq!(config.http_port, 80);
        assert_eq!(config.https_port, 443);
        assert_eq!(config.default_name, "default-needle-certificate");
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn listener_addresses_bind_all_interfaces() {
        let config = ServerConfig {
            http_port: 8080,
            https_port: 8443,
            ..Default::default()
        };
        assert_eq!(config.http_addr(), "0.0.0.0:8080");
        assert_eq!(config.https_addr(), "0.0.0.0:8443");
    }
}
