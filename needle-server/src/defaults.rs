use std::time::Duration;

pub const DEFAULT_CA_CERT_PATH: &str = "data/certs/root-ca.crt";
pub const DEFAULT_CA_KEY_PATH: &str = "data/certs/root-ca.key";
pub const DEFAULT_DB_FILE: &str = "data/cache.db";

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
