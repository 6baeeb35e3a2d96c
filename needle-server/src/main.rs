use clap::{Args, Parser, Subcommand, ValueEnum};
use needle_core::DEFAULT_CERTIFICATE_NAME;
use needle_server::config::ServerConfig;
use needle_server::defaults::{
    DEFAULT_CA_CERT_PATH, DEFAULT_CA_KEY_PATH, DEFAULT_DB_FILE, DEFAULT_GRACE_PERIOD,
    DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT, DEFAULT_SHUTDOWN_TIMEOUT,
};
use needle_server::issuance::IssuanceService;
use needle_server::pki::{CertificateSummary, DEFAULT_CA_COMMON_NAME, RootCa, SigningFactory};
use needle_server::proxy;
use needle_server::store::SqliteCertificateStore;
use needle_server::tls::CertificateBinding;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Needle Server - issues TLS certificates on demand for any hostname
#[derive(Parser)]
#[command(name = "needle-server")]
#[command(version)]
#[command(about = "Needle Server - issues TLS certificates on demand for any hostname")]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "NEEDLE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "NEEDLE_LOG_FORMAT")]
    #[arg(value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve HTTP and HTTPS, issuing certificates on demand
    Start(StartArgs),
    /// Generate a self-signed root CA
    InitCa(InitCaArgs),
    /// List cached certificates
    Certs(CertsArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Root CA certificate (PEM)
    #[arg(long, env = "NEEDLE_CA", default_value = DEFAULT_CA_CERT_PATH)]
    pub ca: PathBuf,

    /// Root CA private key (PEM)
    #[arg(long, env = "NEEDLE_CA_KEY", default_value = DEFAULT_CA_KEY_PATH)]
    pub ca_key: PathBuf,

    /// SQLite certificate cache
    #[arg(long, env = "NEEDLE_DB_FILE", default_value = DEFAULT_DB_FILE)]
    pub db_file: PathBuf,

    /// HTTP port
    #[arg(long, env = "NEEDLE_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// HTTPS port
    #[arg(long, env = "NEEDLE_HTTPS_PORT", default_value_t = DEFAULT_HTTPS_PORT)]
    pub https_port: u16,

    /// Certificate name served to clients without SNI
    #[arg(long, env = "NEEDLE_DEFAULT_NAME", default_value = DEFAULT_CERTIFICATE_NAME)]
    pub default_name: String,

    /// Seconds to keep accepting connections after a shutdown signal
    #[arg(long, env = "NEEDLE_GRACE_PERIOD_SECS")]
    #[arg(default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub grace_period_secs: u64,

    /// Seconds to wait for in-flight requests during shutdown
    #[arg(long, env = "NEEDLE_SHUTDOWN_TIMEOUT_SECS")]
    #[arg(default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    pub shutdown_timeout_secs: u64,
}

impl StartArgs {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            ca_cert: self.ca,
            ca_key: self.ca_key,
            db_file: self.db_file,
            http_port: self.http_port,
            https_port: self.https_port,
            default_name: self.default_name,
            grace_period: Duration::from_secs(self.grace_period_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[derive(Args, Debug)]
pub struct InitCaArgs {
    /// Where to write the root CA certificate
    #[arg(long, env = "NEEDLE_CA", default_value = DEFAULT_CA_CERT_PATH)]
    pub ca: PathBuf,

    /// Where to write the root CA private key
    #[arg(long, env = "NEEDLE_CA_KEY", default_value = DEFAULT_CA_KEY_PATH)]
    pub ca_key: PathBuf,

    /// Subject common name of the root CA
    #[arg(long, env = "NEEDLE_CA_COMMON_NAME", default_value = DEFAULT_CA_COMMON_NAME)]
    pub common_name: String,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CertsArgs {
    /// SQLite certificate cache
    #[arg(long, env = "NEEDLE_DB_FILE", default_value = DEFAULT_DB_FILE)]
    pub db_file: PathBuf,

    /// Print one JSON object per certificate
    #[arg(long)]
    pub json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    match cli.command {
        Command::Start(args) => start(args.into_config()),
        Command::InitCa(args) => init_ca(args),
        Command::Certs(args) => list_certs(args),
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

fn start(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Needle Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Root CA: {}", config.ca_cert.display());
    tracing::info!("Default certificate name: {}", config.default_name);

    let root_ca = RootCa::load(&config.ca_cert, &config.ca_key)?;
    let root_ca_pem = root_ca.cert_pem().to_vec();

    let store = SqliteCertificateStore::open(&config.db_file)?;
    store.init()?;
    tracing::info!("Certificate cache: {}", store.path().display());

    let factory = SigningFactory::new(Arc::new(root_ca));
    let service = Arc::new(IssuanceService::new(Arc::new(store), Arc::new(factory)));
    let binding = CertificateBinding::new(service, config.default_name.clone());

    let server = proxy::build_server(&config, binding, root_ca_pem)?;

    // Run the server (this blocks)
    server.run_forever();

    #[allow(unreachable_code)]
    Ok(())
}

fn init_ca(args: InitCaArgs) -> Result<(), Box<dyn std::error::Error>> {
    let root_ca = RootCa::generate(&args.common_name)?;
    root_ca.save(&args.ca, &args.ca_key, args.force)?;

    println!("Root CA certificate: {}", args.ca.display());
    println!("Root CA private key: {}", args.ca_key.display());
    Ok(())
}

fn list_certs(args: CertsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteCertificateStore::open_read_only(&args.db_file)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    for record in store.list()? {
        let summary = match CertificateSummary::from_record(&record) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(hostname = %record.name, "Skipping unreadable certificate: {}", e);
                continue;
            }
        };

        if args.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            let state = if summary.is_expired_at(now) { "expired" } else { "valid" };
            println!(
                "{}\tcreated_at={}\tnot_after={}\t{}",
                summary.name, summary.created_at, summary.not_after, state
            );
        }
    }

    Ok(())
}
