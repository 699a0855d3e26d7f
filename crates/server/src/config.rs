//! Server configuration management.
//!
//! This module handles loading configuration from:
//! 1. Default values
//! 2. TOML config file (huddle-server.toml)
//! 3. Environment variables (`HUDDLE_*`)
//! 4. Command-line arguments (highest priority)
//!
//! Configuration options:
//! - `bind`: Socket address to bind to (IPv4/IPv6 with port)
//! - `log_level`: Logging level (trace, debug, info, warn, error)
//! - `data_dir`: Directory for the database
//! - `cert_dir`: Directory containing TLS certificates (certbot-style PEM files)
//! - `domain`: Server domain name (for certificate generation)
//! - `server_name`: Name reported to clients in `ServerHello`
//! - `lookup_timeout_ms`: Upper bound on account and room lookups
//! - `idle_timeout_secs`: Silence allowed before a connection's health is checked
//! - `outbox_capacity`: Frames buffered per connection
//! - `room_code_attempts`: Random codes tried when creating a room

use anyhow::{Context, Result};
use clap::Parser;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::BufReader,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::state::Settings;

/// Default configuration file content with comments.
pub const DEFAULT_CONFIG_CONTENT: &str = r#"# Huddle Server Configuration
# ============================
#
# All options can be overridden with HUDDLE_* environment variables
# (e.g. HUDDLE_BIND) or command-line arguments.

# Socket address to bind to.
# If no port is specified, 7400 is used.
# Examples:
#   - "[::]:7400"      - All interfaces, IPv6 and IPv4 (default)
#   - "0.0.0.0:7400"   - All IPv4 interfaces only
#   - "127.0.0.1:7400" - Localhost only
bind = "[::]:7400"

# Logging level, used when RUST_LOG is not set.
# Options: trace, debug, info, warn, error
log_level = "info"

# Directory for the account and room database.
# Relative paths are resolved from the config file location.
data_dir = "data"

# Directory containing TLS certificates.
# The server expects certbot-style PEM files:
#   - fullchain.pem  - Certificate chain
#   - privkey.pem    - Private key
# If they are missing, a self-signed development certificate is generated.
cert_dir = "certs"

# Server domain name, used for the self-signed certificate.
domain = "localhost"

# Name reported to clients after they log in.
server_name = "Huddle Server"

# How long an account or room lookup may take before the request fails.
lookup_timeout_ms = 5000

# Seconds a connection may stay silent before the server checks it is alive.
idle_timeout_secs = 30

# Messages queued per connection. A client that falls further behind
# misses messages rather than slowing down the room.
outbox_capacity = 256

# Random room codes tried before a create request gives up.
room_code_attempts = 16
"#;

/// Command-line arguments for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "huddle-server")]
#[command(about = "Huddle room chat server", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    /// If the file doesn't exist, it will be created with default values.
    #[arg(short, long, default_value = "huddle-server.toml")]
    pub config: PathBuf,

    /// Socket address to bind to (overrides config file).
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Logging level (overrides config file).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Directory for server data (overrides config file).
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Directory containing TLS certificates (overrides config file).
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Server domain name (overrides config file).
    #[arg(long)]
    pub domain: Option<String>,

    /// Name reported to clients (overrides config file).
    #[arg(long)]
    pub server_name: Option<String>,

    /// Lookup timeout in milliseconds (overrides config file).
    #[arg(long)]
    pub lookup_timeout_ms: Option<u64>,

    /// Idle timeout in seconds (overrides config file).
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Per-connection outbox capacity (overrides config file).
    #[arg(long)]
    pub outbox_capacity: Option<usize>,

    /// Room code generation attempts (overrides config file).
    #[arg(long)]
    pub room_code_attempts: Option<u32>,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    #[serde(default = "default_room_code_attempts")]
    pub room_code_attempts: u32,
}

const DEFAULT_PORT: u16 = 7400;

fn default_bind() -> String {
    format!("[::]:{DEFAULT_PORT}")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_server_name() -> String {
    Settings::default().server_name
}

fn default_lookup_timeout_ms() -> u64 {
    Settings::default().lookup_timeout.as_millis() as u64
}

fn default_idle_timeout_secs() -> u64 {
    Settings::default().idle_timeout.as_secs()
}

fn default_outbox_capacity() -> usize {
    Settings::default().outbox_capacity
}

fn default_room_code_attempts() -> u32 {
    Settings::default().room_code_attempts
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            cert_dir: default_cert_dir(),
            domain: default_domain(),
            server_name: default_server_name(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            outbox_capacity: default_outbox_capacity(),
            room_code_attempts: default_room_code_attempts(),
        }
    }
}

/// Resolved server configuration.
///
/// This is the final configuration after merging defaults, config file, env and CLI args.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub cert_dir: PathBuf,
    pub domain: String,
    pub server_name: String,
    pub lookup_timeout: Duration,
    pub idle_timeout: Duration,
    pub outbox_capacity: usize,
    pub room_code_attempts: u32,
    /// Base directory for resolving relative paths (config file directory).
    pub base_dir: PathBuf,
}

impl ServerConfig {
    /// Load configuration from the process's CLI args, environment and config file.
    pub fn load() -> Result<Self> {
        let args = CliArgs::parse();
        Self::load_with_args(args)
    }

    /// Load configuration with the given CLI args.
    ///
    /// Priority (highest to lowest):
    /// 1. Command-line arguments
    /// 2. Environment variables (HUDDLE_*)
    /// 3. Config file
    /// 4. Default values
    pub fn load_with_args(args: CliArgs) -> Result<Self> {
        Self::load_with_env(args, |key| std::env::var(key).ok())
    }

    /// Like [`load_with_args`](Self::load_with_args) with an explicit
    /// environment lookup, so tests don't have to mutate the process env.
    pub fn load_with_env(args: CliArgs, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_path = &args.config;
        let base_dir = config_path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .unwrap_or(Path::new("."))
            .to_path_buf();

        // HUDDLE_NO_CONFIG skips the config file entirely (for testing)
        let file_config = if env("HUDDLE_NO_CONFIG").is_some() {
            FileConfig::default()
        } else if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
        } else {
            info!("Config file not found, creating default: {}", config_path.display());
            fs::write(config_path, DEFAULT_CONFIG_CONTENT)
                .with_context(|| format!("Failed to create config file: {}", config_path.display()))?;
            FileConfig::default()
        };

        let parsed = |key: &str| -> Result<Option<u64>> {
            env(key)
                .map(|v| v.parse::<u64>().with_context(|| format!("Invalid value for {key}: {v}")))
                .transpose()
        };

        let env_bind = env("HUDDLE_BIND").or_else(|| env("HUDDLE_PORT").map(|p| format!("[::]:{}", p)));
        let env_lookup_timeout = parsed("HUDDLE_LOOKUP_TIMEOUT_MS")?;
        let env_idle_timeout = parsed("HUDDLE_IDLE_TIMEOUT_SECS")?;
        let env_outbox = parsed("HUDDLE_OUTBOX_CAPACITY")?.map(|v| v as usize);
        let env_attempts = parsed("HUDDLE_ROOM_CODE_ATTEMPTS")?.map(|v| v as u32);

        // Merge: CLI args > env vars > file config > defaults
        let bind_str = args.bind.or(env_bind).unwrap_or(file_config.bind);
        let log_level = args
            .log_level
            .or_else(|| env("HUDDLE_LOG_LEVEL"))
            .unwrap_or(file_config.log_level);
        let data_dir = args
            .data_dir
            .or_else(|| env("HUDDLE_DATA_DIR").map(PathBuf::from))
            .unwrap_or(file_config.data_dir);
        let cert_dir = args
            .cert_dir
            .or_else(|| env("HUDDLE_CERT_DIR").map(PathBuf::from))
            .unwrap_or(file_config.cert_dir);
        let domain = args
            .domain
            .or_else(|| env("HUDDLE_DOMAIN"))
            .unwrap_or(file_config.domain);
        let server_name = args
            .server_name
            .or_else(|| env("HUDDLE_SERVER_NAME"))
            .unwrap_or(file_config.server_name);
        let lookup_timeout_ms = args
            .lookup_timeout_ms
            .or(env_lookup_timeout)
            .unwrap_or(file_config.lookup_timeout_ms);
        let idle_timeout_secs = args
            .idle_timeout_secs
            .or(env_idle_timeout)
            .unwrap_or(file_config.idle_timeout_secs);
        let outbox_capacity = args
            .outbox_capacity
            .or(env_outbox)
            .unwrap_or(file_config.outbox_capacity);
        let room_code_attempts = args
            .room_code_attempts
            .or(env_attempts)
            .unwrap_or(file_config.room_code_attempts);

        if outbox_capacity == 0 {
            anyhow::bail!("outbox_capacity must be at least 1");
        }
        if room_code_attempts == 0 {
            anyhow::bail!("room_code_attempts must be at least 1");
        }
        if idle_timeout_secs == 0 {
            anyhow::bail!("idle_timeout_secs must be at least 1");
        }
        if lookup_timeout_ms == 0 {
            anyhow::bail!("lookup_timeout_ms must be at least 1");
        }

        let bind = parse_bind_address(&bind_str)?;

        let data_dir = resolve_path(&base_dir, &data_dir);
        let cert_dir = resolve_path(&base_dir, &cert_dir);

        Ok(Self {
            bind,
            log_level,
            data_dir,
            cert_dir,
            domain,
            server_name,
            lookup_timeout: Duration::from_millis(lookup_timeout_ms),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            outbox_capacity,
            room_code_attempts,
            base_dir,
        })
    }

    /// Runtime settings shared by every connection.
    pub fn settings(&self) -> Settings {
        Settings {
            server_name: self.server_name.clone(),
            lookup_timeout: self.lookup_timeout,
            idle_timeout: self.idle_timeout,
            outbox_capacity: self.outbox_capacity,
            room_code_attempts: self.room_code_attempts,
        }
    }

    /// Get the data directory path, creating it if necessary.
    pub fn data_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(self.data_dir.clone())
    }

    /// Get the cert directory path, creating it if necessary.
    pub fn cert_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.cert_dir)?;
        Ok(self.cert_dir.clone())
    }

    /// Load TLS certificate and key.
    ///
    /// Looks for `fullchain.pem` and `privkey.pem` in the cert directory and
    /// generates a self-signed development certificate if either is missing.
    pub fn load_certificates(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let cert_dir = self.cert_dir()?;
        let fullchain_path = cert_dir.join("fullchain.pem");
        let privkey_path = cert_dir.join("privkey.pem");

        if fullchain_path.exists() && privkey_path.exists() {
            info!("Loading certificates from {}", cert_dir.display());
            load_pem_certificates(&fullchain_path, &privkey_path)
        } else {
            warn!(
                "Certificates not found in {}, generating self-signed dev cert",
                cert_dir.display()
            );
            generate_self_signed_cert(&cert_dir, &self.domain)
        }
    }
}

/// Parse a bind address string into a SocketAddr.
///
/// If no port is specified, the default port is used.
fn parse_bind_address(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse() {
        return Ok(addr);
    }

    let with_port = if (s.contains('[') && !s.contains("]:")) || !s.contains(':') {
        format!("{s}:{DEFAULT_PORT}")
    } else {
        s.to_string()
    };

    with_port
        .parse()
        .with_context(|| format!("Invalid bind address: {}", s))
}

/// Resolve a path relative to a base directory.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load certificates from PEM files (certbot-style).
pub fn load_pem_certificates(
    fullchain_path: &Path,
    privkey_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_file = fs::File::open(fullchain_path)
        .with_context(|| format!("Failed to open certificate file: {}", fullchain_path.display()))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate file: {}", fullchain_path.display()))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", fullchain_path.display());
    }
    info!(
        "Loaded {} certificate(s) from {}",
        certs.len(),
        fullchain_path.display()
    );

    let key_file =
        fs::File::open(privkey_path).with_context(|| format!("Failed to open key file: {}", privkey_path.display()))?;
    let mut key_reader = BufReader::new(key_file);

    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to parse key file: {}", privkey_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", privkey_path.display()))?;

    Ok((certs, key))
}

/// Generate a self-signed certificate for development and write it to `cert_dir`.
pub fn generate_self_signed_cert(
    cert_dir: &Path,
    domain: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    fs::create_dir_all(cert_dir)?;

    let fullchain_path = cert_dir.join("fullchain.pem");
    let privkey_path = cert_dir.join("privkey.pem");

    let ck = rcgen::generate_simple_self_signed(vec![domain.to_string()])
        .context("Failed to generate self-signed certificate")?;

    fs::write(&fullchain_path, ck.cert.pem())
        .with_context(|| format!("Failed to write certificate: {}", fullchain_path.display()))?;
    fs::write(&privkey_path, ck.signing_key.serialize_pem())
        .with_context(|| format!("Failed to write private key: {}", privkey_path.display()))?;

    info!(
        "Generated self-signed certificate for '{}' in {}",
        domain,
        cert_dir.display()
    );

    load_pem_certificates(&fullchain_path, &privkey_path)
}
