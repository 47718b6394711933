//! Service configuration - environment first, CLI flags override

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::logging::LogFormat;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ZMQ_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:18443";
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UI_DIR: &str = "ui";
pub const DEFAULT_FEED_IDLE_SECS: u64 = 60;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network { Bitcoin, Testnet, Signet, #[default] Regtest }

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self { Network::Bitcoin => "bitcoin", Network::Testnet => "testnet", Network::Signet => "signet", Network::Regtest => "regtest" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" | "main" => Some(Network::Bitcoin),
            "testnet" | "test" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    /// Test fixtures (block generation, scheduled payments) only run here.
    pub fn is_regtest(&self) -> bool { matches!(self, Network::Regtest) }

    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self { Network::Bitcoin => bitcoin::Network::Bitcoin, Network::Testnet => bitcoin::Network::Testnet, Network::Signet => bitcoin::Network::Signet, Network::Regtest => bitcoin::Network::Regtest }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcAuth {
    UserPass { user: String, pass: String },
    Cookie(PathBuf),
    None,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub zmq_host: String,
    pub zmq_port: u16,
    pub wallet_name: String,
    pub network: Network,
    pub rpc_url: String,
    pub rpc_auth: RpcAuth,
    pub rpc_timeout: Duration,
    pub ui_dir: PathBuf,
    pub log_format: LogFormat,
    /// Reconnect the feed after this long without a message.
    pub feed_idle: Duration,
    /// Regtest only: send a test payment to the watched address on this interval.
    pub test_payment_interval: Option<Duration>,
}

impl Config {
    pub fn new(wallet_name: impl Into<String>, zmq_port: u16) -> Self {
        Self {
            port: DEFAULT_PORT,
            zmq_host: DEFAULT_ZMQ_HOST.into(),
            zmq_port,
            wallet_name: wallet_name.into(),
            network: Network::default(),
            rpc_url: DEFAULT_RPC_URL.into(),
            rpc_auth: RpcAuth::None,
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            ui_dir: PathBuf::from(DEFAULT_UI_DIR),
            log_format: LogFormat::for_stderr(),
            feed_idle: Duration::from_secs(DEFAULT_FEED_IDLE_SECS),
            test_payment_interval: None,
        }
    }

    /// Feed endpoint, e.g. `tcp://127.0.0.1:28332`
    pub fn zmq_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.zmq_host, self.zmq_port)
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let wallet_name = get("WALLET_NAME").ok_or(ConfigError::Missing("WALLET_NAME"))?;
        let zmq_port = parse_num::<u16>("ZEROMQ_PORT", get("ZEROMQ_PORT").ok_or(ConfigError::Missing("ZEROMQ_PORT"))?)?;
        let mut config = Config::new(wallet_name, zmq_port);

        if let Some(port) = get("PORT") {
            config.port = parse_num("PORT", port)?;
        }
        if let Some(host) = get("ZEROMQ_HOST") {
            config.zmq_host = host;
        }
        if let Some(net) = get("NETWORK") {
            config.network = Network::from_str(&net).ok_or(ConfigError::Invalid { name: "NETWORK", value: net })?;
        }
        if let Some(url) = get("BITCOIN_RPC_URL") {
            config.rpc_url = url;
        }
        config.rpc_auth = match (get("BITCOIN_RPC_USER"), get("BITCOIN_RPC_PASS"), get("BITCOIN_RPC_COOKIE")) {
            (Some(user), Some(pass), _) => RpcAuth::UserPass { user, pass },
            (_, _, Some(cookie)) => RpcAuth::Cookie(PathBuf::from(cookie)),
            _ => RpcAuth::None,
        };
        if let Some(secs) = get("TIPJAR_RPC_TIMEOUT_SECS") {
            config.rpc_timeout = Duration::from_secs(parse_num("TIPJAR_RPC_TIMEOUT_SECS", secs)?);
        }
        if let Some(format) = get("TIPJAR_LOG_FORMAT") {
            config.log_format = LogFormat::from_str(&format).ok_or(ConfigError::Invalid { name: "TIPJAR_LOG_FORMAT", value: format })?;
        } else if get("TIPJAR_LOG_JSON").as_deref() == Some("1") {
            config.log_format = LogFormat::Json;
        }
        if let Some(secs) = get("TIPJAR_FEED_IDLE_SECS") {
            let secs: u64 = parse_num("TIPJAR_FEED_IDLE_SECS", secs)?;
            if secs == 0 {
                return Err(ConfigError::Invalid { name: "TIPJAR_FEED_IDLE_SECS", value: secs.to_string() });
            }
            config.feed_idle = Duration::from_secs(secs);
        }
        if let Some(dir) = get("TIPJAR_UI_DIR") {
            config.ui_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get("TIPJAR_TEST_PAYMENT_SECS") {
            let secs: u64 = parse_num("TIPJAR_TEST_PAYMENT_SECS", secs)?;
            if secs > 0 {
                config.test_payment_interval = Some(Duration::from_secs(secs));
            }
        }
        Ok(config)
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { name, value })
}

/// Load `KEY=value` pairs from a `.env` file without overriding variables already set.
pub fn load_dotenv(path: impl AsRef<std::path::Path>) {
    let Ok(contents) = std::fs::read_to_string(path) else { return };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}
