use crate::error::{NodeError, Result};
use crate::utils::{from_hex, to_hex};
use bitcoin::Network;
use log::{debug, info};
use serde::Deserialize;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const DEFAULT_HOME_DIR: &str = ".lnshell";
const CONFIG_FILE: &str = "config.toml";
const SEED_FILE: &str = "seed";

const NETWORK_KEY: &str = "LNSHELL_NETWORK";
const HOME_KEY: &str = "LNSHELL_HOME";
const CHAIN_URL_KEY: &str = "LNSHELL_CHAIN_URL";
const LISTEN_KEY: &str = "LNSHELL_LISTEN";
const SEED_KEY: &str = "LNSHELL_SEED";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_HANDOFF_TIMEOUT_MS: u64 = 30_000;

/// The 32-byte wallet and identity seed; wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 32]);

impl Seed {
    pub fn new(bytes: [u8; 32]) -> Self {
        Seed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn from_hex(hex: &str) -> Result<Seed> {
        let bytes = Zeroizing::new(
            from_hex(hex.trim()).ok_or_else(|| NodeError::Config("seed is not hex".to_string()))?,
        );
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            NodeError::Config(format!("seed must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Seed(array))
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed(..)")
    }
}

/// Values taken from process flags; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub home_dir: Option<PathBuf>,
    pub network: Option<String>,
    pub chain_url: Option<String>,
    pub listen: Option<String>,
}

/// Layout of `<home>/config.toml`; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    network: Option<String>,
    chain_source_url: Option<String>,
    listen_addr: Option<String>,
    seed: Option<String>,
    connect_timeout_ms: Option<u64>,
    negotiation_timeout_ms: Option<u64>,
    handoff_timeout_ms: Option<u64>,
    max_inbound_connections: Option<usize>,
    accept_inbound_channels: Option<bool>,
    min_inbound_channel_sat: Option<u64>,
    fee_rate_sat_per_vb: Option<u64>,
}

/// Node configuration, built once at startup and read-only afterwards
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub home_dir: PathBuf,
    seed: Seed,
    pub chain_source_url: Url,
    /// Address the inbound peer server binds; no server when unset
    pub listen_addr: Option<String>,
    pub connect_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    pub handoff_timeout_ms: u64,
    pub max_inbound_connections: usize,
    pub accept_inbound_channels: bool,
    pub min_inbound_channel_sat: u64,
    pub fee_rate_sat_per_vb: u64,
}

impl Config {
    /// Defaults, then `config.toml`, then environment, then `overrides`
    pub fn load(overrides: &ConfigOverrides) -> Result<Config> {
        Self::load_with_env(overrides, &|key: &str| env::var(key).ok())
    }

    fn load_with_env(
        overrides: &ConfigOverrides,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Config> {
        let home_dir = overrides
            .home_dir
            .clone()
            .or_else(|| env(HOME_KEY).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME_DIR));
        fs::create_dir_all(&home_dir).map_err(|e| {
            NodeError::Config(format!(
                "Failed to create home directory {}: {e}",
                home_dir.display()
            ))
        })?;

        let file = Self::read_file(&home_dir)?;

        let network_name = overrides
            .network
            .clone()
            .or_else(|| env(NETWORK_KEY))
            .or(file.network)
            .unwrap_or_else(|| "testnet".to_string());
        let network = network_name
            .parse::<Network>()
            .map_err(|e| NodeError::Config(format!("Unknown network {network_name}: {e}")))?;

        let chain_url = overrides
            .chain_url
            .clone()
            .or_else(|| env(CHAIN_URL_KEY))
            .or(file.chain_source_url)
            .unwrap_or_else(|| default_chain_url(network).to_string());
        let chain_source_url = Url::parse(&chain_url)
            .map_err(|e| NodeError::Config(format!("Invalid chain source url {chain_url}: {e}")))?;

        let listen_addr = overrides
            .listen
            .clone()
            .or_else(|| env(LISTEN_KEY))
            .or(file.listen_addr);

        let seed = match env(SEED_KEY).or(file.seed) {
            Some(hex) => Seed::from_hex(&hex)?,
            None => Self::load_or_create_seed(&home_dir)?,
        };

        let config = Config {
            network,
            home_dir,
            seed,
            chain_source_url,
            listen_addr,
            connect_timeout_ms: file.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            negotiation_timeout_ms: file
                .negotiation_timeout_ms
                .unwrap_or(DEFAULT_NEGOTIATION_TIMEOUT_MS),
            handoff_timeout_ms: file.handoff_timeout_ms.unwrap_or(DEFAULT_HANDOFF_TIMEOUT_MS),
            max_inbound_connections: file.max_inbound_connections.unwrap_or(8),
            accept_inbound_channels: file.accept_inbound_channels.unwrap_or(true),
            min_inbound_channel_sat: file.min_inbound_channel_sat.unwrap_or(1),
            fee_rate_sat_per_vb: file
                .fee_rate_sat_per_vb
                .unwrap_or(crate::wallet::DEFAULT_FEE_RATE_SAT_PER_VB),
        };
        debug!("Loaded configuration: {config:?}");
        Ok(config)
    }

    fn read_file(home_dir: &Path) -> Result<FileConfig> {
        let path = home_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| {
            NodeError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| NodeError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Read `<home>/seed`, writing a fresh random one on first start
    fn load_or_create_seed(home_dir: &Path) -> Result<Seed> {
        let path = home_dir.join(SEED_FILE);
        if path.exists() {
            let hex = Zeroizing::new(fs::read_to_string(&path).map_err(|e| {
                NodeError::Config(format!("Failed to read {}: {e}", path.display()))
            })?);
            return Seed::from_hex(&hex);
        }

        let seed = Seed(rand::random());
        let hex = Zeroizing::new(to_hex(seed.as_bytes()));
        Self::write_private(&path, hex.as_bytes()).map_err(|e| {
            NodeError::Config(format!("Failed to write {}: {e}", path.display()))
        })?;
        info!("Generated a new node seed at {}", path.display());
        Ok(seed)
    }

    /// Create `path` readable by the owner only; never overwrites
    fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

/// Public Esplora instance for each network; regtest expects a local one
pub fn default_chain_url(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "https://blockstream.info/api",
        Network::Signet => "https://mempool.space/signet/api",
        Network::Regtest => "http://127.0.0.1:3002",
        _ => "https://blockstream.info/testnet/api",
    }
}
