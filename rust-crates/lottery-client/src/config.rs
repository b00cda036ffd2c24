use crate::{
    chain::simulated::SEPOLIA_CHAIN_ID,
    sync::SyncSettings,
    wallets,
};
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::types::Address;
use serde::Deserialize;
use std::{
    fmt,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

pub const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x208d3ffddf97fb60c35c7be3b891388054def324";
pub const DEFAULT_CHAIN_ID: u64 = SEPOLIA_CHAIN_ID;
pub const DEFAULT_LOG_DIR: &str = "~/.lottery/logs";

pub const ENV_RPC_URL: &str = "LOTTERY_RPC_URL";
pub const ENV_CONTRACT: &str = "LOTTERY_CONTRACT_ADDRESS";
pub const ENV_CHAIN_ID: &str = "LOTTERY_CHAIN_ID";
pub const ENV_PRIVATE_KEY: &str = "LOTTERY_PRIVATE_KEY";
pub const ENV_GLOBAL_REFRESH_SECS: &str = "LOTTERY_GLOBAL_REFRESH_SECS";
pub const ENV_USER_REFRESH_SECS: &str = "LOTTERY_USER_REFRESH_SECS";
pub const ENV_RECENT_REFRESH_SECS: &str = "LOTTERY_RECENT_REFRESH_SECS";
pub const ENV_RECENT_WINDOW_BLOCKS: &str = "LOTTERY_RECENT_WINDOW_BLOCKS";

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "lottery-client",
    about = "Play the block lottery from the terminal",
    version
)]
pub struct CliArgs {
    /// JSON-RPC endpoint (defaults to the public Sepolia RPC)
    #[arg(long, env = ENV_RPC_URL)]
    pub rpc_url: Option<String>,

    /// Lottery contract address (defaults to the known deployment)
    #[arg(long, env = ENV_CONTRACT)]
    pub contract: Option<String>,

    /// Expected chain id (defaults to 11155111)
    #[arg(long, env = ENV_CHAIN_ID)]
    pub chain_id: Option<u64>,

    /// Keystore wallet to unlock for signing
    #[arg(long)]
    pub wallet: Option<String>,

    /// Keystore directory (defaults to ~/.lottery/wallets)
    #[arg(long)]
    pub wallet_dir: Option<String>,

    /// Hex private key or mnemonic, used when no keystore wallet is given
    #[arg(long, env = ENV_PRIVATE_KEY, hide_env_values = true)]
    pub private_key: Option<String>,

    /// JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Play against an in-memory chain instead of a node
    #[arg(long)]
    pub simulated: bool,

    /// Where log files go (defaults to ~/.lottery/logs)
    #[arg(long)]
    pub log_dir: Option<String>,

    #[arg(long, env = ENV_GLOBAL_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub global_refresh_secs: Option<u64>,

    #[arg(long, env = ENV_USER_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub user_refresh_secs: Option<u64>,

    #[arg(long, env = ENV_RECENT_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub recent_refresh_secs: Option<u64>,

    #[arg(long, env = ENV_RECENT_WINDOW_BLOCKS)]
    pub recent_window_blocks: Option<u64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKeyMaterial(String);

impl SecretKeyMaterial {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKeyMaterial(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    Rpc {
        url: String,
        contract: Address,
        chain_id: u64,
    },
    Simulated {
        chain_id: u64,
    },
}

impl NetworkTarget {
    pub fn chain_id(&self) -> u64 {
        match self {
            NetworkTarget::Rpc { chain_id, .. } | NetworkTarget::Simulated { chain_id } => {
                *chain_id
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletConfig {
    Keystore { name: String, dir: PathBuf },
    PrivateKey(SecretKeyMaterial),
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet: WalletConfig,
    pub sync: SyncSettings,
    pub log_dir: PathBuf,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub chain_id: Option<u64>,
    pub wallet: Option<String>,
    pub wallet_dir: Option<String>,
    pub log_dir: Option<String>,
    pub global_refresh_secs: Option<u64>,
    pub user_refresh_secs: Option<u64>,
    pub recent_refresh_secs: Option<u64>,
    pub recent_window_blocks: Option<u64>,
    pub recent_results: Option<usize>,
    pub history_window_blocks: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }
}

fn positive_secs(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(eyre!("{name} must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

pub fn load(cli: CliArgs) -> Result<AppConfig> {
    let file = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            FileConfig::load(Path::new(&path))?
        }
        None => FileConfig::default(),
    };
    resolve(cli, file)
}

fn resolve(cli: CliArgs, file: FileConfig) -> Result<AppConfig> {
    let chain_id = cli.chain_id.or(file.chain_id).unwrap_or(DEFAULT_CHAIN_ID);

    let (network, wallet) = if cli.simulated {
        (NetworkTarget::Simulated { chain_id }, WalletConfig::Simulated)
    } else {
        let url = cli
            .rpc_url
            .or(file.rpc_url)
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_owned());
        let contract = cli
            .contract
            .or(file.contract_address)
            .unwrap_or_else(|| DEFAULT_CONTRACT_ADDRESS.to_owned());
        let contract = contract
            .trim()
            .parse::<Address>()
            .map_err(|err| eyre!("Invalid contract address `{contract}`: {err}"))?;
        let network = NetworkTarget::Rpc {
            url,
            contract,
            chain_id,
        };
        let wallet_dir = cli.wallet_dir.or(file.wallet_dir);
        let wallet = match (cli.wallet, cli.private_key, file.wallet) {
            (Some(name), _, _) | (None, None, Some(name)) => WalletConfig::Keystore {
                name,
                dir: wallets::resolve_wallet_dir(wallet_dir.as_deref())?,
            },
            (None, Some(key), _) => WalletConfig::PrivateKey(SecretKeyMaterial::new(key)),
            (None, None, None) => {
                return Err(eyre!(
                    "Specify --wallet <name> or set {ENV_PRIVATE_KEY} to sign transactions"
                ));
            }
        };
        (network, wallet)
    };

    let defaults = SyncSettings::default();
    let secs = |name: &str, cli_value: Option<u64>, file_value: Option<u64>, default| {
        cli_value
            .or(file_value)
            .map_or(Ok(default), |secs| positive_secs(name, secs))
    };
    let sync = SyncSettings {
        global_interval: secs(
            "global_refresh_secs",
            cli.global_refresh_secs,
            file.global_refresh_secs,
            defaults.global_interval,
        )?,
        user_interval: secs(
            "user_refresh_secs",
            cli.user_refresh_secs,
            file.user_refresh_secs,
            defaults.user_interval,
        )?,
        recent_interval: secs(
            "recent_refresh_secs",
            cli.recent_refresh_secs,
            file.recent_refresh_secs,
            defaults.recent_interval,
        )?,
        recent_window_blocks: cli
            .recent_window_blocks
            .or(file.recent_window_blocks)
            .unwrap_or(defaults.recent_window_blocks),
        recent_results: file.recent_results.unwrap_or(defaults.recent_results),
        history_window_blocks: file
            .history_window_blocks
            .unwrap_or(defaults.history_window_blocks),
        history_limit: defaults.history_limit,
    };

    let log_dir = cli
        .log_dir
        .or(file.log_dir)
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_owned());
    let log_dir = PathBuf::from(shellexpand::tilde(&log_dir).into_owned());

    Ok(AppConfig {
        network,
        wallet,
        sync,
        log_dir,
    })
}
