//! Command line and environment configuration.
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::ids::{AccountId, ParseIdError, TopicId};
use crate::keys::{KeyError, PrivateKey};
use crate::mirror::{network_mirror_url, Options, DEFAULT_PAGE_LIMIT, TESTNET_MIRROR_URL};
use crate::simulation::{SimulationConfig, SyncStrategy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("OPERATOR_ID is missing")]
    MissingOperatorId,
    #[error("OPERATOR_KEY is missing")]
    MissingOperatorKey,
    #[error("Invalid OPERATOR_ID format, expected account id like '0.0.1234': {0}")]
    InvalidOperatorId(ParseIdError),
    #[error("Invalid OPERATOR_KEY format, use a valid private key string: {0}")]
    InvalidOperatorKey(KeyError),
    #[error("Invalid {name}: {source}")]
    InvalidTopicId {
        name: &'static str,
        source: ParseIdError,
    },
    #[error("Unknown HEDERA_NETWORK '{0}', expected mainnet, testnet or previewnet")]
    UnknownNetwork(String),
    #[error("MIRROR_URL cannot be used with --local, the local ledger serves its own mirror")]
    MirrorUrlWithLocalLedger,
}

#[derive(Parser, Debug)]
#[command(
    name = "hcs-purchase-records",
    version,
    about = "Record purchases on a consensus topic and read them back from a mirror node"
)]
pub struct Cli {
    /// Operator account paying for every operation, e.g. 0.0.1234
    #[arg(long, env = "OPERATOR_ID", global = true)]
    pub operator_id: Option<String>,

    /// Operator private key (raw or DER hex)
    #[arg(long, env = "OPERATOR_KEY", global = true, hide_env_values = true)]
    pub operator_key: Option<String>,

    /// Existing purchase topic to reuse
    #[arg(long, env = "TOPIC_ID", global = true)]
    pub topic_id: Option<String>,

    /// Mirror node API root, defaults to the network's public mirror node
    #[arg(long, env = "MIRROR_URL", global = true)]
    pub mirror_url: Option<String>,

    /// Accept a plain http mirror node URL
    #[arg(long, env = "MIRROR_ALLOW_HTTP", global = true)]
    pub allow_http: bool,

    /// Network to connect to, also used in DID identifiers
    #[arg(long, env = "HEDERA_NETWORK", default_value = "testnet", global = true)]
    pub network: String,

    /// Topic holding DID documents; enables DID identities when it exists
    #[arg(long, env = "DID_TOPIC_ID", global = true)]
    pub did_topic_id: Option<String>,

    /// Messages requested per mirror node page
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT, global = true)]
    pub page_limit: u32,

    /// Mirror node request timeout in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create users, submit their purchases and read them back (default)
    Simulate(SimulateArgs),
    /// Print the purchase records of one identity from a mirror node
    Query(QueryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Run against an in-process ledger and a local mirror node instead of
    /// the network
    #[arg(long)]
    pub local: bool,

    /// Number of ephemeral users
    #[arg(long, default_value_t = 4)]
    pub users: usize,

    /// Purchases submitted per user
    #[arg(long, default_value_t = 10)]
    pub records: u64,

    /// Wait after topic creation before re-verifying it, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub propagation_delay_ms: u64,

    /// How to wait for the mirror node before reading back
    #[arg(long, value_enum, default_value_t = SyncMode::Fixed)]
    pub sync: SyncMode,

    /// Fixed wait, or first poll delay, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub sync_delay_ms: u64,

    /// Scans per user when polling
    #[arg(long, default_value_t = 6)]
    pub poll_attempts: u32,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            local: false,
            users: 4,
            records: 10,
            propagation_delay_ms: 5_000,
            sync: SyncMode::Fixed,
            sync_delay_ms: 10_000,
            poll_attempts: 6,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Topic to scan
    #[arg(long)]
    pub topic: String,

    /// Identity whose purchases are printed
    #[arg(long)]
    pub identity: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Sleep once, then read
    Fixed,
    /// Poll each user's records with exponential backoff
    Poll,
}

/// Validated settings for a simulation session
#[derive(Debug, Clone)]
pub struct Config {
    pub operator_id: AccountId,
    pub operator_key: PrivateKey,
    pub topic_id: Option<TopicId>,
    pub mirror_url: Option<String>,
    pub allow_http: bool,
    pub network: String,
    pub did_topic_id: Option<TopicId>,
    pub page_limit: u32,
    pub timeout: u64,
}

/// Blank values count as unset, the way an empty `.env` entry does.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_topic(name: &'static str, value: &Option<String>) -> Result<Option<TopicId>, ConfigError> {
    non_blank(value)
        .map(|v| {
            v.parse()
                .map_err(|source| ConfigError::InvalidTopicId { name, source })
        })
        .transpose()
}

impl Config {
    /// Check operator credentials and identifiers before anything touches the
    /// network.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let operator_id = non_blank(&cli.operator_id)
            .ok_or(ConfigError::MissingOperatorId)?
            .parse()
            .map_err(ConfigError::InvalidOperatorId)?;
        let operator_key = non_blank(&cli.operator_key)
            .ok_or(ConfigError::MissingOperatorKey)?
            .parse()
            .map_err(ConfigError::InvalidOperatorKey)?;

        Ok(Self {
            operator_id,
            operator_key,
            topic_id: parse_topic("TOPIC_ID", &cli.topic_id)?,
            mirror_url: non_blank(&cli.mirror_url).map(str::to_string),
            allow_http: cli.allow_http,
            network: cli.network.clone(),
            did_topic_id: parse_topic("DID_TOPIC_ID", &cli.did_topic_id)?,
            page_limit: cli.page_limit,
            timeout: cli.timeout,
        })
    }

    /// [Config::from_cli] plus the checks specific to `simulate`.
    pub fn for_simulation(cli: &Cli, args: &SimulateArgs) -> Result<Self, ConfigError> {
        let config = Self::from_cli(cli)?;
        if args.local && config.mirror_url.is_some() {
            return Err(ConfigError::MirrorUrlWithLocalLedger);
        }
        Ok(config)
    }

    /// Configured mirror node, else the public one of the network.
    pub fn remote_mirror_url(&self) -> &str {
        self.mirror_url
            .as_deref()
            .or_else(|| network_mirror_url(&self.network))
            .unwrap_or(TESTNET_MIRROR_URL)
    }

    pub fn mirror_options(&self, allow_http: bool) -> Options {
        Options {
            allow_http,
            timeout: self.timeout,
            page_limit: self.page_limit,
            ..Options::default()
        }
    }
}

impl Cli {
    /// Mirror node root for read-only commands
    pub fn query_mirror_url(&self) -> &str {
        non_blank(&self.mirror_url)
            .or_else(|| network_mirror_url(&self.network))
            .unwrap_or(TESTNET_MIRROR_URL)
    }
}

impl SimulateArgs {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.propagation_delay_ms)
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        let delay = Duration::from_millis(self.sync_delay_ms);
        SimulationConfig {
            users: self.users,
            records_per_user: self.records,
            sync: match self.sync {
                SyncMode::Fixed => SyncStrategy::FixedDelay(delay),
                SyncMode::Poll => SyncStrategy::Poll {
                    max_attempts: self.poll_attempts,
                    initial_delay: delay,
                },
            },
            ..SimulationConfig::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: &str = "302e020100300506032b6570042204200101010101010101010101010101010101010101010101010101010101010101";

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["hcs-purchase-records"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn valid_operator() {
        let cli = parse(&["--operator-id", "0.0.1234", "--operator-key", KEY]);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.operator_id, AccountId::new(0, 0, 1234));
        assert_eq!(config.operator_key.to_bytes(), [1u8; 32]);
        assert_eq!(config.topic_id, None);
        assert_eq!(config.network, "testnet");
        assert_eq!(config.page_limit, 100);
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let cli = parse(&["--operator-key", KEY]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::MissingOperatorId)
        ));

        let cli = parse(&["--operator-id", "0.0.2", "--operator-key", "  "]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::MissingOperatorKey)
        ));
    }

    #[test]
    fn malformed_credentials_are_fatal() {
        let cli = parse(&["--operator-id", "1234", "--operator-key", KEY]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::InvalidOperatorId(_))
        ));

        let cli = parse(&["--operator-id", "0.0.2", "--operator-key", "nope"]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::InvalidOperatorKey(_))
        ));
    }

    #[test]
    fn blank_topic_is_unset() {
        let cli = parse(&[
            "--operator-id",
            "0.0.2",
            "--operator-key",
            KEY,
            "--topic-id",
            " ",
        ]);
        assert_eq!(Config::from_cli(&cli).unwrap().topic_id, None);

        let cli = parse(&[
            "--operator-id",
            "0.0.2",
            "--operator-key",
            KEY,
            "--topic-id",
            "0.0.x",
        ]);
        assert!(matches!(
            Config::from_cli(&cli),
            Err(ConfigError::InvalidTopicId { name: "TOPIC_ID", .. })
        ));
    }

    #[test]
    fn simulate_subcommand() {
        let cli = parse(&["simulate", "--users", "2", "--records", "3", "--sync", "poll"]);
        let Some(Command::Simulate(args)) = cli.command else {
            panic!("expected simulate");
        };
        let config = args.simulation_config();
        assert_eq!(config.users, 2);
        assert_eq!(config.records_per_user, 3);
        assert!(matches!(
            config.sync,
            SyncStrategy::Poll { max_attempts: 6, .. }
        ));
    }

    #[test]
    fn local_mode_rejects_mirror_url() {
        let cli = parse(&[
            "--operator-id",
            "0.0.2",
            "--operator-key",
            KEY,
            "--mirror-url",
            "https://testnet.mirrornode.hedera.com/api/v1",
            "simulate",
            "--local",
        ]);
        let Some(Command::Simulate(args)) = cli.command.clone() else {
            panic!("expected simulate");
        };
        assert!(args.local);
        assert!(matches!(
            Config::for_simulation(&cli, &args),
            Err(ConfigError::MirrorUrlWithLocalLedger)
        ));

        // the same URL is fine against the network
        let remote = SimulateArgs::default();
        let config = Config::for_simulation(&cli, &remote).unwrap();
        assert_eq!(
            config.remote_mirror_url(),
            "https://testnet.mirrornode.hedera.com/api/v1"
        );
    }

    #[test]
    fn http_mirror_needs_explicit_opt_in() {
        let cli = parse(&["--operator-id", "0.0.2", "--operator-key", KEY]);
        assert!(!Config::from_cli(&cli).unwrap().allow_http);

        let cli = parse(&[
            "--operator-id",
            "0.0.2",
            "--operator-key",
            KEY,
            "--allow-http",
        ]);
        let config = Config::from_cli(&cli).unwrap();
        assert!(config.allow_http);
        assert!(config.mirror_options(config.allow_http).allow_http);
    }

    #[test]
    fn mirror_follows_network() {
        let cli = parse(&[
            "--operator-id",
            "0.0.2",
            "--operator-key",
            KEY,
            "--network",
            "mainnet",
        ]);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.remote_mirror_url(), crate::mirror::MAINNET_MIRROR_URL);
        assert_eq!(cli.query_mirror_url(), crate::mirror::MAINNET_MIRROR_URL);
    }

    #[test]
    fn query_defaults_to_testnet_mirror() {
        let cli = parse(&["query", "--topic", "0.0.5", "--identity", "did:hedera:0.0.7"]);
        assert_eq!(cli.query_mirror_url(), TESTNET_MIRROR_URL);
        assert!(matches!(cli.command, Some(Command::Query(_))));
    }
}
