//! Environment-driven configuration for the monitor binary.
//!
//! Main settings are plain variables (`DATABASE_URL`, `CHECK_INTERVAL_MS`,
//! ...). Chains are listed in `BRIDGE_CHAINS` and each one reads its own
//! `<NAME>_*` variables, where `<NAME>` is the chain name upper-cased with
//! every non-alphanumeric character replaced by `_`.

use std::{collections::HashSet, env, time::Duration};

use thiserror::Error;

const DEFAULT_BLOCK_STEP: u64 = 5_000;
const DEFAULT_CONFIRMATIONS: u64 = 100;
const DEFAULT_IDLE_SECS: u64 = 600;
const DEFAULT_RETRY_SECS: u64 = 5;
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_RECONNECT_SECS: u64 = 30;
const DEFAULT_MAX_FAILURES: u32 = 12;
const MAX_TOKEN_DECIMALS: u8 = 36;

/// Static description of one monitored chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub name: String,
    pub rpc_url: String,
    /// Lowercase `0x`-prefixed address whose logs are scanned.
    pub bridge_contract: String,
    pub token_contract: Option<String>,
    pub token_index: u8,
    pub token_decimals: u8,
    pub start_block: u64,
}

/// Pacing of the per-chain scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub block_step: u64,
    /// Minimum distance kept between the checkpoint and the chain head.
    pub confirmations: u64,
    pub idle_interval: Duration,
    pub retry_interval: Duration,
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
    /// Consecutive inner failures tolerated before the session reconnects.
    pub max_consecutive_failures: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            block_step: DEFAULT_BLOCK_STEP,
            confirmations: DEFAULT_CONFIRMATIONS,
            idle_interval: Duration::from_secs(DEFAULT_IDLE_SECS),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            max_consecutive_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertSettings {
    pub telegram: Option<TelegramSettings>,
    pub lark_webhook_url: Option<String>,
}

/// Everything the monitor needs at startup, loaded once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    database_url: String,
    check_interval: Duration,
    stuck_after: Duration,
    scan: ScanSettings,
    alerts: AlertSettings,
    chains: Vec<ChainSpec>,
}

impl MonitorConfig {
    /// Hydrates `.env` (if present) and reads the process variables. Missing
    /// or malformed entries surface as `ConfigError`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let database_url = get_required_var("DATABASE_URL")?;
        let check_interval_ms: u64 = parse_required("CHECK_INTERVAL_MS")?;
        if check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL_MS".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let stuck_after = Duration::from_secs(parse_optional("STUCK_AFTER_SECS")?.unwrap_or(0));

        Ok(Self {
            database_url,
            check_interval: Duration::from_millis(check_interval_ms),
            stuck_after,
            scan: load_scan_settings()?,
            alerts: load_alert_settings()?,
            chains: load_chains()?,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn stuck_after(&self) -> Duration {
        self.stuck_after
    }

    pub fn scan(&self) -> &ScanSettings {
        &self.scan
    }

    pub fn alerts(&self) -> &AlertSettings {
        &self.alerts
    }

    pub fn chains(&self) -> &[ChainSpec] {
        &self.chains
    }
}

fn load_scan_settings() -> Result<ScanSettings, ConfigError> {
    let defaults = ScanSettings::default();
    let block_step = parse_optional("SCAN_BLOCK_STEP")?.unwrap_or(defaults.block_step);
    if block_step == 0 {
        return Err(ConfigError::InvalidValue {
            key: "SCAN_BLOCK_STEP".into(),
            reason: "must be greater than zero".into(),
        });
    }
    let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
        Ok(parse_optional(key)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    };

    Ok(ScanSettings {
        block_step,
        confirmations: parse_optional("SCAN_CONFIRMATIONS")?.unwrap_or(defaults.confirmations),
        idle_interval: secs("SCAN_IDLE_SECS", defaults.idle_interval)?,
        retry_interval: secs("SCAN_RETRY_SECS", defaults.retry_interval)?,
        poll_interval: secs("SCAN_POLL_SECS", defaults.poll_interval)?,
        reconnect_interval: secs("SCAN_RECONNECT_SECS", defaults.reconnect_interval)?,
        max_consecutive_failures: parse_optional("SCAN_MAX_FAILURES")?
            .unwrap_or(defaults.max_consecutive_failures)
            .max(1),
    })
}

fn load_alert_settings() -> Result<AlertSettings, ConfigError> {
    let telegram = match (
        get_optional_var("TELEGRAM_BOT_TOKEN"),
        get_optional_var("TELEGRAM_CHAT_IDS"),
    ) {
        (Some(bot_token), Some(raw_ids)) => {
            let chat_ids = raw_ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    id.parse::<i64>()
                        .map_err(|source| ConfigError::InvalidNumber {
                            key: "TELEGRAM_CHAT_IDS".into(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            (!chat_ids.is_empty()).then_some(TelegramSettings {
                bot_token,
                chat_ids,
            })
        }
        _ => None,
    };

    Ok(AlertSettings {
        telegram,
        lark_webhook_url: get_optional_var("LARK_WEBHOOK_URL"),
    })
}

fn load_chains() -> Result<Vec<ChainSpec>, ConfigError> {
    let names = get_required_var("BRIDGE_CHAINS")?;
    let mut seen = HashSet::new();
    let mut chains = Vec::new();

    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let prefix = env_prefix(name);
        if !seen.insert(prefix.clone()) {
            return Err(ConfigError::InvalidValue {
                key: "BRIDGE_CHAINS".into(),
                reason: format!("chain `{name}` is listed more than once"),
            });
        }
        chains.push(load_chain(name, &prefix)?);
    }

    if chains.is_empty() {
        return Err(ConfigError::MissingVar {
            key: "BRIDGE_CHAINS".into(),
        });
    }
    Ok(chains)
}

fn load_chain(name: &str, prefix: &str) -> Result<ChainSpec, ConfigError> {
    let key = |suffix: &str| format!("{prefix}_{suffix}");

    let bridge_key = key("BRIDGE_CONTRACT");
    let bridge_contract = parse_address(&bridge_key, get_required_var(&bridge_key)?)?;
    let token_key = key("TOKEN_CONTRACT");
    let token_contract = get_optional_var(&token_key)
        .map(|value| parse_address(&token_key, value))
        .transpose()?;

    let decimals_key = key("TOKEN_DECIMALS");
    let token_decimals: u8 = parse_required(&decimals_key)?;
    if token_decimals > MAX_TOKEN_DECIMALS {
        return Err(ConfigError::InvalidValue {
            key: decimals_key,
            reason: format!("must be at most {MAX_TOKEN_DECIMALS}"),
        });
    }

    Ok(ChainSpec {
        name: name.to_string(),
        rpc_url: get_required_var(&key("RPC_URL"))?,
        bridge_contract,
        token_contract,
        token_index: parse_required(&key("TOKEN_INDEX"))?,
        token_decimals,
        start_block: parse_optional(&key("START_BLOCK"))?.unwrap_or(0),
    })
}

/// Maps a chain display name onto its environment prefix.
pub fn env_prefix(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_address(key: &str, value: String) -> Result<String, ConfigError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(&value);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a 20-byte hex address".into(),
        });
    }
    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

fn parse_required<T>(key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    get_required_var(key)?
        .parse()
        .map_err(|source| ConfigError::InvalidNumber {
            key: key.to_string(),
            source,
        })
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    get_optional_var(key)
        .map(|value| {
            value.parse().map_err(|source| ConfigError::InvalidNumber {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn get_required_var(key: &str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or_else(|| ConfigError::MissingVar {
        key: key.to_string(),
    })
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("BRIDGE_MONITOR_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: String },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
