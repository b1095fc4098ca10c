//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::{FeeSchedule, WalletAddress, Wei};
use ledger_gateway::{ChainConfig, DEFAULT_FEE_WALLET_FLOOR, DEFAULT_MIN_FEE_BUFFER, GatewayConfig};
use saga::{RelayConfig, RemoteConfig, RetryPolicy, SagaConfig, SweeperConfig};

/// Platform wallet used when `PLATFORM_WALLET` is unset.
pub const DEV_PLATFORM_WALLET: &str = "0x0000000000000000000000000000000000000a11";

/// Escrow contract address used when `ESCROW_CONTRACT` is unset.
pub const DEV_ESCROW_CONTRACT: &str = "0x00000000000000000000000000000000000e5c20";

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `PLATFORM_FEE_PERCENT`: must match the escrow contract (default `5`)
/// - `PAYMENT_MAX_ATTEMPTS`, `PAYMENT_RETRY_BASE_MS`, `PAYMENT_RETRY_FACTOR`
/// - `LEDGER_SUBMIT_TIMEOUT_SECS`, `LEDGER_MIN_FEE_BUFFER_WEI`,
///   `LEDGER_FEE_WALLET_FLOOR_WEI`
/// - `PLATFORM_WALLET`, `ESCROW_CONTRACT`
/// - `RELAY_POLL_INTERVAL_MS`, `RELAY_CONFIRMATION_DEPTH`
/// - `SWEEP_INTERVAL_SECS`, `SWEEP_STALE_AFTER_SECS`
/// - `BLOCK_TIME_MS`: simulated chain block period
/// - `DEV_FUNDED_WALLETS`: comma-separated addresses credited on the simulated chain
/// - `REMOTE_TIMEOUT_MS`, `BREAKER_FAILURE_THRESHOLD`, `BREAKER_OPEN_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,

    pub fee_percent: u8,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_factor: u32,

    pub submit_timeout: Duration,
    pub min_fee_buffer: Wei,
    pub fee_wallet_floor: Wei,
    pub platform_wallet: WalletAddress,
    pub escrow_contract: WalletAddress,

    pub relay_poll_interval: Duration,
    pub confirmation_depth: u64,
    pub sweep_interval: Duration,
    pub sweep_stale_after: Duration,

    pub block_time: Duration,
    pub dev_funded_wallets: Vec<WalletAddress>,

    pub remote_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_open_for: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),

            fee_percent: parse_or(lookup("PLATFORM_FEE_PERCENT"), defaults.fee_percent),
            max_attempts: parse_or(lookup("PAYMENT_MAX_ATTEMPTS"), defaults.max_attempts),
            retry_base: millis("PAYMENT_RETRY_BASE_MS", defaults.retry_base),
            retry_factor: parse_or(lookup("PAYMENT_RETRY_FACTOR"), defaults.retry_factor),

            submit_timeout: secs("LEDGER_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout),
            min_fee_buffer: parse_or(lookup("LEDGER_MIN_FEE_BUFFER_WEI"), defaults.min_fee_buffer),
            fee_wallet_floor: parse_or(
                lookup("LEDGER_FEE_WALLET_FLOOR_WEI"),
                defaults.fee_wallet_floor,
            ),
            platform_wallet: lookup("PLATFORM_WALLET")
                .map(WalletAddress::new)
                .unwrap_or(defaults.platform_wallet),
            escrow_contract: lookup("ESCROW_CONTRACT")
                .map(WalletAddress::new)
                .unwrap_or(defaults.escrow_contract),

            relay_poll_interval: millis("RELAY_POLL_INTERVAL_MS", defaults.relay_poll_interval),
            confirmation_depth: parse_or(
                lookup("RELAY_CONFIRMATION_DEPTH"),
                defaults.confirmation_depth,
            ),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            sweep_stale_after: secs("SWEEP_STALE_AFTER_SECS", defaults.sweep_stale_after),

            block_time: millis("BLOCK_TIME_MS", defaults.block_time),
            dev_funded_wallets: lookup("DEV_FUNDED_WALLETS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(WalletAddress::new)
                        .collect()
                })
                .unwrap_or_default(),

            remote_timeout: millis("REMOTE_TIMEOUT_MS", defaults.remote_timeout),
            breaker_failure_threshold: parse_or(
                lookup("BREAKER_FAILURE_THRESHOLD"),
                defaults.breaker_failure_threshold,
            ),
            breaker_open_for: secs("BREAKER_OPEN_SECS", defaults.breaker_open_for),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.fee_percent)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.escrow_contract.clone(), self.platform_wallet.clone())
            .with_fee_schedule(self.fee_schedule())
            .with_min_fee_buffer(self.min_fee_buffer)
            .with_fee_wallet_floor(self.fee_wallet_floor)
            .with_call_timeout(self.submit_timeout)
    }

    /// The simulated chain's contract, owned by the platform wallet.
    pub fn chain_config(&self) -> ChainConfig {
        let mut chain = ChainConfig::new(self.escrow_contract.clone(), self.platform_wallet.clone());
        chain.fee_schedule = self.fee_schedule();
        chain
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            timeout: self.remote_timeout,
            failure_threshold: self.breaker_failure_threshold,
            open_for: self.breaker_open_for,
        }
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            retry: RetryPolicy::new(self.max_attempts, self.retry_base, self.retry_factor),
            relay: RelayConfig {
                confirmation_depth: self.confirmation_depth,
                poll_interval: self.relay_poll_interval,
                ..RelayConfig::default()
            },
            sweeper: SweeperConfig {
                interval: self.sweep_interval,
                stale_after: self.sweep_stale_after,
            },
            ..SagaConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let remote = RemoteConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,

            fee_percent: FeeSchedule::default().percentage,
            max_attempts: retry.max_attempts,
            retry_base: retry.base_delay,
            retry_factor: retry.factor,

            submit_timeout: Duration::from_secs(30),
            min_fee_buffer: DEFAULT_MIN_FEE_BUFFER,
            fee_wallet_floor: DEFAULT_FEE_WALLET_FLOOR,
            platform_wallet: WalletAddress::new(DEV_PLATFORM_WALLET),
            escrow_contract: WalletAddress::new(DEV_ESCROW_CONTRACT),

            relay_poll_interval: Duration::from_millis(2000),
            confirmation_depth: 0,
            sweep_interval: Duration::from_secs(60),
            sweep_stale_after: Duration::from_secs(300),

            block_time: Duration::from_millis(2000),
            dev_funded_wallets: Vec::new(),

            remote_timeout: remote.timeout,
            breaker_failure_threshold: remote.failure_threshold,
            breaker_open_for: remote.open_for,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.fee_percent, 5);
        assert_eq!(config.max_attempts, 3);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("PAYMENT_MAX_ATTEMPTS", "5"),
            ("PAYMENT_RETRY_BASE_MS", "250"),
            ("RELAY_CONFIRMATION_DEPTH", "3"),
            ("LEDGER_FEE_WALLET_FLOOR_WEI", "42"),
            ("DEV_FUNDED_WALLETS", "0xabc, ,0xdef"),
        ]));

        assert_eq!(config.port, 8081);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base, Duration::from_millis(250));
        assert_eq!(config.confirmation_depth, 3);
        assert_eq!(config.fee_wallet_floor, Wei::new(42));
        assert_eq!(
            config.dev_funded_wallets,
            vec![WalletAddress::new("0xabc"), WalletAddress::new("0xdef")]
        );

        let saga = config.saga_config();
        assert_eq!(saga.retry.max_attempts, 5);
        assert_eq!(saga.relay.confirmation_depth, 3);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "eighty"), ("DATABASE_URL", "")]));
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }
}
