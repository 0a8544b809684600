//! Layered configuration.
//!
//! Sources, later overriding earlier: `conf/application.yml` (optional),
//! environment variables with the `MIRRORGATE` prefix (dot-separated key
//! paths), then CLI flags. Every recognized option has a typed getter
//! with its default baked in.

use std::collections::HashSet;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};

use mirrorgate_lock::LockConfig;
use mirrorgate_rpc::dispatch::DispatcherConfig;
use mirrorgate_rpc::eth::EthServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "mirrorgate", about = "Ethereum-compatible JSON-RPC gateway")]
struct Cli {
    /// Listen port override
    #[arg(long)]
    port: Option<u16>,

    /// Redis URL override
    #[arg(long)]
    redis_url: Option<String>,

    /// Disable the shared store (forces local strategies)
    #[arg(long)]
    no_redis: bool,
}

pub struct Configuration {
    config: Config,
}

impl Configuration {
    pub fn new() -> Self {
        Self::from_cli(Cli::parse())
    }

    /// Configuration from environment and files only, for tests.
    pub fn without_cli() -> Self {
        Self::from_cli(Cli {
            port: None,
            redis_url: None,
            no_redis: false,
        })
    }

    fn from_cli(args: Cli) -> Self {
        let mut builder = Config::builder()
            .add_source(config::File::with_name("conf/application").required(false))
            .add_source(
                Environment::with_prefix("mirrorgate")
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(port) = args.port {
            builder = builder
                .set_override("http.port", i64::from(port))
                .expect("failed to set port override");
        }
        if let Some(url) = args.redis_url {
            builder = builder
                .set_override("redis.url", url)
                .expect("failed to set redis url override");
        }
        if args.no_redis {
            builder = builder
                .set_override("redis.enabled", false)
                .expect("failed to set redis override");
        }

        let config = builder.build().expect("failed to build configuration");
        Self { config }
    }

    pub fn http_address(&self) -> String {
        self.config
            .get_string("http.address")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }

    pub fn http_port(&self) -> u16 {
        self.config.get_int("http.port").unwrap_or(7546) as u16
    }

    /// HTTP status used when a valid JSON-RPC request produces a
    /// client-side error envelope: 200 (error-in-envelope) or 400.
    pub fn on_valid_response_status_code(&self) -> u16 {
        match self.config.get_int("http.client_error_status_code") {
            Ok(400) => 400,
            _ => 200,
        }
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("log.level")
            .unwrap_or_else(|_| "info".to_string())
    }

    pub fn redis_enabled(&self) -> bool {
        self.config.get_bool("redis.enabled").unwrap_or(true)
    }

    pub fn redis_url(&self) -> String {
        self.config
            .get_string("redis.url")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    pub fn batch_requests_enabled(&self) -> bool {
        self.config.get_bool("rpc.batch.enabled").unwrap_or(true)
    }

    pub fn batch_requests_max_size(&self) -> usize {
        self.config.get_int("rpc.batch.max_size").unwrap_or(100) as usize
    }

    pub fn batch_requests_disallowed_methods(&self) -> HashSet<String> {
        self.config
            .get_string("rpc.batch.disallowed_methods")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|_| {
                [
                    "eth_newFilter",
                    "eth_newBlockFilter",
                    "eth_newPendingTransactionFilter",
                    "eth_uninstallFilter",
                    "eth_getFilterChanges",
                ]
                .into_iter()
                .map(str::to_string)
                .collect()
            })
    }

    pub fn call_data_size_limit(&self) -> usize {
        self.config
            .get_int("rpc.call_data_size_limit")
            .unwrap_or(131_072) as usize
    }

    pub fn send_raw_transaction_size_limit(&self) -> usize {
        self.config
            .get_int("rpc.send_raw_transaction_size_limit")
            .unwrap_or(133_120) as usize
    }

    pub fn rate_limit_disabled(&self) -> bool {
        self.config.get_bool("rate_limit.disabled").unwrap_or(false)
    }

    pub fn default_rate_limit(&self) -> u32 {
        self.config.get_int("rate_limit.default_limit").unwrap_or(200) as u32
    }

    pub fn limit_duration(&self) -> Duration {
        Duration::from_millis(
            self.config.get_int("rate_limit.duration_ms").unwrap_or(60_000) as u64,
        )
    }

    pub fn lock_max_hold(&self) -> Duration {
        Duration::from_millis(self.config.get_int("lock.max_hold_ms").unwrap_or(30_000) as u64)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        // clamped to the supported 50-500 ms polling band
        let ms = self
            .config
            .get_int("lock.queue_poll_interval_ms")
            .unwrap_or(100)
            .clamp(50, 500) as u64;
        Duration::from_millis(ms)
    }

    pub fn lock_heartbeat_missed_count(&self) -> u32 {
        self.config
            .get_int("lock.heartbeat_missed_count")
            .unwrap_or(3)
            .max(2) as u32
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(
            self.config.get_int("lock.acquire_timeout_ms").unwrap_or(30_000) as u64,
        )
    }

    pub fn local_lock_max_entries(&self) -> u64 {
        self.config.get_int("lock.local_max_entries").unwrap_or(1_000) as u64
    }

    pub fn local_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.config.get_int("lock.local_ttl_ms").unwrap_or(300_000) as u64)
    }

    pub fn chain_id(&self) -> u64 {
        self.config.get_int("backend.chain_id").unwrap_or(298) as u64
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            max_hold: self.lock_max_hold(),
            poll_interval: self.lock_poll_interval(),
            heartbeat_missed_count: self.lock_heartbeat_missed_count(),
            local_max_entries: self.local_lock_max_entries(),
            local_entry_ttl: self.local_lock_ttl(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_enabled: self.batch_requests_enabled(),
            batch_max_size: self.batch_requests_max_size(),
            batch_disallowed_methods: self.batch_requests_disallowed_methods(),
        }
    }

    pub fn eth_service_config(&self) -> EthServiceConfig {
        EthServiceConfig {
            call_data_size_limit: self.call_data_size_limit(),
            send_raw_transaction_size_limit: self.send_raw_transaction_size_limit(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::without_cli()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = Configuration::without_cli();
        assert_eq!(configuration.http_port(), 7546);
        assert_eq!(configuration.on_valid_response_status_code(), 200);
        assert!(configuration.batch_requests_enabled());
        assert_eq!(configuration.batch_requests_max_size(), 100);
        assert_eq!(configuration.default_rate_limit(), 200);
        assert_eq!(configuration.limit_duration(), Duration::from_secs(60));
        assert_eq!(configuration.lock_max_hold(), Duration::from_secs(30));
        assert_eq!(configuration.local_lock_max_entries(), 1_000);
        assert_eq!(configuration.chain_id(), 298);
        assert!(
            configuration
                .batch_requests_disallowed_methods()
                .contains("eth_newFilter")
        );
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let configuration = Configuration::without_cli();
        let interval = configuration.lock_poll_interval();
        assert!(interval >= Duration::from_millis(50));
        assert!(interval <= Duration::from_millis(500));
    }

    #[test]
    fn test_heartbeat_missed_count_floor() {
        let configuration = Configuration::without_cli();
        assert!(configuration.lock_heartbeat_missed_count() >= 2);
    }
}
