//! Process-wide configuration. Per-job settings live on `FluxMonitorInitiator`;
//! this module only covers the knobs that apply across every checker.

use std::time::Duration;

use clap::Parser;

/// The contract's HTTP timeout and the floor on `pollingInterval` (spec §3).
pub const MINIMUM_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Default aggregate HTTP timeout the `CheckerFactory` binds fetchers to (spec §4.5).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the per-checker inbound log buffer (spec §5).
pub const LOG_QUEUE_CAPACITY: usize = 100;

#[derive(Parser, Debug, Clone)]
#[command(name = "flux-monitor")]
#[command(about = "Off-chain control loop for a decentralized oracle's price feed jobs")]
pub struct MonitorConfig {
    /// This node's own oracle identity (the keystore's signing address),
    /// hex-encoded. Distinct from any initiator's `address`, which names the
    /// aggregator contract a job monitors.
    #[arg(long, env = "FLUX_MONITOR_ORACLE_ADDRESS")]
    pub oracle_address: String,

    /// Minimum available on-chain funds required before a poll is allowed to submit.
    #[arg(long, env = "FLUX_MONITOR_MIN_CONTRACT_PAYMENT", default_value = "0")]
    pub minimum_contract_payment: u128,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FLUX_MONITOR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl MonitorConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

/// Loads a `.env` file the way the teacher's `load_env` does: search the
/// working directory first, then fall back to a manifest-relative path so
/// running via `cargo run --manifest-path` from elsewhere still finds it.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}
