//! Binary entrypoint. Wires up a `Service` and drives it until interrupted.
//!
//! The five collaborator traits in `collaborators.rs` are the seam between
//! this core and a concrete chain client / job scheduler; a host embedding
//! this crate supplies real implementations. What ships here is the
//! process harness: configuration, logging, and the supervisor's lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use ethereum_types::Address;
use tokio::sync::mpsc;
use tracing::info;

use flux_monitor::collaborators::{AggregatorClient, BridgeStore, Fetcher, JobStore, RunManager, Unsubscribe};
use flux_monitor::config::{self, MonitorConfig, DEFAULT_HTTP_TIMEOUT};
use flux_monitor::error::{AggregatorError, BridgeError, FetchError, JobStoreError, RunManagerError};
use flux_monitor::factory::{CheckerFactory, FetcherBuilder};
use flux_monitor::service::Service;
use flux_monitor::types::{AggregatorLog, Bridge, FluxMonitorInitiator, JobId, JobRunId, JobSpec, RoundState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    let cfg = MonitorConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(cfg.tracing_level())
        .init();

    let oracle_address = parse_address(&cfg.oracle_address)
        .context("FLUX_MONITOR_ORACLE_ADDRESS is not a valid address")?;

    info!(
        oracle_address = %cfg.oracle_address,
        minimum_contract_payment = cfg.minimum_contract_payment,
        "starting flux-monitor"
    );

    let factory = CheckerFactory::new(
        oracle_address,
        cfg.minimum_contract_payment,
        DEFAULT_HTTP_TIMEOUT,
        Arc::new(UnconfiguredBridgeStore),
        Arc::new(UnconfiguredFetcherBuilder),
        Arc::new(|_addr: Address| Arc::new(UnconfiguredAggregatorClient) as Arc<dyn AggregatorClient>),
        Arc::new(UnconfiguredRunManager),
    );
    let (_handle, join) = Service::new(factory, Arc::new(UnconfiguredJobStore)).start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        result = join => {
            result?;
        }
    }

    Ok(())
}

/// Parses a `0x`-prefixed hex address without depending on `ethereum_types`'
/// `FromStr` impl, which is only present under feature combinations this
/// crate's `default-features = false` stack does not enable.
fn parse_address(s: &str) -> anyhow::Result<Address> {
    let bytes = hex::decode(s.trim_start_matches("0x")).context("address is not valid hex")?;
    anyhow::ensure!(bytes.len() == 20, "address must be 20 bytes, got {}", bytes.len());
    Ok(Address::from_slice(&bytes))
}

/// Stand-in `BridgeStore` used until a host wires up its own. Every lookup
/// fails, so a job whose feeds reference a bridge will fail to build rather
/// than silently resolving to nothing.
struct UnconfiguredBridgeStore;

#[async_trait]
impl BridgeStore for UnconfiguredBridgeStore {
    async fn find_bridge(&self, name: &str) -> Result<Bridge, BridgeError> {
        Err(BridgeError(format!(
            "no bridge store configured; cannot resolve bridge {name}"
        )))
    }
}

struct UnconfiguredFetcherBuilder;

impl FetcherBuilder for UnconfiguredFetcherBuilder {
    fn build(&self, urls: Vec<String>, _timeout: Duration) -> Arc<dyn Fetcher> {
        Arc::new(UnconfiguredFetcher { urls })
    }
}

struct UnconfiguredFetcher {
    urls: Vec<String>,
}

#[async_trait]
impl Fetcher for UnconfiguredFetcher {
    async fn fetch(&self) -> Result<rust_decimal::Decimal, FetchError> {
        Err(FetchError(format!(
            "no HTTP fetcher configured for feeds: {:?}",
            self.urls
        )))
    }
}

struct UnconfiguredAggregatorClient;

#[async_trait]
impl AggregatorClient for UnconfiguredAggregatorClient {
    async fn round_state(&self, _oracle: Address) -> Result<RoundState, AggregatorError> {
        Err(AggregatorError::RoundState("no chain client configured".to_string()))
    }

    async fn available_funds(&self) -> Result<u128, AggregatorError> {
        Err(AggregatorError::AvailableFunds("no chain client configured".to_string()))
    }

    /// The one piece of this stand-in that is real: a host swapping in its
    /// own chain client still gets the correct selector if it reuses this
    /// `keccak256`-based default rather than hand-rolling the hash.
    fn method_id(&self, signature: &str) -> [u8; 4] {
        use tiny_keccak::{Hasher, Keccak};
        let mut hasher = Keccak::v256();
        let mut output = [0u8; 32];
        hasher.update(signature.as_bytes());
        hasher.finalize(&mut output);
        [output[0], output[1], output[2], output[3]]
    }

    fn subscribe(
        &self,
        _sender: mpsc::Sender<Result<AggregatorLog, AggregatorError>>,
    ) -> (bool, Unsubscribe) {
        (false, Box::new(|| {}))
    }
}

/// Stand-in `JobStore` used until a host wires up its own persistence layer.
/// Reports no persisted jobs, so `Service::start` bootstraps nothing — a host
/// embedding this crate against a real job table supplies the real thing.
struct UnconfiguredJobStore;

#[async_trait]
impl JobStore for UnconfiguredJobStore {
    async fn jobs(&self) -> Result<Vec<JobSpec>, JobStoreError> {
        Ok(Vec::new())
    }
}

struct UnconfiguredRunManager;

#[async_trait]
impl RunManager for UnconfiguredRunManager {
    async fn create(
        &self,
        job_id: &JobId,
        _initiator: &FluxMonitorInitiator,
        _request_params: serde_json::Value,
    ) -> Result<JobRunId, RunManagerError> {
        Err(RunManagerError(format!(
            "no run manager configured; job {job_id} cannot submit"
        )))
    }
}
