//! Fake collaborators shared by the integration tests. Each fake is driven
//! entirely through an `Arc<parking_lot::Mutex<...>>` so a test can mutate
//! the world the checker under test observes without touching its internals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethereum_types::Address;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use flux_monitor::collaborators::{AggregatorClient, BridgeStore, Fetcher, JobStore, RunManager, Unsubscribe};
use flux_monitor::error::{AggregatorError, BridgeError, FetchError, JobStoreError, RunManagerError};
use flux_monitor::factory::FetcherBuilder;
use flux_monitor::types::{AggregatorLog, Bridge, FluxMonitorInitiator, JobId, JobRunId, JobSpec, RoundState};

#[derive(Clone)]
pub struct FakeAggregator {
    pub state: Arc<Mutex<RoundState>>,
    /// Controls what `subscribe` reports as the initial connection result.
    pub connected_on_subscribe: bool,
    /// Counts `round_state` RPCs, so a test can assert none were made while
    /// the checker believed itself disconnected.
    pub round_state_calls: Arc<Mutex<usize>>,
}

impl FakeAggregator {
    pub fn new(state: RoundState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            connected_on_subscribe: true,
            round_state_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// A fake whose subscription reports disconnected until the test calls
    /// `OnConnect` itself, modelling the aggregator client's connection
    /// supervisor discovering connectivity after the fact.
    pub fn new_disconnected(state: RoundState) -> Self {
        Self {
            connected_on_subscribe: false,
            ..Self::new(state)
        }
    }

    pub fn set(&self, state: RoundState) {
        *self.state.lock() = state;
    }

    pub fn round_state_call_count(&self) -> usize {
        *self.round_state_calls.lock()
    }
}

#[async_trait]
impl AggregatorClient for FakeAggregator {
    async fn round_state(&self, _oracle: Address) -> Result<RoundState, AggregatorError> {
        *self.round_state_calls.lock() += 1;
        Ok(*self.state.lock())
    }

    async fn available_funds(&self) -> Result<u128, AggregatorError> {
        Ok(self.state.lock().available_funds)
    }

    fn method_id(&self, _signature: &str) -> [u8; 4] {
        [0xde, 0xad, 0xbe, 0xef]
    }

    fn subscribe(
        &self,
        _sender: mpsc::Sender<Result<AggregatorLog, AggregatorError>>,
    ) -> (bool, Unsubscribe) {
        (self.connected_on_subscribe, Box::new(|| {}))
    }
}

#[derive(Clone)]
pub struct FakeFetcher {
    pub price: Arc<Mutex<Decimal>>,
}

impl FakeFetcher {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: Arc::new(Mutex::new(price)),
        }
    }

    pub fn set(&self, price: Decimal) {
        *self.price.lock() = price;
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self) -> Result<Decimal, FetchError> {
        Ok(*self.price.lock())
    }
}

pub struct FakeFetcherBuilder {
    pub fetcher: Arc<dyn Fetcher>,
}

impl FetcherBuilder for FakeFetcherBuilder {
    fn build(&self, _urls: Vec<String>, _timeout: Duration) -> Arc<dyn Fetcher> {
        Arc::clone(&self.fetcher)
    }
}

#[derive(Clone)]
pub struct FakeRunManager {
    pub runs: Arc<Mutex<Vec<(JobId, serde_json::Value)>>>,
}

impl FakeRunManager {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl RunManager for FakeRunManager {
    async fn create(
        &self,
        job_id: &JobId,
        _initiator: &FluxMonitorInitiator,
        request_params: serde_json::Value,
    ) -> Result<JobRunId, RunManagerError> {
        let mut runs = self.runs.lock();
        let run_id = JobRunId(format!("run-{}", runs.len()));
        runs.push((job_id.clone(), request_params));
        Ok(run_id)
    }
}

pub struct NoBridges;

#[async_trait]
impl BridgeStore for NoBridges {
    async fn find_bridge(&self, name: &str) -> Result<Bridge, BridgeError> {
        Err(BridgeError(format!("no such bridge: {name}")))
    }
}

/// A `JobStore` fixed at construction time, to exercise `Service::start`'s
/// bootstrap fan-out against a chosen set of persisted jobs.
pub struct FakeJobStore {
    pub jobs: Vec<JobSpec>,
}

impl FakeJobStore {
    pub fn new(jobs: Vec<JobSpec>) -> Self {
        Self { jobs }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn jobs(&self) -> Result<Vec<JobSpec>, JobStoreError> {
        Ok(self.jobs.clone())
    }
}

pub fn eligible_state(reportable_round_id: u64, latest_answer: i128, available_funds: u128) -> RoundState {
    RoundState {
        reportable_round_id,
        eligible_to_submit: true,
        latest_answer,
        times_out_at: 0,
        available_funds,
        payment_amount: 0,
    }
}

pub fn initiator(polling_interval: Duration, idle_threshold: Duration, threshold_pct: Decimal) -> FluxMonitorInitiator {
    FluxMonitorInitiator {
        address: Address::from_low_u64_be(1),
        feeds: serde_json::json!(["https://a.example/price"]),
        request_data: serde_json::json!({}),
        threshold: threshold_pct,
        precision: 0,
        polling_interval,
        idle_threshold,
    }
}
