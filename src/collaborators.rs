//! Trait seams for the collaborators this core depends on but does not
//! implement: the RunManager, the aggregator contract client, the median
//! price fetcher, the bridge store, and the job store (spec §6). Production
//! wiring supplies concrete implementations; tests supply fakes (see
//! `tests/support`).

use async_trait::async_trait;
use ethereum_types::Address;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::error::{AggregatorError, BridgeError, FetchError, JobStoreError, RunManagerError};
use crate::types::{Bridge, FluxMonitorInitiator, JobId, JobRunId, JobSpec, RoundState};

/// The aggregator method every submitted run request targets. `CheckerFactory`
/// pins this to a 4-byte selector once, via `AggregatorClient::method_id`,
/// at construction time.
pub const UPDATE_ANSWER_SIGNATURE: &str = "updateAnswer(uint256,int256)";

/// Executes the off-chain computation pipeline and submits the resulting
/// on-chain transaction. `creation_height` is always `None` from this core.
#[async_trait]
pub trait RunManager: Send + Sync {
    async fn create(
        &self,
        job_id: &JobId,
        initiator: &FluxMonitorInitiator,
        request_params: serde_json::Value,
    ) -> Result<JobRunId, RunManagerError>;
}

/// A live, already-unsubscribed-on-drop handle to a log subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Wraps the on-chain aggregator contract for one address.
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    /// `oracle` is this node's own signing identity, not the contract
    /// address this client is already bound to — `RoundState` is always
    /// reported relative to a specific oracle.
    async fn round_state(&self, oracle: Address) -> Result<RoundState, AggregatorError>;
    async fn available_funds(&self) -> Result<u128, AggregatorError>;

    /// Pins a method signature to its 4-byte selector. Synchronous: this is
    /// a pure hash, not an RPC.
    fn method_id(&self, signature: &str) -> [u8; 4];

    /// Subscribes `sender` to this aggregator's log stream. Returns whether
    /// the subscription connected immediately, and a thunk that unsubscribes.
    fn subscribe(
        &self,
        sender: mpsc::Sender<Result<crate::types::AggregatorLog, AggregatorError>>,
    ) -> (bool, Unsubscribe);
}

/// Returns the median of N off-chain HTTP price sources, bounded by a
/// 5-second aggregate timeout. Individual endpoint failures are the
/// fetcher's problem as long as the median is still defined.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Decimal, FetchError>;
}

/// Read-only lookup of registered bridges by name.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    async fn find_bridge(&self, name: &str) -> Result<Bridge, BridgeError>;
}

/// Read-only lookup of every already-persisted job, the way the teacher's
/// ORM-backed job store is modeled elsewhere in that codebase. `Service`
/// queries this exactly once, at `start`, to bootstrap the jobs that were
/// already running before the process last stopped (spec §4.6's `Start`).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn jobs(&self) -> Result<Vec<JobSpec>, JobStoreError>;
}
