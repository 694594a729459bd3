//! Core data model: jobs, initiators, on-chain round state, and the
//! aggregator log variants the checker reacts to.

use std::time::Duration;

use ethereum_types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Opaque job identifier. Equality/hash drive the `Service`'s job map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job as seen by the core: opaque except for its initiators.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub initiators: Vec<Initiator>,
}

impl JobSpec {
    /// The `FluxMonitor`-typed initiators on this job, in declaration order.
    pub fn flux_monitor_initiators(&self) -> impl Iterator<Item = &FluxMonitorInitiator> {
        self.initiators.iter().filter_map(|i| match i {
            Initiator::FluxMonitor(fm) => Some(fm),
            Initiator::Other => None,
        })
    }
}

/// Only `FluxMonitor` initiators are meaningful to this core; every other
/// initiator type on a job is carried through as `Other` and ignored.
#[derive(Debug, Clone)]
pub enum Initiator {
    FluxMonitor(FluxMonitorInitiator),
    Other,
}

/// Configuration carried by one `FluxMonitor` initiator. See spec §3.
#[derive(Debug, Clone)]
pub struct FluxMonitorInitiator {
    pub address: Address,
    /// Heterogeneous JSON array: URL strings or `{"bridge": "<name>"}` objects.
    pub feeds: serde_json::Value,
    pub request_data: serde_json::Value,
    /// Nonnegative fractional deviation threshold, as a percentage (0.5 = 0.5%).
    pub threshold: Decimal,
    /// The contract's latest answer is scaled by `10^precision`.
    pub precision: u8,
    pub polling_interval: Duration,
    /// Zero disables idle-driven polling.
    pub idle_threshold: Duration,
}

/// Per-oracle round state as returned by the aggregator client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundState {
    pub reportable_round_id: u64,
    pub eligible_to_submit: bool,
    pub latest_answer: i128,
    /// Unix timestamp the round expires at, or `0` for "none".
    pub times_out_at: u64,
    pub available_funds: u128,
    pub payment_amount: u128,
}

/// Logs the aggregator's subscription delivers. Any wire variant this crate
/// does not model is never constructed by a well-behaved `AggregatorClient`
/// and is instead surfaced as the `Err` side of `HandleLog`'s input.
#[derive(Debug, Clone, Copy)]
pub enum AggregatorLog {
    NewRound {
        round_id: u64,
        started_by: Address,
        started_at: u64,
        address: Address,
    },
    AnswerUpdated {
        round_id: u64,
        current: i128,
        timestamp: u64,
        address: Address,
    },
}

impl AggregatorLog {
    pub fn round_id(&self) -> u64 {
        match self {
            AggregatorLog::NewRound { round_id, .. } => *round_id,
            AggregatorLog::AnswerUpdated { round_id, .. } => *round_id,
        }
    }
}

/// A registered HTTP bridge, as resolved from the bridge store.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub name: String,
    pub url: String,
}

/// The structured message handed to the `RunManager`, per spec §4.4.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequestPayload {
    /// The polled decimal answer.
    pub result: Decimal,
    /// Aggregator contract address, hex-encoded.
    pub address: String,
    /// First 4 bytes of `keccak256("updateAnswer(uint256,int256)")`, hex-encoded.
    pub function_selector: String,
    /// 32-byte big-endian encoding of `reportableRoundID`, hex-encoded.
    pub data_prefix: String,
}

/// Opaque handle to a created job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunId(pub String);
