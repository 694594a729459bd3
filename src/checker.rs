//! The `DeviationChecker` (spec §4.4, C4): the heart of the core. One
//! instance owns one `FluxMonitorInitiator`'s lifecycle end to end — it is
//! the sole owner of its round-state cache and its three timers, so no lock
//! is needed anywhere in this module (the teacher's channel-owns-state
//! idiom, not a shared `Mutex<HashMap<...>>`).

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethereum_types::Address;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::collaborators::{AggregatorClient, Fetcher, RunManager};
use crate::config::LOG_QUEUE_CAPACITY;
use crate::deviation;
use crate::error::AggregatorError;
use crate::ticker::PauseableTicker;
use crate::types::{AggregatorLog, FluxMonitorInitiator, JobId, RoundState, RunRequestPayload};

/// Messages `DeviationChecker::start` accepts from its handle. Named after
/// the public contract this core exposes: Start/Stop/OnConnect/OnDisconnect/
/// HandleLog.
enum CheckerMsg {
    Stop,
    OnConnect,
    OnDisconnect,
    HandleLog(Result<AggregatorLog, AggregatorError>),
}

/// A cheap, cloneable remote control for a running checker task.
#[derive(Clone)]
pub struct CheckerHandle {
    tx: mpsc::Sender<CheckerMsg>,
}

impl CheckerHandle {
    pub async fn stop(&self) {
        let _ = self.tx.send(CheckerMsg::Stop).await;
    }

    pub async fn on_connect(&self) {
        let _ = self.tx.send(CheckerMsg::OnConnect).await;
    }

    pub async fn on_disconnect(&self) {
        let _ = self.tx.send(CheckerMsg::OnDisconnect).await;
    }

    /// Non-blocking by design: a log the checker can't keep up with is
    /// dropped rather than backing up the aggregator's subscription callback.
    pub fn handle_log(&self, log: Result<AggregatorLog, AggregatorError>) {
        let _ = self.tx.try_send(CheckerMsg::HandleLog(log));
    }

    /// Bridges `AggregatorClient::subscribe`'s raw log channel into this
    /// checker's own message queue, so a log delivered through the
    /// subscription is handled identically to one delivered via `handle_log`
    /// directly. The bridging task ends on its own once the aggregator
    /// client drops its side of the channel (typically via `Unsubscribe`).
    fn log_sink(&self) -> mpsc::Sender<Result<AggregatorLog, AggregatorError>> {
        let (tx, mut rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                handle.handle_log(log);
            }
        });
        tx
    }
}

pub struct DeviationChecker {
    job_id: JobId,
    initiator: FluxMonitorInitiator,
    /// This oracle's own signing identity (from the keystore), distinct from
    /// `initiator.address` (the aggregator contract being monitored). Used
    /// for `RoundState` RPCs, which are always relative to a specific
    /// oracle, and for recognizing rounds this node itself started.
    oracle_identity: Address,
    minimum_contract_payment: u128,

    aggregator: Arc<dyn AggregatorClient>,
    fetcher: Arc<dyn Fetcher>,
    run_manager: Arc<dyn RunManager>,

    function_selector: [u8; 4],

    connected: bool,
    reportable_round_id: u64,
    timeout_armed: bool,

    poll_ticker: PauseableTicker,
    idle_ticker: PauseableTicker,
    round_timeout: Pin<Box<Sleep>>,
}

impl DeviationChecker {
    pub fn new(
        job_id: JobId,
        initiator: FluxMonitorInitiator,
        oracle_identity: Address,
        minimum_contract_payment: u128,
        function_selector: [u8; 4],
        aggregator: Arc<dyn AggregatorClient>,
        fetcher: Arc<dyn Fetcher>,
        run_manager: Arc<dyn RunManager>,
    ) -> Self {
        let polling_interval = initiator.polling_interval;
        let idle_threshold = initiator.idle_threshold;
        Self {
            job_id,
            initiator,
            oracle_identity,
            minimum_contract_payment,
            function_selector,
            aggregator,
            fetcher,
            run_manager,
            connected: false,
            reportable_round_id: 0,
            timeout_armed: false,
            poll_ticker: PauseableTicker::new(polling_interval),
            idle_ticker: PauseableTicker::new(if idle_threshold.is_zero() {
                Duration::from_secs(u64::MAX / 2)
            } else {
                idle_threshold
            }),
            round_timeout: Box::pin(tokio::time::sleep(Duration::from_secs(u64::MAX / 2))),
        }
    }

    /// Spawns the checker's run loop and returns a handle plus its join
    /// handle. The checker owns itself for the lifetime of the task; there
    /// is nothing else to hand back. Per spec.md §4.4's initialization
    /// sequence, the very first thing a checker does is subscribe to the
    /// aggregator's log stream and record the connection result as its
    /// initial `connected` value — the aggregator client's connection
    /// supervisor is still free to call `OnConnect`/`OnDisconnect` again
    /// later (e.g. on a reconnect) through the returned handle. The poll
    /// ticker is left stopped here — `initialize`'s opportunistic check
    /// decides whether to start it.
    pub fn start(mut self) -> (CheckerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        let handle = CheckerHandle { tx };
        let log_sink = handle.log_sink();
        let (connected, unsubscribe) = self.aggregator.subscribe(log_sink);
        let join = tokio::spawn(async move {
            self.initialize(connected).await;
            if !self.initiator.idle_threshold.is_zero() {
                self.idle_ticker.resume().await;
            }
            self.run(rx).await;
            unsubscribe();
        });
        (handle, join)
    }

    async fn run(&mut self, mut rx: mpsc::Receiver<CheckerMsg>) {
        let idle_enabled = !self.initiator.idle_threshold.is_zero();
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(CheckerMsg::Stop) | None => {
                            debug!(job_id = %self.job_id, "checker stopping");
                            return;
                        }
                        Some(CheckerMsg::OnConnect) => self.set_connected(),
                        Some(CheckerMsg::OnDisconnect) => self.on_disconnect(),
                        Some(CheckerMsg::HandleLog(log)) => self.handle_log(log).await,
                    }
                }
                _ = self.poll_ticker.tick(), if self.connected => {
                    self.poll_if_eligible(self.initiator.threshold).await;
                }
                _ = self.idle_ticker.tick(), if self.connected && idle_enabled => {
                    self.poll_if_eligible(Decimal::ZERO).await;
                }
                _ = &mut self.round_timeout, if self.connected && self.timeout_armed => {
                    self.handle_round_timeout().await;
                }
            }
        }
    }

    /// Initialization per spec §4.4: a one-time opportunistic eligibility
    /// check, gated by the initiator's real threshold (not bypassed) since
    /// the contract's `LatestAnswer` being `0` already bootstraps the
    /// deviation check on a never-yet-answered round. Leaves the poll
    /// ticker stopped if that check submits, starts it otherwise. Runs
    /// exactly once, from `start()`, with the connection result `subscribe`
    /// returned — never again on a later reconnect, which goes through
    /// `set_connected` instead (see its doc comment for why the two must
    /// stay separate).
    async fn initialize(&mut self, connected: bool) {
        self.connected = connected;
        if connected {
            info!(job_id = %self.job_id, "checker connected");
        } else {
            info!(job_id = %self.job_id, "checker starting disconnected; quiescent until reconnect");
        }
        let submitted = self.poll_if_eligible(self.initiator.threshold).await;
        if !submitted {
            self.poll_ticker.resume().await;
        }
    }

    /// spec.md's public contract for `OnConnect`: "set a boolean the loop
    /// reads before any network work" — nothing more. The opportunistic
    /// poll belongs only to `initialize`'s one-time startup sequence; if a
    /// live reconnect re-ran it, it would risk prematurely ending invariant
    /// #4's post-submit pause (or, if the prior submission's tx hasn't yet
    /// been mined and `eligible_to_submit` is still true, a double
    /// submission for the same round).
    fn set_connected(&mut self) {
        self.connected = true;
        info!(job_id = %self.job_id, "checker connected");
    }

    fn on_disconnect(&mut self) {
        self.connected = false;
        info!(job_id = %self.job_id, "checker disconnected; quiescent until reconnect");
    }

    async fn handle_log(&mut self, log: Result<AggregatorLog, AggregatorError>) {
        let log = match log {
            Ok(log) => log,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "aggregator log subscription error");
                return;
            }
        };

        match log {
            AggregatorLog::NewRound {
                round_id,
                started_by,
                ..
            } => self.handle_new_round(round_id, started_by).await,
            AggregatorLog::AnswerUpdated { round_id, .. } => self.handle_answer_updated(round_id).await,
        }
    }

    /// Spec §4.4 "On NewRound(log)": a dedicated eligibility path distinct
    /// from `poll_if_eligible` — no funds precheck and no deviation gate, a
    /// new round this oracle is eligible to answer is always worth
    /// answering. Stale rounds (strictly behind what we already believe is
    /// current) are ignored; rounds we started ourselves are ignored to
    /// avoid self-feedback.
    async fn handle_new_round(&mut self, round_id: u64, started_by: Address) {
        if round_id < self.reportable_round_id {
            debug!(job_id = %self.job_id, round_id, "stale NewRound ignored");
            return;
        }
        if !self.initiator.idle_threshold.is_zero() {
            self.idle_ticker.resume().await;
        }
        if started_by == self.oracle_identity {
            debug!(job_id = %self.job_id, round_id, "ignoring round we started ourselves");
            return;
        }

        let round_state = match self.aggregator.round_state(self.oracle_identity).await {
            Ok(rs) => rs,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "round state RPC failed");
                return;
            }
        };
        // The contract is authoritative over the log: a burst of delayed
        // logs can arrive out of order, but RoundState never lies about
        // what this oracle is expected to answer right now.
        self.reconcile_round_state(&round_state);

        if !round_state.eligible_to_submit {
            return;
        }

        let fetched = match self.fetcher.fetch().await {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "price fetch failed");
                return;
            }
        };

        self.create_job_run(&round_state, fetched).await;
    }

    /// Spec §4.4 "On AnswerUpdated(log)": a stale `AnswerUpdated` (behind
    /// what we believe is current) is ignored; otherwise the round has
    /// closed, so the poll ticker resumes — ending the post-submit pause
    /// invariant #4 relies on.
    async fn handle_answer_updated(&mut self, round_id: u64) {
        if round_id < self.reportable_round_id {
            debug!(job_id = %self.job_id, round_id, "stale AnswerUpdated ignored");
            return;
        }
        self.poll_ticker.resume().await;
    }

    /// A round-timeout firing means the round closed (or died) without this
    /// loop necessarily having seen its `AnswerUpdated`; either way the
    /// pause that invariant #4 imposes after a submission no longer applies,
    /// so the poll ticker resumes unless this very check submits (which
    /// re-enters the paused state for the new round).
    async fn handle_round_timeout(&mut self) {
        self.timeout_armed = false;
        let submitted = self.poll_if_eligible(self.initiator.threshold).await;
        if !submitted {
            self.poll_ticker.resume().await;
        }
    }

    /// Arms (or disarms) the round-timeout timer from an aggregator-reported
    /// absolute expiry. `times_out_at == 0` means the round never expires.
    fn arm_round_timeout(&mut self, times_out_at: u64) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if times_out_at == 0 {
            self.timeout_armed = false;
            return;
        }
        let remaining = times_out_at.saturating_sub(now);
        self.round_timeout.as_mut().reset(Instant::now() + Duration::from_secs(remaining));
        self.timeout_armed = true;

        if let Some(deadline) = chrono::DateTime::from_timestamp(times_out_at as i64, 0) {
            debug!(job_id = %self.job_id, %deadline, "round timeout armed");
        }
    }

    /// The eligibility funnel behind poll ticks, idle ticks, and
    /// round-timeout ticks (spec §4.4 "pollIfEligible"). `threshold` is the
    /// deviation gate to apply: the initiator's real threshold for poll and
    /// round-timeout ticks, or `Decimal::ZERO` for idle ticks (any movement,
    /// including none, counts as outside — idle exists precisely to force a
    /// refresh independent of deviation). Returns whether a job run was
    /// created.
    async fn poll_if_eligible(&mut self, threshold: Decimal) -> bool {
        if !self.connected {
            return false;
        }

        let round_state = match self.aggregator.round_state(self.oracle_identity).await {
            Ok(rs) => rs,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "round state RPC failed");
                return false;
            }
        };

        self.reconcile_round_state(&round_state);

        if !round_state.eligible_to_submit {
            debug!(job_id = %self.job_id, "not eligible to submit");
            return false;
        }

        let available_funds = match self.aggregator.available_funds().await {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "available funds RPC failed");
                return false;
            }
        };
        if available_funds < self.minimum_contract_payment {
            warn!(job_id = %self.job_id, "contract underfunded; skipping poll");
            return false;
        }

        let fetched = match self.fetcher.fetch().await {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "price fetch failed");
                return false;
            }
        };

        let current = Decimal::from_i128_with_scale(round_state.latest_answer, self.initiator.precision as u32);
        if !deviation::outside(current, fetched, threshold) {
            debug!(job_id = %self.job_id, "within deviation threshold; skipping");
            return false;
        }

        self.create_job_run(&round_state, fetched).await
    }

    /// Submits a job run and, on success, pauses the poll ticker (invariant
    /// #4 — at most one outstanding request per `(jobID, reportableRoundID)`)
    /// and rearms the idle ticker, on both the poll-triggered and
    /// NewRound-triggered paths.
    async fn create_job_run(&mut self, round_state: &RoundState, result: Decimal) -> bool {
        let payload = self.build_run_request(round_state, result);
        match self
            .run_manager
            .create(&self.job_id, &self.initiator, serde_json::to_value(&payload).unwrap())
            .await
        {
            Ok(run_id) => {
                info!(job_id = %self.job_id, ?run_id, "submitted job run");
                self.poll_ticker.stop();
                if !self.initiator.idle_threshold.is_zero() {
                    self.idle_ticker.resume().await;
                }
                true
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "run manager rejected job run");
                false
            }
        }
    }

    fn reconcile_round_state(&mut self, round_state: &RoundState) {
        if round_state.reportable_round_id > self.reportable_round_id {
            self.reportable_round_id = round_state.reportable_round_id;
        }
        self.arm_round_timeout(round_state.times_out_at);
    }

    fn build_run_request(&self, round_state: &RoundState, result: Decimal) -> RunRequestPayload {
        RunRequestPayload {
            result,
            address: format!("0x{}", hex::encode(self.initiator.address.as_bytes())),
            function_selector: format!("0x{}", hex::encode(self.function_selector)),
            data_prefix: format!("0x{}", hex::encode(encode_round_id(round_state.reportable_round_id))),
        }
    }
}

/// Big-endian, left-zero-padded 32-byte encoding of a round ID, matching
/// Solidity's `uint256` ABI word layout.
fn encode_round_id(round_id: u64) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[24..].copy_from_slice(&round_id.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_id_encoding_is_big_endian_and_left_padded() {
        let encoded = encode_round_id(1);
        assert_eq!(encoded[31], 1);
        assert!(encoded[..31].iter().all(|b| *b == 0));

        let encoded = encode_round_id(0x0102_0304);
        assert_eq!(&encoded[28..], &[0x01, 0x02, 0x03, 0x04]);
    }
}
