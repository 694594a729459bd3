//! `Service` (spec §4.6, C6): the supervisor. One task owns the
//! `JobId -> CheckerHandle` map; every other caller talks to it over a
//! channel, so the map itself never needs a lock (the teacher's
//! channel-owning-state idiom carried through from `checker.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use crate::checker::CheckerHandle;
use crate::collaborators::JobStore;
use crate::error::ServiceError;
use crate::factory::CheckerFactory;
use crate::types::{FluxMonitorInitiator, JobId};

enum ServiceMsg {
    AddJob {
        job_id: JobId,
        initiator: FluxMonitorInitiator,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    RemoveJob {
        job_id: JobId,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<ServiceMsg>,
}

impl ServiceHandle {
    /// Starts a checker for `job_id`. Rejects (without touching the
    /// existing checker) if `job_id` is already running — duplicate
    /// `AddJob` calls are a caller bug, not a reason to tear down running
    /// work.
    pub async fn add_job(&self, job_id: JobId, initiator: FluxMonitorInitiator) -> Result<(), ServiceError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(ServiceMsg::AddJob {
                job_id,
                initiator,
                reply,
            })
            .await
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn remove_job(&self, job_id: JobId) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ServiceMsg::RemoveJob { job_id, reply }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }

    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ServiceMsg::Stop { reply }).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

pub struct Service {
    factory: CheckerFactory,
    job_store: Arc<dyn JobStore>,
}

impl Service {
    pub fn new(factory: CheckerFactory, job_store: Arc<dyn JobStore>) -> Self {
        Self { factory, job_store }
    }

    /// Spawns the supervisor task, then bootstraps it per spec §4.6's
    /// `Start`: every already-persisted job's `FluxMonitor` initiators are
    /// fanned out through the same `AddJob` path a live caller would use,
    /// concurrently, joined via a `JoinSet` before this returns. A single
    /// job failing to build is logged and skipped rather than failing the
    /// whole start — the remaining persisted jobs still come up. Only a
    /// failure to read the job store itself fails `start`.
    pub async fn start(self) -> Result<(ServiceHandle, JoinHandle<()>), ServiceError> {
        let job_store = Arc::clone(&self.job_store);
        let (tx, rx) = mpsc::channel(64);
        let handle = ServiceHandle { tx };
        let join = tokio::spawn(self.run(rx));

        let jobs = job_store.jobs().await?;
        let mut bootstrap = JoinSet::new();
        for job in jobs {
            for initiator in job.flux_monitor_initiators() {
                let handle = handle.clone();
                let job_id = job.id.clone();
                let initiator = initiator.clone();
                bootstrap.spawn(async move {
                    let result = handle.add_job(job_id.clone(), initiator).await;
                    (job_id, result)
                });
            }
        }
        while let Some(outcome) = bootstrap.join_next().await {
            match outcome {
                Ok((job_id, Ok(()))) => info!(%job_id, "bootstrapped persisted job"),
                Ok((job_id, Err(err))) => warn!(%job_id, error = %err, "persisted job failed to bootstrap"),
                Err(join_err) => warn!(error = %join_err, "bootstrap task panicked"),
            }
        }

        Ok((handle, join))
    }

    async fn run(self, mut rx: mpsc::Receiver<ServiceMsg>) {
        let mut checkers: HashMap<JobId, (CheckerHandle, JoinHandle<()>)> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            match msg {
                ServiceMsg::AddJob {
                    job_id,
                    initiator,
                    reply,
                } => {
                    let result = self.add_job(&mut checkers, job_id, initiator).await;
                    let _ = reply.send(result);
                }
                ServiceMsg::RemoveJob { job_id, reply } => {
                    if let Some((checker, join)) = checkers.remove(&job_id) {
                        checker.stop().await;
                        let _ = join.await;
                    }
                    let _ = reply.send(());
                }
                ServiceMsg::Stop { reply } => {
                    for (job_id, (checker, join)) in checkers.drain() {
                        info!(%job_id, "stopping checker");
                        checker.stop().await;
                        let _ = join.await;
                    }
                    let _ = reply.send(());
                    return;
                }
            }
        }

        for (_, (checker, join)) in checkers.drain() {
            checker.stop().await;
            let _ = join.await;
        }
    }

    async fn add_job(
        &self,
        checkers: &mut HashMap<JobId, (CheckerHandle, JoinHandle<()>)>,
        job_id: JobId,
        initiator: FluxMonitorInitiator,
    ) -> Result<(), ServiceError> {
        if checkers.contains_key(&job_id) {
            warn!(%job_id, "rejecting duplicate AddJob");
            return Err(ServiceError::DuplicateJob(job_id));
        }

        let checker = self
            .factory
            .build(job_id.clone(), initiator)
            .await
            .map_err(|source| ServiceError::CheckerConstruction {
                job: job_id.clone(),
                source,
            })?;

        // `checker.start()` subscribes to the aggregator's log stream itself
        // and derives its initial `connected` state from that subscription
        // (spec.md §4.4's initialization sequence), so the supervisor has
        // nothing further to do here before handing the checker back.
        let (handle, join) = checker.start();
        checkers.insert(job_id.clone(), (handle, join));
        info!(%job_id, "checker started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AggregatorClient, BridgeStore, Fetcher, RunManager, Unsubscribe};
    use crate::error::{AggregatorError, BridgeError, FetchError, JobStoreError, RunManagerError};
    use crate::factory::FetcherBuilder;
    use crate::types::{AggregatorLog, Bridge, Initiator, JobRunId, JobSpec, RoundState};
    use async_trait::async_trait;
    use ethereum_types::Address;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoBridges;
    #[async_trait]
    impl BridgeStore for NoBridges {
        async fn find_bridge(&self, name: &str) -> Result<Bridge, BridgeError> {
            Err(BridgeError(format!("no such bridge: {name}")))
        }
    }

    struct StubFetcher;
    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self) -> Result<rust_decimal::Decimal, FetchError> {
            Ok(rust_decimal::Decimal::ZERO)
        }
    }

    struct StubFetcherBuilder;
    impl FetcherBuilder for StubFetcherBuilder {
        fn build(&self, _urls: Vec<String>, _timeout: Duration) -> Arc<dyn Fetcher> {
            Arc::new(StubFetcher)
        }
    }

    struct StubAggregator;
    #[async_trait]
    impl AggregatorClient for StubAggregator {
        async fn round_state(&self, _oracle: Address) -> Result<RoundState, AggregatorError> {
            Ok(RoundState {
                reportable_round_id: 1,
                eligible_to_submit: false,
                latest_answer: 0,
                times_out_at: 0,
                available_funds: 0,
                payment_amount: 0,
            })
        }
        async fn available_funds(&self) -> Result<u128, AggregatorError> {
            Ok(0)
        }
        fn method_id(&self, _signature: &str) -> [u8; 4] {
            [0; 4]
        }
        fn subscribe(
            &self,
            _sender: mpsc::Sender<Result<AggregatorLog, AggregatorError>>,
        ) -> (bool, Unsubscribe) {
            (true, Box::new(|| {}))
        }
    }

    struct StubRunManager;
    #[async_trait]
    impl RunManager for StubRunManager {
        async fn create(
            &self,
            _job_id: &JobId,
            _initiator: &FluxMonitorInitiator,
            _request_params: serde_json::Value,
        ) -> Result<JobRunId, RunManagerError> {
            Ok(JobRunId("run-1".to_string()))
        }
    }

    struct StubJobStore {
        jobs: Vec<JobSpec>,
    }
    #[async_trait]
    impl JobStore for StubJobStore {
        async fn jobs(&self) -> Result<Vec<JobSpec>, JobStoreError> {
            Ok(self.jobs.clone())
        }
    }

    struct FailingJobStore;
    #[async_trait]
    impl JobStore for FailingJobStore {
        async fn jobs(&self) -> Result<Vec<JobSpec>, JobStoreError> {
            Err(JobStoreError("store unreachable".to_string()))
        }
    }

    fn service_with_jobs(jobs: Vec<JobSpec>) -> Service {
        Service::new(
            CheckerFactory::new(
                Address::from_low_u64_be(7),
                0,
                Duration::from_secs(5),
                Arc::new(NoBridges),
                Arc::new(StubFetcherBuilder),
                Arc::new(|_addr| Arc::new(StubAggregator) as Arc<dyn AggregatorClient>),
                Arc::new(StubRunManager),
            ),
            Arc::new(StubJobStore { jobs }),
        )
    }

    fn service() -> Service {
        service_with_jobs(Vec::new())
    }

    fn initiator() -> FluxMonitorInitiator {
        FluxMonitorInitiator {
            address: Address::zero(),
            feeds: json!(["https://a.example"]),
            request_data: json!({}),
            threshold: rust_decimal::Decimal::new(2, 0),
            precision: 0,
            polling_interval: Duration::from_secs(10),
            idle_threshold: Duration::from_secs(0),
        }
    }

    #[tokio::test]
    async fn add_job_then_duplicate_is_rejected() {
        let (handle, _join) = service().start().await.unwrap();
        let job_id = JobId("job-1".to_string());

        handle.add_job(job_id.clone(), initiator()).await.unwrap();
        let err = handle.add_job(job_id.clone(), initiator()).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateJob(j) if j == job_id));

        handle.stop().await;
    }

    #[tokio::test]
    async fn remove_then_readd_the_same_job_succeeds() {
        let (handle, _join) = service().start().await.unwrap();
        let job_id = JobId("job-1".to_string());

        handle.add_job(job_id.clone(), initiator()).await.unwrap();
        handle.remove_job(job_id.clone()).await;
        handle.add_job(job_id.clone(), initiator()).await.unwrap();

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_tears_down_every_running_checker() {
        let (handle, join) = service().start().await.unwrap();
        handle.add_job(JobId("a".to_string()), initiator()).await.unwrap();
        handle.add_job(JobId("b".to_string()), initiator()).await.unwrap();

        handle.stop().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn start_bootstraps_every_persisted_flux_monitor_job() {
        let jobs = vec![
            JobSpec {
                id: JobId("persisted-a".to_string()),
                initiators: vec![Initiator::FluxMonitor(initiator())],
            },
            JobSpec {
                id: JobId("persisted-b".to_string()),
                initiators: vec![Initiator::FluxMonitor(initiator()), Initiator::Other],
            },
        ];
        let (handle, join) = service_with_jobs(jobs).start().await.unwrap();

        // Both persisted jobs are already running, so adding either again is
        // rejected as a duplicate — proof `start` actually called `AddJob`.
        let err = handle
            .add_job(JobId("persisted-a".to_string()), initiator())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateJob(_)));
        let err = handle
            .add_job(JobId("persisted-b".to_string()), initiator())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateJob(_)));

        handle.stop().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn start_fails_when_the_job_store_is_unreachable() {
        let service = Service::new(
            CheckerFactory::new(
                Address::from_low_u64_be(7),
                0,
                Duration::from_secs(5),
                Arc::new(NoBridges),
                Arc::new(StubFetcherBuilder),
                Arc::new(|_addr| Arc::new(StubAggregator) as Arc<dyn AggregatorClient>),
                Arc::new(StubRunManager),
            ),
            Arc::new(FailingJobStore),
        );
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, ServiceError::JobStore(_)));
    }
}
