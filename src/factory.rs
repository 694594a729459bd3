//! Builds `DeviationChecker`s from `FluxMonitorInitiator`s (spec §4.5, C5).
//! All validation happens here, before a checker is ever started, so a bad
//! job fails loudly at `AddJob` time instead of silently misbehaving later.

use std::sync::Arc;
use std::time::Duration;

use crate::checker::DeviationChecker;
use crate::collaborators::{AggregatorClient, BridgeStore, Fetcher, RunManager, UPDATE_ANSWER_SIGNATURE};
use crate::config::MINIMUM_POLLING_INTERVAL;
use crate::error::CheckerFactoryError;
use crate::feed_resolver;
use crate::types::{FluxMonitorInitiator, JobId};

/// Builds an HTTP median-price fetcher bound to the given feed URLs, with a
/// fixed aggregate timeout. Production wiring supplies the concrete type;
/// this factory only needs `Fetcher` the trait.
pub trait FetcherBuilder: Send + Sync {
    fn build(&self, urls: Vec<String>, timeout: Duration) -> Arc<dyn Fetcher>;
}

pub struct CheckerFactory {
    /// This node's own signing identity (from the keystore), threaded into
    /// every checker it builds. Distinct from each initiator's `address`,
    /// which names the aggregator contract being monitored.
    oracle_identity: ethereum_types::Address,
    minimum_contract_payment: u128,
    http_timeout: Duration,
    bridges: Arc<dyn BridgeStore>,
    fetcher_builder: Arc<dyn FetcherBuilder>,
    aggregator_for: Arc<dyn Fn(ethereum_types::Address) -> Arc<dyn AggregatorClient> + Send + Sync>,
    run_manager: Arc<dyn RunManager>,
}

impl CheckerFactory {
    pub fn new(
        oracle_identity: ethereum_types::Address,
        minimum_contract_payment: u128,
        http_timeout: Duration,
        bridges: Arc<dyn BridgeStore>,
        fetcher_builder: Arc<dyn FetcherBuilder>,
        aggregator_for: Arc<dyn Fn(ethereum_types::Address) -> Arc<dyn AggregatorClient> + Send + Sync>,
        run_manager: Arc<dyn RunManager>,
    ) -> Self {
        Self {
            oracle_identity,
            minimum_contract_payment,
            http_timeout,
            bridges,
            fetcher_builder,
            aggregator_for,
            run_manager,
        }
    }

    /// Validates `initiator` and resolves its feeds, returning a checker
    /// ready to `start()`. Never starts it — that is `Service`'s job.
    pub async fn build(
        &self,
        job_id: JobId,
        initiator: FluxMonitorInitiator,
    ) -> Result<DeviationChecker, CheckerFactoryError> {
        if initiator.polling_interval < MINIMUM_POLLING_INTERVAL {
            return Err(CheckerFactoryError::PollingIntervalTooShort {
                got: initiator.polling_interval,
                minimum: MINIMUM_POLLING_INTERVAL,
            });
        }

        let urls = feed_resolver::resolve(&initiator.feeds, self.bridges.as_ref()).await?;
        let fetcher = self.fetcher_builder.build(urls, self.http_timeout);
        let aggregator = (self.aggregator_for)(initiator.address);
        let function_selector = aggregator.method_id(UPDATE_ANSWER_SIGNATURE);

        Ok(DeviationChecker::new(
            job_id,
            initiator,
            self.oracle_identity,
            self.minimum_contract_payment,
            function_selector,
            aggregator,
            fetcher,
            Arc::clone(&self.run_manager),
        ))
    }
}
