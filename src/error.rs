//! Error taxonomy. Configuration and Logic errors are surfaced to callers;
//! Transient errors are logged and swallowed at the call site (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedResolutionError {
    #[error("feeds value is not a JSON array")]
    MalformedJson,
    #[error("feed element {0} is neither a URL string nor a {{\"bridge\": ...}} object")]
    InvalidFeedShape(usize),
    #[error("feed URL is not absolute: {0}")]
    InvalidUrl(String),
    #[error("unknown bridge: {0}")]
    UnknownBridge(String),
}

#[derive(Debug, Error)]
pub enum CheckerFactoryError {
    #[error("polling interval {got:?} is below the minimum {minimum:?}")]
    PollingIntervalTooShort {
        got: std::time::Duration,
        minimum: std::time::Duration,
    },
    #[error(transparent)]
    FeedResolution(#[from] FeedResolutionError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job {0} is already running")]
    DuplicateJob(crate::types::JobId),
    #[error("one or more checkers failed to build for job {job}: {source}")]
    CheckerConstruction {
        job: crate::types::JobId,
        #[source]
        source: CheckerFactoryError,
    },
    #[error("failed to load persisted jobs: {0}")]
    JobStore(#[from] JobStoreError),
}

#[derive(Debug, Error)]
#[error("job store lookup failed: {0}")]
pub struct JobStoreError(pub String);

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("round state RPC failed: {0}")]
    RoundState(String),
    #[error("available funds RPC failed: {0}")]
    AvailableFunds(String),
    #[error("log subscription error: {0}")]
    Subscription(String),
}

#[derive(Debug, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Error)]
#[error("run manager create failed: {0}")]
pub struct RunManagerError(pub String);

#[derive(Debug, Error)]
#[error("bridge lookup failed: {0}")]
pub struct BridgeError(pub String);
