//! A restartable periodic timer (spec §4.1, C1). `tokio::time::Interval`
//! cannot be stopped without being dropped, so this wraps one in an
//! `Option` and reallocates it on `resume` — the wrapper languages-without-
//! pausable-timers need, per spec §9.

use tokio::time::{interval, Duration, Instant, Interval};

pub struct PauseableTicker {
    period: Duration,
    inner: Option<Interval>,
}

impl PauseableTicker {
    pub fn new(period: Duration) -> Self {
        Self { period, inner: None }
    }

    /// Stops any current ticking and begins a fresh tick train. The first
    /// tick of a freshly built `Interval` fires immediately; that tick is
    /// consumed here so callers never observe an immediate fire on resume
    /// (spec §9's "no immediate fire" contract — downstream logic in
    /// `pollIfEligible`'s pause/resume dance relies on it).
    pub async fn resume(&mut self) {
        let mut fresh = interval(self.period);
        fresh.tick().await;
        self.inner = Some(fresh);
    }

    /// Ceases ticking. Subsequent `tick()` calls yield nothing until `resume`.
    pub fn stop(&mut self) {
        self.inner = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_none()
    }

    /// The lazy sequence of tick timestamps; never resolves while stopped,
    /// so a `tokio::select!` arm on this simply never wins.
    pub async fn tick(&mut self) -> Instant {
        match &mut self.inner {
            Some(t) => t.tick().await,
            None => std::future::pending().await,
        }
    }
}
