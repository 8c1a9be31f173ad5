//! Bounded polling primitive shared by every waiter.
//!
//! All suspension points in the engine are poll loops over read-only GETs,
//! so they share one primitive: probe, classify, sleep, repeat until the
//! probe is ready, the deadline passes, or the run is cancelled. Each phase
//! owns an independent deadline started when [`poll_until`] is entered;
//! time spent in an earlier phase never shrinks a later phase's budget.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::ValidateError;

/// One probe observation.
#[derive(Debug)]
pub enum Step<T> {
    /// The awaited condition holds; polling stops with this value.
    Ready(T),
    /// Not there yet; sleep and probe again.
    Pending,
    /// The probe failed in a way that is safe to retry (network blips,
    /// 5xx responses). Recorded and retried until the deadline.
    Transient(String),
}

/// Terminal outcome of a bounded poll.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The condition was observed before the deadline.
    Ready(T),
    /// The deadline passed without the condition holding.
    TimedOut {
        /// Total time spent polling.
        waited: Duration,
        /// The last transient failure seen, if any.
        last_transient: Option<String>,
    },
    /// Cancellation was requested during the loop.
    Cancelled,
}

impl<T> PollOutcome<T> {
    /// Unwraps `Ready`, mapping the other outcomes through the supplied
    /// constructors. Keeps waiter call sites to a single expression.
    ///
    /// # Errors
    ///
    /// Returns `on_timeout(waited)` for `TimedOut` and `on_cancel()` for
    /// `Cancelled`.
    pub fn into_result(
        self,
        on_timeout: impl FnOnce(Duration) -> ValidateError,
        on_cancel: impl FnOnce() -> ValidateError,
    ) -> Result<T, ValidateError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::TimedOut { waited, .. } => Err(on_timeout(waited)),
            Self::Cancelled => Err(on_cancel()),
        }
    }
}

/// Polls `probe` every `interval` until it is ready, `timeout` elapses, or
/// `cancel` fires.
///
/// The first probe runs immediately; the final interval is truncated so the
/// loop never sleeps past the deadline. Fatal probe errors propagate
/// unchanged and stop the loop; transient ones are logged and retried.
///
/// # Errors
///
/// Returns the probe's error when it reports a fatal (non-transient)
/// failure.
pub fn poll_until<T>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
    mut probe: impl FnMut() -> Result<Step<T>, ValidateError>,
) -> Result<PollOutcome<T>, ValidateError> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut last_transient = None;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        match probe()? {
            Step::Ready(value) => return Ok(PollOutcome::Ready(value)),
            Step::Pending => {},
            Step::Transient(message) => {
                warn!(%message, "transient poll failure, retrying");
                last_transient = Some(message);
            },
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut {
                waited: started.elapsed(),
                last_transient,
            });
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}
