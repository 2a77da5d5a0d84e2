//! Fixed-interval condition polling.
//!
//! Every wait in the harness (container status, policy count, agent readiness)
//! goes through [`poll_until`] with its own probe closure.

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

/// Smallest pause between attempts; a zero interval would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(1),
        }
    }
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// One observation made by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Done(T),
    Pending(T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome<T> {
    pub done: bool,
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Invokes `probe` until it reports [`Probe::Done`] or `settings.timeout` elapses,
/// returning the last observed value.
///
/// The probe always runs at least once, so a zero timeout means "check once".
/// An `Err` from the probe aborts polling immediately; it is not treated as a
/// pending observation.
pub fn poll_until<T, F>(settings: &PollSettings, mut probe: F) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Result<Probe<T>>,
{
    let start = Instant::now();
    let interval = settings.interval.max(MIN_POLL_INTERVAL);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let observed = probe()?;
        let elapsed = start.elapsed();
        let value = match observed {
            Probe::Done(value) => {
                return Ok(PollOutcome {
                    done: true,
                    value,
                    attempts,
                    elapsed,
                })
            }
            Probe::Pending(value) => value,
        };
        if elapsed >= settings.timeout {
            tracing::debug!(attempts, ?elapsed, "poll timed out");
            return Ok(PollOutcome {
                done: false,
                value,
                attempts,
                elapsed,
            });
        }
        thread::sleep(interval.min(settings.timeout - elapsed));
    }
}
