//! Cancellable polling.
//!
//! The solver reports progress only through files, so every wait in the
//! pipeline is "check a predicate, sleep, repeat". [`poll_until`] bounds
//! that loop with an optional deadline and a shared [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep, so cancellation is noticed promptly.
const SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitError {
    TimedOut(Duration),
    Cancelled,
}

/// Block until `ready()` returns true, polling every `interval`.
///
/// Returns the number of failed checks before success. The predicate is
/// always evaluated at least once, even with a zero deadline.
pub fn poll_until<F>(
    mut ready: F,
    interval: Duration,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Result<u64, WaitError>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let mut misses = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if ready() {
            return Ok(misses);
        }
        misses += 1;

        let mut wake = Instant::now() + interval;
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return Err(WaitError::TimedOut(started.elapsed()));
            }
            wake = wake.min(d);
        }
        sleep_until(wake, cancel);
    }
}

fn sleep_until(wake: Instant, cancel: &CancelToken) {
    loop {
        let now = Instant::now();
        if now >= wake || cancel.is_cancelled() {
            return;
        }
        thread::sleep((wake - now).min(SLICE));
    }
}
