//! Quiet-period debouncing for queue drains
//!
//! Every new observation pushes the deadline out again, so a burst of N
//! changes resolves into one drain instead of N.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Single re-armable deadline
///
/// The deadline is owned state: [`Debouncer::cancel`] clears it, and a
/// cleared debouncer never fires.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Quiet period
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)start the quiet period from now
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    /// Drop any pending deadline
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve once the deadline passes; never resolves while disarmed
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
