//! Outbound admission control
//!
//! At most `max_in_flight` requests hold a permit at once, and consecutive
//! starts are at least `min_spacing` apart. Waiters are admitted in FIFO
//! order by the semaphore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};

use crate::error::{Error, Result};

pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    min_spacing: Duration,
    next_start: Mutex<Instant>,
}

/// Held for the whole dispatch, retries included. Dropping it frees the slot.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(max_in_flight: usize, min_spacing: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            min_spacing,
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a free slot, then for this request's start time.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Transport {
                message: "request limiter is closed".into(),
                status: None,
                data: None,
            })?;

        let start = {
            let mut next = self.next_start.lock().await;
            let start = (*next).max(Instant::now());
            *next = start + self.min_spacing;
            start
        };
        sleep_until(start).await;

        Ok(LimiterPermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
