use std::time::Duration;

use tokio::time::Instant;

/// Rate limit for PROGRESS events of a single transfer.
///
/// A chunk is reported when it is the first one after START, when it
/// completes a known total, or when at least `refresh` has passed since the
/// last reported chunk.
#[derive(Debug, Clone)]
pub struct Throttle {
    refresh:   Duration,
    last_emit: Option<Instant>,
}

impl Throttle {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            last_emit: None,
        }
    }

    /// Decide whether the chunk observed at `now` is reported, and record it if so.
    pub fn admit(&mut self, now: Instant, transferred: u64, total: Option<u64>) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.refresh,
        };
        let completed = total.is_some_and(|total| transferred >= total);

        if due || completed {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}
