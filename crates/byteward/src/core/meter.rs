use std::time::Duration;

use tokio::time::Instant;

use crate::core::throttle::Throttle;
use crate::data::State;

/// One event a transfer should emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub state:       State,
    pub transferred: u64,
    pub elapsed:     Duration,
}

/// Lifecycle state machine for one transfer.
///
/// Feeds on chunk sizes and terminal signals, produces the ticks to emit.
/// Guarantees a single `Start` before anything else, a single `End` after
/// everything else, non-decreasing byte counts, and counts clamped to a
/// known total.
#[derive(Debug, Clone)]
pub struct Meter {
    total:         Option<u64>,
    transferred:   u64,
    started_at:    Option<Instant>,
    last_reported: Option<u64>,
    ended:         bool,
    throttle:      Throttle,
}

impl Meter {
    pub fn new(total: Option<u64>, refresh: Duration) -> Self {
        Self {
            total,
            transferred: 0,
            started_at: None,
            last_reported: None,
            ended: false,
            throttle: Throttle::new(refresh),
        }
    }

    /// Bytes as reported to listeners (clamped to the declared total).
    pub fn transferred(&self) -> u64 {
        match self.total {
            Some(total) => self.transferred.min(total),
            None => self.transferred,
        }
    }

    pub fn is_started(&self) -> bool { self.started_at.is_some() }

    pub fn is_ended(&self) -> bool { self.ended }

    /// A chunk of `len` bytes went through.
    pub fn on_chunk(&mut self, len: usize, now: Instant) -> Vec<Tick> {
        if self.ended || len == 0 {
            return Vec::new();
        }

        let mut ticks = Vec::with_capacity(2);
        self.start(now, &mut ticks);
        self.transferred = self.transferred.saturating_add(len as u64);

        let reported = self.transferred();
        if self.last_reported != Some(reported) && self.throttle.admit(now, reported, self.total) {
            self.last_reported = Some(reported);
            ticks.push(self.tick(State::Progress, now));
        }
        ticks
    }

    /// The body reached its end without error.
    pub fn on_complete(&mut self, now: Instant) -> Vec<Tick> { self.terminate(State::Finish, now) }

    /// The body failed while being written or read.
    pub fn on_fault(&mut self, now: Instant) -> Vec<Tick> { self.terminate(State::Error, now) }

    /// The body was dropped before reaching its end.
    ///
    /// Emits nothing for a transfer that never started.
    pub fn on_abandon(&mut self, now: Instant) -> Vec<Tick> {
        if !self.is_started() {
            self.ended = true;
            return Vec::new();
        }
        self.terminate(State::Error, now)
    }

    fn terminate(&mut self, outcome: State, now: Instant) -> Vec<Tick> {
        if self.ended {
            return Vec::new();
        }

        let mut ticks = Vec::with_capacity(3);
        self.start(now, &mut ticks);
        ticks.push(self.tick(outcome, now));
        ticks.push(self.tick(State::End, now));
        self.ended = true;
        ticks
    }

    fn start(&mut self, now: Instant, ticks: &mut Vec<Tick>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
            ticks.push(self.tick(State::Start, now));
        }
    }

    fn tick(&self, state: State, now: Instant) -> Tick {
        let elapsed = self
            .started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        let transferred = if state == State::Start { 0 } else { self.transferred() };

        Tick {
            state,
            transferred,
            elapsed,
        }
    }
}
