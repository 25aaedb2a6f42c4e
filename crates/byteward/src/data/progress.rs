use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::extras::{Extras, ListenerKey};
use crate::error::Error;

/// Which body of an exchange a transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// The request body (upload).
    Request,
    /// The response body (download).
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// Lifecycle state of a single transfer.
///
/// A transfer always emits exactly one `Start` first and exactly one `End`
/// last. In between it emits any number of `Progress` events, followed by
/// either `Finish` (success) or `Error` (transport fault or cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// First byte observed, nothing counted yet.
    Start,

    /// Bytes were transferred since the last event.
    Progress,

    /// The body failed while being written or read.
    Error,

    /// The body was transferred completely.
    Finish,

    /// Terminal event. Per-transfer resources can be released.
    End,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Start => write!(f, "Start"),
            State::Progress => write!(f, "Progress"),
            State::Error => write!(f, "Error"),
            State::Finish => write!(f, "Finish"),
            State::End => write!(f, "End"),
        }
    }
}

/// Snapshot of one transfer at one instant.
///
/// A fresh value is built for every emitted event and handed to listeners by
/// reference.
#[derive(Debug, Clone)]
pub struct Progress {
    /// URL as carried by the request, not normalized.
    pub url: Arc<str>,

    /// Body this transfer belongs to.
    pub direction: Direction,

    /// Bytes moved so far. Never exceeds a known `total_bytes`.
    pub bytes_transferred: u64,

    /// Declared body length.
    ///
    /// `None` when the length is unknown (e.g., chunked transfer encoding).
    pub total_bytes: Option<u64>,

    /// Lifecycle state of this event.
    pub state: State,

    /// The fault, set only on [`State::Error`].
    pub fault: Option<Arc<Error>>,

    /// Identity of the exchange this transfer belongs to.
    pub extras: Extras,

    /// Time since the transfer's `Start` event.
    pub elapsed: Duration,
}

impl Progress {
    /// Calculate the percentage of completion.
    ///
    /// Returns `None` if `total_bytes` is unknown.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                // Empty bodies are 100% once finished, 0% before
                if self.state == State::Finish || self.state == State::End {
                    100.0
                } else {
                    0.0
                }
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }

    /// Returns `true` for the terminal `End` event.
    #[must_use]
    pub fn is_terminal(&self) -> bool { self.state == State::End }

    /// Returns `true` once the whole body has been transferred.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.total_bytes {
            Some(total) => self.bytes_transferred >= total && self.state != State::Error,
            None => self.state == State::Finish,
        }
    }

    /// Average transfer rate since `Start`, in bytes per second.
    #[must_use]
    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes_transferred as f64 / secs)
        } else {
            None
        }
    }

    /// Registry key this event is dispatched under.
    ///
    /// `None` when the exchange URL normalizes to an empty string.
    pub fn key(&self) -> Option<ListenerKey> {
        self.extras.with_direction(self.direction).key().ok()
    }
}
