//! Immutable data types for progress instrumentation.
//!
//! This module contains the progress snapshot handed to listeners, the
//! per-exchange identity used as a dispatch key, and the settings that tune
//! an [`Operation`](crate::Operation). None of these types perform I/O.

pub mod extras;
pub mod options;
pub mod progress;

pub use extras::{Extras, ListenerKey, Tag, normalize};
pub use options::{DEFAULT_REFRESH_TIME, PlanKind, Scope, Settings, Update};
pub use progress::{Direction, Progress, State};
