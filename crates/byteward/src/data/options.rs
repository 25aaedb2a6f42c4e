use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Minimum time between two PROGRESS events of one transfer, unless configured.
pub const DEFAULT_REFRESH_TIME: Duration = Duration::from_millis(150);

/// Which bodies of an exchange get instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Count request bodies (uploads) only.
    Request,
    /// Count response bodies (downloads) only.
    Response,
    /// Count both, sharing one exchange identity.
    #[default]
    Both,
}

impl Scope {
    pub fn covers_request(self) -> bool { matches!(self, Scope::Request | Scope::Both) }

    pub fn covers_response(self) -> bool { matches!(self, Scope::Response | Scope::Both) }
}

/// Registry storage strategy behind an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanKind {
    /// Lists live under a lock and are copied for every fan-out.
    #[default]
    Snapshot,
    /// Lists are immutable slices rebuilt on every registration change.
    CopyOnWrite,
}

/// File-level configuration for an [`Operation`](crate::Operation).
///
/// Every key is optional; missing keys take their documented default.
///
/// # Examples
///
/// ```
/// use byteward::{PlanKind, Scope, Settings};
/// use std::time::Duration;
///
/// let settings = Settings::from_toml_str(
///     r#"
///     refresh-ms = 500
///     scope = "response"
///     plan = "copy-on-write"
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(settings.refresh_time(), Duration::from_millis(500));
/// assert_eq!(settings.scope, Scope::Response);
/// assert_eq!(settings.plan, PlanKind::CopyOnWrite);
/// assert!(!settings.one_shot);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// Minimum milliseconds between two PROGRESS events.
    ///
    /// Default: 150
    pub refresh_ms: u64,

    /// Count only the first attempt of a replayed request body.
    ///
    /// Default: false (every attempt is its own transfer)
    pub one_shot: bool,

    /// Default: both
    pub scope: Scope,

    /// Default: snapshot
    pub plan: PlanKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_ms: DEFAULT_REFRESH_TIME.as_millis() as u64,
            one_shot:   false,
            scope:      Scope::default(),
            plan:       PlanKind::default(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self> { Ok(toml::from_str(source)?) }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn refresh_time(&self) -> Duration { Duration::from_millis(self.refresh_ms) }
}

/// One field of an [`OperationUpdate`](crate::OperationUpdate).
#[derive(Debug, Clone)]
pub enum Update<T> {
    /// Leave the current value untouched.
    Keep,
    /// Restore the documented default.
    Reset,
    /// Replace the current value.
    Set(T),
}

impl<T> Default for Update<T> {
    fn default() -> Self { Update::Keep }
}

impl<T> Update<T> {
    /// Write the update into `slot`, using `default` for [`Update::Reset`].
    pub fn apply(self, slot: &mut T, default: impl FnOnce() -> T) {
        match self {
            Update::Keep => {}
            Update::Reset => *slot = default(),
            Update::Set(value) => *slot = value,
        }
    }
}
