//! Byte-level upload and download progress for intercepted HTTP exchanges.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable progress snapshots, exchange identity and settings
//! - [`core`] - Pure throttling and transfer bookkeeping
//! - [`effects`] - Body wrappers, listener registry, dispatch and the interceptor
//!
//! # Key Features
//!
//! - **Transparent**: Wrapped bodies keep their length and content type
//! - **Throttled**: PROGRESS events are bounded by a refresh interval, the final
//!   100% event is always delivered
//! - **Keyed Dispatch**: A global listener plus per-URL listeners per direction
//! - **Auto-Recycle**: Single-use listeners retire themselves after END
//! - **Best-Effort**: Listener panics and registration mistakes never change the
//!   outcome of the wrapped exchange
//!
//! # Example
//!
//! ```no_run
//! use byteward::{Chain, Direction, Operation, Progress, ReqwestTransport, Request, listener};
//!
//! # async fn run() -> byteward::Result<()> {
//! let operation = Operation::new();
//! let mut chain = Chain::new(ReqwestTransport::new()?);
//! operation.install(&mut chain);
//!
//! operation.add_listener(
//!     Direction::Response,
//!     "https://example.com/archive.tar.gz",
//!     listener(|progress: &Progress| {
//!         if let Some(pct) = progress.percentage() {
//!             println!("{:.1}%", pct);
//!         }
//!     }),
//! );
//!
//! let response = chain
//!     .execute(Request::get("https://example.com/archive.tar.gz"))
//!     .await?;
//! let _bytes = response.into_body().collect().await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{
    DEFAULT_REFRESH_TIME, Direction, Extras, ListenerKey, PlanKind, Progress, Scope, Settings,
    State, Tag, Update, normalize,
};
pub use effects::{
    Body, BodyError, BodyStream, BoxStream, Chain, CopyOnWritePlan, CountingStream,
    DispatchContext, DispatchPlan, Dispatcher, Interceptor, Listener, Next, Operation,
    OperationUpdate, ProgressListener, QueueDriver, Recycle, Request, Response, SerialQueue,
    SnapshotPlan, Task, Transport, listener, recycling,
};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestTransport;

pub use error::{Error, Result};
