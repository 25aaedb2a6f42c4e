pub mod body;
pub mod chain;
pub mod context;
pub mod dispatch;
#[cfg(feature = "reqwest")]
pub mod http;
pub mod listener;
pub mod operation;
pub mod registry;

pub use body::{Body, BodyError, BodyStream, BoxStream, CountingStream};
pub use chain::{Chain, Interceptor, Next, Request, Response, Transport};
pub use context::{DispatchContext, QueueDriver, SerialQueue, Task};
pub use dispatch::Dispatcher;
#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;
pub use listener::{Listener, ProgressListener, Recycle, listener, recycling};
pub use operation::{Operation, OperationUpdate};
pub use registry::{CopyOnWritePlan, DispatchPlan, SnapshotPlan};
