//! Execution contexts that callback delivery can be moved onto.
//!
//! Without a context, listeners run inline on whatever task is moving body
//! bytes. A context takes each fan-out as a [`Task`] and runs it elsewhere,
//! e.g. on a UI-thread-like loop.

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// One unit of deferred delivery.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where listener invocations run.
///
/// Implementations should run tasks in submission order, otherwise listeners
/// may observe events of one transfer out of order.
pub trait DispatchContext: Send + Sync {
    fn execute(&self, task: Task);
}

impl<F> DispatchContext for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) { self(task) }
}

/// Ordered task queue, drained by a [`QueueDriver`].
///
/// # Examples
///
/// ```
/// use byteward::{DispatchContext, SerialQueue};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let (queue, mut driver) = SerialQueue::channel();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&hits);
/// queue.execute(Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// assert_eq!(hits.load(Ordering::SeqCst), 0);
/// assert_eq!(driver.run_pending(), 1);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Debug)]
pub struct SerialQueue {
    sender: UnboundedSender<Task>,
}

/// Receiving half of a [`SerialQueue`].
#[derive(Debug)]
pub struct QueueDriver {
    receiver: UnboundedReceiver<Task>,
}

impl SerialQueue {
    pub fn channel() -> (Self, QueueDriver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, QueueDriver { receiver })
    }

    /// Create a queue whose driver runs as a task on `handle`.
    ///
    /// The driver stops once every clone of the queue is dropped.
    pub fn spawn(handle: &Handle) -> Self {
        let (queue, driver) = Self::channel();
        handle.spawn(driver.run());
        queue
    }
}

impl DispatchContext for SerialQueue {
    fn execute(&self, task: Task) {
        if self.sender.send(task).is_err() {
            debug!("dispatch queue closed, dropping delivery");
        }
    }
}

impl QueueDriver {
    /// Run every task queued so far, returning how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until every sender is gone.
    pub async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            task();
        }
    }
}
