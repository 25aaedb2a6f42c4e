use std::sync::Arc;

use crate::data::{Progress, State};

/// Receives progress events.
///
/// Any `Fn(&Progress) + Send + Sync` closure is a listener. Implement the
/// trait directly to opt into auto-recycling.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, progress: &Progress);

    /// Asked once per `End` event this listener received through a per-URL
    /// registration. Returning `true` removes it from that registration.
    fn auto_recycle(&self, _terminal: &Progress) -> bool { false }
}

impl<F> ProgressListener for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) { self(progress) }
}

/// Shared listener handle. Registrations compare handles by pointer.
pub type Listener = Arc<dyn ProgressListener>;

/// Box a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Progress) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`Listener`] that retires after its first `End`.
pub fn recycling<F>(f: F) -> Listener
where
    F: Fn(&Progress) + Send + Sync + 'static,
{
    Arc::new(Recycle::when(f, |_: &Progress| true))
}

/// Listener adapter with an auto-recycle predicate.
///
/// # Examples
///
/// ```
/// use byteward::{Progress, Recycle, State};
/// use std::sync::Arc;
///
/// // Retire only once a transfer finished successfully
/// let listener = Arc::new(Recycle::when(
///     |_: &Progress| {},
///     |terminal: &Progress| terminal.is_complete(),
/// ));
/// # let _ = listener;
/// ```
pub struct Recycle<F, P> {
    inner:     F,
    predicate: P,
}

impl<F, P> Recycle<F, P>
where
    F: Fn(&Progress) + Send + Sync,
    P: Fn(&Progress) -> bool + Send + Sync,
{
    pub fn when(inner: F, predicate: P) -> Self { Self { inner, predicate } }
}

impl<F, P> ProgressListener for Recycle<F, P>
where
    F: Fn(&Progress) + Send + Sync,
    P: Fn(&Progress) -> bool + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) { (self.inner)(progress) }

    fn auto_recycle(&self, terminal: &Progress) -> bool {
        terminal.state == State::End && (self.predicate)(terminal)
    }
}

/// Pointer identity of two listener handles.
pub(crate) fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::{Direction, Extras};

    fn event(state: State) -> Progress {
        Progress {
            url: Arc::from("http://a"),
            direction: Direction::Response,
            bytes_transferred: 0,
            total_bytes: None,
            state,
            fault: None,
            extras: Extras::new("http://a", Direction::Response),
            elapsed: Default::default(),
        }
    }

    #[test]
    fn test_closure_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let l = listener(move |_: &Progress| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        l.on_progress(&event(State::Start));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!l.auto_recycle(&event(State::End)));
    }

    #[test]
    fn test_recycling_only_on_end() {
        let l = recycling(|_: &Progress| {});
        assert!(!l.auto_recycle(&event(State::Finish)));
        assert!(l.auto_recycle(&event(State::End)));
    }

    #[test]
    fn test_same_listener_identity() {
        let a = listener(|_: &Progress| {});
        let b = listener(|_: &Progress| {});
        assert!(same_listener(&a, &Arc::clone(&a)));
        assert!(!same_listener(&a, &b));
    }
}
