//! The coordinator: configuration, registration and the progress interceptor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::data::{DEFAULT_REFRESH_TIME, Direction, Extras, ListenerKey, Scope, Settings, Update};
use crate::effects::body::{self, Emitter};
use crate::effects::chain::{Chain, Interceptor, Next, Request, Response};
use crate::effects::context::DispatchContext;
use crate::effects::dispatch::Dispatcher;
use crate::effects::listener::Listener;
use crate::error::Result;

/// Runtime reconfiguration of an [`Operation`].
///
/// Fields left at [`Update::Keep`] are not changed.
///
/// # Examples
///
/// ```
/// use byteward::{Operation, OperationUpdate};
/// use std::time::Duration;
///
/// let operation = Operation::new();
/// operation.configure(
///     OperationUpdate::default()
///         .refresh_time(Duration::from_millis(50))
///         .one_shot(true),
/// );
/// assert_eq!(operation.refresh_time(), Duration::from_millis(50));
///
/// operation.configure(OperationUpdate::default().reset_refresh_time());
/// assert_eq!(operation.refresh_time(), byteward::DEFAULT_REFRESH_TIME);
/// assert!(operation.one_shot());
/// ```
#[derive(Default)]
pub struct OperationUpdate {
    pub refresh_time:     Update<Duration>,
    pub global_callback:  Update<Listener>,
    pub dispatch_context: Update<Arc<dyn DispatchContext>>,
    pub one_shot:         Update<bool>,
    pub scope:            Update<Scope>,
}

impl OperationUpdate {
    #[must_use]
    pub fn refresh_time(mut self, refresh_time: Duration) -> Self {
        self.refresh_time = Update::Set(refresh_time);
        self
    }

    #[must_use]
    pub fn reset_refresh_time(mut self) -> Self {
        self.refresh_time = Update::Reset;
        self
    }

    #[must_use]
    pub fn global_callback(mut self, callback: Listener) -> Self {
        self.global_callback = Update::Set(callback);
        self
    }

    #[must_use]
    pub fn reset_global_callback(mut self) -> Self {
        self.global_callback = Update::Reset;
        self
    }

    #[must_use]
    pub fn dispatch_context(mut self, context: Arc<dyn DispatchContext>) -> Self {
        self.dispatch_context = Update::Set(context);
        self
    }

    #[must_use]
    pub fn reset_dispatch_context(mut self) -> Self {
        self.dispatch_context = Update::Reset;
        self
    }

    #[must_use]
    pub fn one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = Update::Set(one_shot);
        self
    }

    #[must_use]
    pub fn reset_one_shot(mut self) -> Self {
        self.one_shot = Update::Reset;
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Update::Set(scope);
        self
    }

    #[must_use]
    pub fn reset_scope(mut self) -> Self {
        self.scope = Update::Reset;
        self
    }
}

impl fmt::Debug for OperationUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn shape<T>(update: &Update<T>) -> &'static str {
            match update {
                Update::Keep => "Keep",
                Update::Reset => "Reset",
                Update::Set(_) => "Set",
            }
        }

        f.debug_struct("OperationUpdate")
            .field("refresh_time", &self.refresh_time)
            .field("global_callback", &shape(&self.global_callback))
            .field("dispatch_context", &shape(&self.dispatch_context))
            .field("one_shot", &self.one_shot)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Tuning {
    refresh_time: Duration,
    one_shot:     bool,
    scope:        Scope,
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    tuning:     RwLock<Tuning>,
    next_id:    AtomicU64,
}

/// Progress instrumentation for one HTTP client.
///
/// Cloning is cheap and every clone shares configuration, registry and
/// interceptor. Installing the interceptor twice into one chain is a no-op.
///
/// # Examples
///
/// ```
/// use byteward::{Direction, Operation, Progress, listener};
///
/// let operation = Operation::new();
/// let on_upload = listener(|p: &Progress| println!("{} bytes", p.bytes_transferred));
///
/// assert!(operation.add_listener(Direction::Request, "https://example.com/upload", on_upload.clone()));
/// assert!(!operation.add_listener(Direction::Request, "https://example.com/upload", on_upload));
/// assert!(!operation.add_listener(Direction::Request, "  ", listener(|_: &Progress| {})));
/// ```
#[derive(Clone)]
pub struct Operation {
    inner:       Arc<Inner>,
    interceptor: Arc<dyn Interceptor>,
}

impl Operation {
    pub fn new() -> Self { Self::with_settings(Settings::default()) }

    pub fn with_settings(settings: Settings) -> Self {
        let inner = Arc::new(Inner {
            dispatcher: Arc::new(Dispatcher::new(settings.plan.build())),
            tuning:     RwLock::new(Tuning {
                refresh_time: settings.refresh_time(),
                one_shot:     settings.one_shot,
                scope:        settings.scope,
            }),
            next_id:    AtomicU64::new(0),
        });
        let interceptor = Arc::new(ProgressInterceptor {
            inner: Arc::clone(&inner),
        });
        Self { inner, interceptor }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(Self::with_settings(Settings::from_toml_str(source)?))
    }

    /// Add this operation's interceptor to `chain`.
    ///
    /// Returns `false` when the chain already holds it.
    pub fn install(&self, chain: &mut Chain) -> bool {
        let interceptor = self.interceptor();
        if chain.contains(&interceptor) {
            debug!("progress interceptor already installed");
            return false;
        }
        chain.push(interceptor);
        debug!(position = chain.len() - 1, "progress interceptor installed");
        true
    }

    /// The single interceptor instance owned by this operation.
    pub fn interceptor(&self) -> Arc<dyn Interceptor> { Arc::clone(&self.interceptor) }

    pub fn configure(&self, update: OperationUpdate) {
        let dispatcher = &self.inner.dispatcher;

        {
            let mut tuning = self.inner.tuning.write();
            update.refresh_time.apply(&mut tuning.refresh_time, || DEFAULT_REFRESH_TIME);
            update.one_shot.apply(&mut tuning.one_shot, || false);
            update.scope.apply(&mut tuning.scope, Scope::default);
        }

        match update.global_callback {
            Update::Keep => {}
            Update::Reset => dispatcher.set_global(None),
            Update::Set(callback) => dispatcher.set_global(Some(callback)),
        }
        match update.dispatch_context {
            Update::Keep => {}
            Update::Reset => dispatcher.set_context(None),
            Update::Set(context) => dispatcher.set_context(Some(context)),
        }
    }

    pub fn refresh_time(&self) -> Duration { self.inner.tuning.read().refresh_time }

    pub fn one_shot(&self) -> bool { self.inner.tuning.read().one_shot }

    pub fn scope(&self) -> Scope { self.inner.tuning.read().scope }

    pub fn is_deprecated(&self) -> bool { self.inner.dispatcher.is_deprecated() }

    /// Number of listeners registered under `direction` and `url`.
    pub fn listener_count(&self, direction: Direction, url: &str) -> usize {
        match ListenerKey::new(direction, url) {
            Ok(key) => self.inner.dispatcher.plan().len(&key),
            Err(_) => 0,
        }
    }

    /// Register `listener` for transfers of `url` in `direction`.
    ///
    /// Returns `false` for a URL that is empty after normalization, for a
    /// listener already registered under the same key, and once the
    /// operation is deprecated.
    pub fn add_listener(&self, direction: Direction, url: &str, listener: Listener) -> bool {
        if self.is_deprecated() {
            debug!(url, %direction, "operation deprecated, listener not registered");
            return false;
        }
        let Some(key) = registration_key(direction, url) else {
            return false;
        };
        let added = self.inner.dispatcher.plan().add(key.clone(), listener);
        if added {
            debug!(key = %key, "listener registered");
        }
        added
    }

    pub fn add_request_listener(&self, url: &str, listener: Listener) -> bool {
        self.add_listener(Direction::Request, url, listener)
    }

    pub fn add_response_listener(&self, url: &str, listener: Listener) -> bool {
        self.add_listener(Direction::Response, url, listener)
    }

    pub fn remove_listener(&self, direction: Direction, url: &str, listener: &Listener) -> bool {
        let Some(key) = registration_key(direction, url) else {
            return false;
        };
        let removed = self.inner.dispatcher.plan().remove(&key, listener);
        if removed {
            debug!(key = %key, "listener removed");
        }
        removed
    }

    /// Remove every listener under `direction` and `url`.
    pub fn clear_listener(&self, direction: Direction, url: &str) -> bool {
        match registration_key(direction, url) {
            Some(key) => self.inner.dispatcher.plan().clear(&key),
            None => false,
        }
    }

    /// Remove every listener under the key `extras` resolves to.
    pub fn clear_extras(&self, extras: &Extras) -> bool {
        match extras.key() {
            Ok(key) => self.inner.dispatcher.plan().clear(&key),
            Err(e) => {
                warn!(error = %e, "cannot clear listeners for invalid exchange");
                false
            }
        }
    }

    /// Stop all progress reporting for good and drop every registration.
    ///
    /// In-flight exchanges keep working, their events are discarded.
    pub fn mark_deprecated(&self) { self.inner.dispatcher.deprecate(); }
}

impl Default for Operation {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuning = *self.inner.tuning.read();
        f.debug_struct("Operation")
            .field("refresh_time", &tuning.refresh_time)
            .field("one_shot", &tuning.one_shot)
            .field("scope", &tuning.scope)
            .field("deprecated", &self.is_deprecated())
            .finish_non_exhaustive()
    }
}

fn registration_key(direction: Direction, url: &str) -> Option<ListenerKey> {
    match ListenerKey::new(direction, url) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(url, %direction, error = %e, "ignoring listener registration");
            None
        }
    }
}

/// Wraps the bodies of each exchange passing through the chain.
struct ProgressInterceptor {
    inner: Arc<Inner>,
}

#[async_trait]
impl Interceptor for ProgressInterceptor {
    async fn intercept(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        let dispatcher = &self.inner.dispatcher;
        if dispatcher.is_deprecated() {
            return next.run(request).await;
        }

        let tuning = *self.inner.tuning.read();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let extras = Extras::for_exchange(id, &request.url, Direction::Request, request.tag.clone());
        let url: Arc<str> = Arc::from(request.url.as_str());

        if tuning.scope.covers_request() && !request.body.is_empty() {
            let emitter = Emitter::new(
                Arc::clone(dispatcher),
                extras.clone(),
                Arc::clone(&url),
                request.body.content_length(),
                tuning.refresh_time,
            );
            let original = std::mem::take(&mut request.body);
            request.body = body::wrap_request(original, emitter, tuning.one_shot);
        }

        let mut response = next.run(request).await?;

        if tuning.scope.covers_response() {
            let emitter = Emitter::new(
                Arc::clone(dispatcher),
                extras.with_direction(Direction::Response),
                url,
                response.body.content_length(),
                tuning.refresh_time,
            );
            let original = std::mem::take(&mut response.body);
            response.body = body::wrap_response(original, emitter);
        }

        Ok(response)
    }
}
