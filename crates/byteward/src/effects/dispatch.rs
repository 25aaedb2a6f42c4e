//! Fan-out of progress events to the global and per-URL listeners.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::data::Progress;
use crate::effects::context::DispatchContext;
use crate::effects::listener::Listener;
use crate::effects::registry::DispatchPlan;

/// Delivers each event to the global listener first, then to the listeners
/// registered for the event's direction and normalized URL.
///
/// Listener panics are caught and logged per listener. Once deprecated, no
/// new fan-out starts.
pub struct Dispatcher {
    plan:       Arc<dyn DispatchPlan>,
    global:     RwLock<Option<Listener>>,
    context:    RwLock<Option<Arc<dyn DispatchContext>>>,
    deprecated: AtomicBool,
}

impl Dispatcher {
    pub fn new(plan: Arc<dyn DispatchPlan>) -> Self {
        Self {
            plan,
            global: RwLock::new(None),
            context: RwLock::new(None),
            deprecated: AtomicBool::new(false),
        }
    }

    pub fn plan(&self) -> &Arc<dyn DispatchPlan> { &self.plan }

    pub fn set_global(&self, listener: Option<Listener>) { *self.global.write() = listener; }

    pub fn global(&self) -> Option<Listener> { self.global.read().clone() }

    pub fn set_context(&self, context: Option<Arc<dyn DispatchContext>>) { *self.context.write() = context; }

    pub fn context(&self) -> Option<Arc<dyn DispatchContext>> { self.context.read().clone() }

    pub fn is_deprecated(&self) -> bool { self.deprecated.load(Ordering::Acquire) }

    /// Stop all future fan-outs and forget every per-URL listener.
    ///
    /// Returns `false` if the dispatcher was already deprecated.
    pub fn deprecate(&self) -> bool {
        if self.deprecated.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.plan.clear_all();
        info!("progress dispatch deprecated, listeners cleared");
        true
    }

    /// Deliver one event, inline or through the configured context.
    pub fn dispatch(self: &Arc<Self>, progress: Progress) {
        if self.is_deprecated() {
            return;
        }

        match self.context() {
            None => self.fan_out(&progress),
            Some(context) => {
                let this = Arc::clone(self);
                context.execute(Box::new(move || this.fan_out(&progress)));
            }
        }
    }

    fn fan_out(&self, progress: &Progress) {
        // Re-checked here: a marshaled fan-out may run after deprecation
        if self.is_deprecated() {
            return;
        }

        if let Some(global) = self.global() {
            invoke(&global, progress);
        }

        let Some(key) = progress.key() else {
            return;
        };
        let listeners = self.plan.snapshot(&key);
        if listeners.is_empty() {
            return;
        }

        let mut retired = Vec::new();
        for listener in listeners.iter() {
            invoke(listener, progress);
            if progress.is_terminal() && wants_recycle(listener, progress) {
                retired.push(Arc::clone(listener));
            }
        }

        for listener in &retired {
            if self.plan.remove(&key, listener) {
                debug!(key = %key, "listener auto-recycled");
            }
        }
    }
}

fn invoke(listener: &Listener, progress: &Progress) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_progress(progress)));
    if let Err(payload) = outcome {
        warn!(
            url = %progress.url,
            direction = %progress.direction,
            state = %progress.state,
            panic = %panic_message(payload.as_ref()),
            "progress listener panicked"
        );
    }
}

fn wants_recycle(listener: &Listener, terminal: &Progress) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.auto_recycle(terminal))) {
        Ok(recycle) => recycle,
        Err(payload) => {
            warn!(
                url = %terminal.url,
                panic = %panic_message(payload.as_ref()),
                "auto-recycle query panicked, keeping listener"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}
