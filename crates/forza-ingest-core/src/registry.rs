use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::{IngestError, ListenerError, TelemetryListener, TelemetrySample};

#[derive(Clone)]
struct Entry {
    listener: Arc<dyn TelemetryListener>,
    // cleared on removal so an in-flight fan-out skips the listener
    active: Arc<AtomicBool>,
}

type Entries = Mutex<Vec<Entry>>;

fn same_listener(a: &Arc<dyn TelemetryListener>, b: &Arc<dyn TelemetryListener>) -> bool {
    // compare data pointers only; vtable pointers for one type may differ across codegen units
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered set of listeners. Cloning shares the same set.
///
/// Notification works on a snapshot taken under the lock, so listeners can
/// subscribe or unsubscribe from inside a callback.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<Entries>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry").field("listeners", &self.len()).finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` at the end of the notification order. Subscribing the
    /// same `Arc` again keeps its original position and adds nothing.
    pub fn subscribe(&self, listener: Arc<dyn TelemetryListener>) -> Subscription {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|e| same_listener(&e.listener, &listener)) {
            entries.push(Entry { listener: Arc::clone(&listener), active: Arc::new(AtomicBool::new(true)) });
        }
        Subscription {
            listener,
            entries: Arc::downgrade(&self.entries),
            unsubscribed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// Delivers `sample` to every listener in registration order and returns
    /// how many accepted it. Failures are logged and do not stop the fan-out.
    pub fn notify_next(&self, sample: &TelemetrySample) -> usize {
        let mut delivered = 0;
        for entry in self.snapshot() {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            match guarded(|| entry.listener.on_next(sample)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(listener = entry.listener.name(), error = %e, "listener failed on sample"),
            }
        }
        delivered
    }

    pub fn notify_error(&self, error: &IngestError) {
        for entry in self.snapshot() {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = guarded(|| {
                entry.listener.on_error(error);
                Ok(())
            }) {
                warn!(listener = entry.listener.name(), error = %e, "listener failed on error notification");
            }
        }
    }

    /// Tells every remaining listener that the stream has ended.
    pub fn notify_completed(&self) {
        for entry in self.snapshot() {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = guarded(|| entry.listener.on_completed()) {
                warn!(listener = entry.listener.name(), error = %e, "listener failed on completion");
            }
        }
    }
}

fn guarded<F>(f: F) -> Result<(), ListenerError>
where
    F: FnOnce() -> Result<(), ListenerError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => Err(ListenerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Returned by [`SubscriptionRegistry::subscribe`].
///
/// Dropping it leaves the listener subscribed; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    listener: Arc<dyn TelemetryListener>,
    entries: Weak<Entries>,
    unsubscribed: AtomicBool,
}

impl Subscription {
    /// Removes the bound listener. Only the first call has any effect.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        entries.lock().retain(|e| {
            if same_listener(&e.listener, &self.listener) {
                e.active.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener.name())
            .field("unsubscribed", &self.is_unsubscribed())
            .finish()
    }
}
