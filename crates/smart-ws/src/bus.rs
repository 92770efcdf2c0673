//! Typed publish/subscribe registry keyed by [`EventName`].
//!
//! Registrations live in an `scc::HashMap`, so handlers can be added and
//! removed from any thread while the connection manager emits. Emission is
//! synchronous and runs handlers in registration order.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::warn;

use crate::event::{EventName, SocketEvent};

type Handler<In, Out> = Arc<dyn Fn(&SocketEvent<In, Out>) + Send + Sync>;

struct Registration<In, Out> {
    id: u64,
    handler: Handler<In, Out>,
}

impl<In, Out> Clone for Registration<In, Out> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct BusInner<In, Out> {
    handlers: scc::HashMap<EventName, Vec<Registration<In, Out>>>,
    next_id: AtomicU64,
}

/// Type-erased removal so tokens need not carry the payload types.
trait Unregister: Send + Sync {
    fn unregister(&self, name: EventName, id: u64) -> bool;
}

impl<In, Out> Unregister for BusInner<In, Out> {
    fn unregister(&self, name: EventName, id: u64) -> bool {
        self.handlers
            .update_sync(&name, |_, regs| {
                let before = regs.len();
                regs.retain(|reg| reg.id != id);
                regs.len() != before
            })
            .unwrap_or(false)
    }
}

/// Handle returned by [`EventBus::on`].
///
/// Dropping a token does not unsubscribe; call [`SubscriptionToken::unsubscribe`].
pub struct SubscriptionToken {
    name: EventName,
    id: u64,
    bus: Weak<dyn Unregister>,
    active: AtomicBool,
}

impl SubscriptionToken {
    /// Remove exactly this registration. Returns `true` the first time it
    /// removes something; later calls are no-ops returning `false`.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.bus.upgrade() {
            Some(bus) => bus.unregister(self.name, self.id),
            None => false,
        }
    }

    /// The event this token is registered for.
    pub fn event(&self) -> EventName {
        self.name
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// In-process event registry.
pub struct EventBus<In, Out> {
    inner: Arc<BusInner<In, Out>>,
}

impl<In, Out> Clone for EventBus<In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In, Out> Default for EventBus<In, Out>
where
    In: 'static,
    Out: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> EventBus<In, Out>
where
    In: 'static,
    Out: 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: scc::HashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for one event name.
    pub fn on<F>(&self, name: EventName, handler: F) -> SubscriptionToken
    where
        F: Fn(&SocketEvent<In, Out>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let reg = Registration {
            id,
            handler: Arc::new(handler) as Handler<In, Out>,
        };

        let appended = self
            .inner
            .handlers
            .update_sync(&name, |_, regs| regs.push(reg.clone()))
            .is_some();

        if !appended
            && let Err((_, rejected)) = self.inner.handlers.insert_sync(name, vec![reg.clone()])
        {
            // Lost an insert race; the list exists now.
            drop(rejected);
            let _ = self
                .inner
                .handlers
                .update_sync(&name, |_, regs| regs.push(reg));
        }

        let bus: Weak<dyn Unregister> = Arc::downgrade(&self.inner) as Weak<dyn Unregister>;
        SubscriptionToken {
            name,
            id,
            bus,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every handler registered for the event's name.
    ///
    /// A panicking handler is logged and skipped; it never reaches the
    /// publisher and never stops later handlers. Returns how many handlers
    /// ran to completion.
    pub fn emit(&self, event: &SocketEvent<In, Out>) -> usize {
        let name = event.name();
        let handlers: Vec<Handler<In, Out>> = self
            .inner
            .handlers
            .update_sync(&name, |_, regs| {
                regs.iter().map(|reg| Arc::clone(&reg.handler)).collect()
            })
            .unwrap_or_default();

        let mut completed = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => completed += 1,
                Err(_) => warn!(event = %name, "Event handler panicked"),
            }
        }
        completed
    }

    /// Number of handlers registered for a name.
    pub fn listener_count(&self, name: EventName) -> usize {
        self.inner
            .handlers
            .update_sync(&name, |_, regs| regs.len())
            .unwrap_or(0)
    }
}
