use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use ahash::AHashMap;

/// Identifier handed out for every subscription
pub type SubscriptionId = u64;

type HandlerList = Vec<(SubscriptionId, Arc<dyn EventHandler>)>;

/// Engine-wide event bus.
///
/// Handlers are stored per event type. Publishing snapshots the handler list
/// and releases the lock before dispatch, so a handler may subscribe,
/// unsubscribe or publish again without deadlocking.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    handlers: Mutex<AHashMap<TypeId, HandlerList>>,
    next_id: AtomicU64,
}

/// Event trait that all events must implement
pub trait Event: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Handler trait for event handlers
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &dyn Event);
}

/// Implement [`Event`] for a list of plain event structs.
#[macro_export]
macro_rules! impl_event {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::events::Event for $t {
                fn as_any(&self) -> &dyn ::std::any::Any {
                    self
                }
            }
        )*
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle unsubscribes the handler. Use [`Subscription::detach`]
/// to keep the handler registered for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: SubscriptionId,
    type_id: TypeId,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Identifier of this subscription
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the handler from the bus now
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Keep the handler registered after this handle goes away
    pub fn detach(mut self) {
        self.bus = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut handlers = bus.handlers.lock();
            if let Some(list) = handlers.get_mut(&self.type_id) {
                list.retain(|(id, _)| *id != self.id);
                if list.is_empty() {
                    handlers.remove(&self.type_id);
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(AHashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<E: Event>(&self, handler: Box<dyn EventHandler>) -> Subscription {
        let type_id = TypeId::of::<E>();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .entry(type_id)
            .or_insert_with(Vec::new)
            .push((id, Arc::from(handler)));

        Subscription {
            id,
            type_id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe a closure that receives the concrete event type
    pub fn on<E, F>(&self, f: F) -> Subscription
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe::<E>(handler_from_fn(move |event: &dyn Event| {
            if let Some(event) = event.as_any().downcast_ref::<E>() {
                f(event);
            }
        }))
    }

    /// Publish an event
    pub fn publish<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let snapshot: Vec<Arc<dyn EventHandler>> = match self.inner.handlers.lock().get(&type_id) {
            Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
            None => return,
        };

        for handler in snapshot {
            handler.handle(&event);
        }
    }

    /// Number of live handlers for an event type
    pub fn handler_count<E: Event>(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.inner.handlers.lock().len())
            .finish()
    }
}

/// Helper struct for creating event handlers from closures
pub struct ClosureEventHandler<F> {
    handler: F,
}

impl<F> EventHandler for ClosureEventHandler<F>
where
    F: Fn(&dyn Event) + Send + Sync,
{
    fn handle(&self, event: &dyn Event) {
        (self.handler)(event);
    }
}

/// Create an event handler from a closure
pub fn handler_from_fn<F>(f: F) -> Box<dyn EventHandler>
where
    F: Fn(&dyn Event) + Send + Sync + 'static,
{
    Box::new(ClosureEventHandler { handler: f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Ping(usize);

    #[derive(Debug)]
    struct Pong;

    crate::impl_event!(Ping, Pong);

    #[test]
    fn test_publish_reaches_typed_subscribers_only() {
        let bus = EventBus::new();
        let total = Arc::new(AtomicUsize::new(0));

        let seen = total.clone();
        let _ping = bus.on(move |event: &Ping| {
            seen.fetch_add(event.0, Ordering::SeqCst);
        });
        let _pong = bus.on(|_: &Pong| panic!("pong handler must not see pings"));

        bus.publish(Ping(3));
        bus.publish(Ping(4));

        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let sub = bus.on(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Ping(0));
        assert_eq!(bus.handler_count::<Ping>(), 1);

        sub.unsubscribe();
        bus.publish(Ping(0));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count::<Ping>(), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let bus = EventBus::new();
        bus.on(|_: &Pong| {}).detach();
        assert_eq!(bus.handler_count::<Pong>(), 1);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = EventBus::new();
        let pongs = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let _ping = bus.on(move |_: &Ping| inner_bus.publish(Pong));
        let counter = pongs.clone();
        let _pong = bus.on(move |_: &Pong| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping(1));
        assert_eq!(pongs.load(Ordering::SeqCst), 1);
    }
}
