//! Observer registration and event fan-out for one node of the task tree
//!
//! Two kinds of subscriber exist. External observers registered with `subscribe`
//! are delivered through the run's [`Dispatcher`], so a UI receives events on the
//! thread that drains its queue. Structural wiring registered with `attach` (a
//! container listening to its children) runs inline on the notifying thread so
//! aggregates never lag behind the queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::dispatch::Dispatcher;
use crate::types::Event;
use crate::utils::lock;

/// Callback invoked with every event a node publishes
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Dispatched,
    Inline,
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    delivery: Delivery,
    handler: EventHandler,
}

/// Subscriber list of one node
#[derive(Default)]
pub(crate) struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

impl EventHub {
    pub(crate) fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.register(Delivery::Dispatched, handler)
    }

    pub(crate) fn attach(&self, handler: EventHandler) -> SubscriptionId {
        self.register(Delivery::Inline, handler)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver `event` to every subscriber registered at the time of the call
    ///
    /// Handlers run without the subscriber list locked, so they may subscribe or
    /// unsubscribe freely.
    pub(crate) fn emit(&self, event: Event, dispatcher: &Arc<dyn Dispatcher>) {
        let (inline, dispatched): (Vec<_>, Vec<_>) = lock(&self.subscribers)
            .iter()
            .cloned()
            .partition(|s| s.delivery == Delivery::Inline);

        for subscriber in &inline {
            (subscriber.handler)(&event);
        }

        if !dispatched.is_empty() {
            dispatcher.dispatch(Box::new(move || {
                for subscriber in &dispatched {
                    (subscriber.handler)(&event);
                }
            }));
        }
    }

    fn register(&self, delivery: Delivery, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push(Subscriber {
            id,
            delivery,
            handler,
        });
        id
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ImmediateDispatcher, dispatch_queue};
    use crate::types::TaskId;

    fn recorder() -> (EventHandler, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |e: &Event| sink.lock().unwrap().push(e.clone()));
        (handler, seen)
    }

    fn estimation(n: u64) -> Event {
        Event::EstimationChanged {
            task: TaskId(1),
            estimation: n,
        }
    }

    #[test]
    fn unsubscribed_handler_stops_receiving() {
        let hub = EventHub::default();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(ImmediateDispatcher);
        let (handler, seen) = recorder();
        let id = hub.subscribe(handler);

        hub.emit(estimation(1), &dispatcher);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.emit(estimation(2), &dispatcher);

        assert_eq!(*seen.lock().unwrap(), vec![estimation(1)]);
    }

    #[test]
    fn inline_wiring_bypasses_the_dispatch_queue() {
        let hub = EventHub::default();
        let (queue_dispatcher, mut queue) = dispatch_queue();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(queue_dispatcher);
        let (wired, wired_seen) = recorder();
        let (observer, observer_seen) = recorder();
        hub.attach(wired);
        hub.subscribe(observer);

        hub.emit(estimation(4), &dispatcher);
        assert_eq!(wired_seen.lock().unwrap().len(), 1);
        assert!(observer_seen.lock().unwrap().is_empty());

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*observer_seen.lock().unwrap(), vec![estimation(4)]);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let hub = Arc::new(EventHub::default());
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(ImmediateDispatcher);
        let calls = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let h = Arc::clone(&hub);
        let c = Arc::clone(&calls);
        let s = Arc::clone(&slot);
        let id = hub.subscribe(Arc::new(move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *s.lock().unwrap() {
                h.unsubscribe(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        hub.emit(estimation(1), &dispatcher);
        hub.emit(estimation(2), &dispatcher);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
