use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Notifications shared by the controllers of one channel view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEvent {
    /// The terminal was resized; carries the new viewport height.
    WindowResize { height: u32 },
    /// Something outside the post list asked it to re-check its scroll
    /// position, optionally forcing it to the bottom.
    ScrollChange { to_bottom: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    WindowResize,
    ScrollChange,
}

impl ViewEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ViewEvent::WindowResize { .. } => Topic::WindowResize,
            ViewEvent::ScrollChange { .. } => Topic::ScrollChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    tx: Sender<ViewEvent>,
}

/// Publish/subscribe channel scoped to a view. Each subscriber gets its own
/// receiver for one topic and drains it on its own schedule.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> (SubscriptionId, Receiver<ViewEvent>) {
        let (tx, rx) = unbounded();
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push(Subscriber { id, topic, tx });
        (id, rx)
    }

    /// Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|sub| sub.id != id);
        inner.subscribers.len() != before
    }

    pub fn emit(&self, event: ViewEvent) {
        let topic = event.topic();
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|sub| sub.topic != topic || sub.tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_only_matching_topic() {
        let bus = EventBus::new();
        let (_, scroll) = bus.subscribe(Topic::ScrollChange);
        let (_, resize) = bus.subscribe(Topic::WindowResize);
        bus.emit(ViewEvent::ScrollChange { to_bottom: true });
        assert_eq!(
            scroll.try_recv().unwrap(),
            ViewEvent::ScrollChange { to_bottom: true }
        );
        assert!(resize.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe(Topic::WindowResize);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(ViewEvent::WindowResize { height: 10 });
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_emit() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe(Topic::WindowResize);
        drop(rx);
        bus.emit(ViewEvent::WindowResize { height: 3 });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
