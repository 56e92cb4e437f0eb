use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;

/// Identity of a widget publishing on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightEvent {
    pub case_ids: Vec<String>,
    pub origin: Origin,
}

impl HighlightEvent {
    pub fn is_clear(&self) -> bool {
        self.case_ids.is_empty()
    }
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<Origin, Sender<HighlightEvent>>,
    last: Option<HighlightEvent>,
}

/// Broadcast of hovered case ids between linked widgets.
///
/// Publishing never blocks. Each subscriber owns an origin and never sees
/// its own events; a new subscriber first receives the last event.
#[derive(Clone, Default)]
pub struct HighlightBus {
    state: Arc<Mutex<BusState>>,
    next_origin: Arc<AtomicU64>,
}

impl HighlightBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> HighlightSubscription {
        let origin = Origin(self.next_origin.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded();

        let mut state = self.state.lock();
        if let Some(last) = state.last.as_ref().filter(|last| last.origin != origin) {
            let _ = tx.send(last.clone());
        }
        state.subscribers.insert(origin, tx);
        debug!("Highlight subscriber {origin:?} joined ({} total)", state.subscribers.len());

        HighlightSubscription {
            origin,
            rx,
            latest: None,
            bus: self.clone(),
        }
    }

    pub fn publish(&self, origin: Origin, case_ids: Vec<String>) {
        let event = HighlightEvent { case_ids, origin };
        let mut state = self.state.lock();
        for (subscriber, tx) in &state.subscribers {
            if *subscriber != origin {
                let _ = tx.send(event.clone());
            }
        }
        state.last = Some(event);
    }

    pub fn last(&self) -> Option<HighlightEvent> {
        self.state.lock().last.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn unsubscribe(&self, origin: Origin) {
        self.state.lock().subscribers.remove(&origin);
    }
}

/// Implemented by widgets that react to highlights from other widgets.
pub trait HighlightListener {
    fn on_highlight(&mut self, event: &HighlightEvent);
}

/// Receiving end of a subscription; leaves the bus when dropped.
pub struct HighlightSubscription {
    origin: Origin,
    rx: Receiver<HighlightEvent>,
    latest: Option<HighlightEvent>,
    bus: HighlightBus,
}

impl HighlightSubscription {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn publish(&self, case_ids: Vec<String>) {
        self.bus.publish(self.origin, case_ids);
    }

    pub fn clear(&self) {
        self.publish(Vec::new());
    }

    pub fn try_next(&mut self) -> Option<HighlightEvent> {
        let event = self.rx.try_recv().ok()?;
        self.latest = Some(event.clone());
        Some(event)
    }

    /// Drain pending events and keep only the newest.
    pub fn latest(&mut self) -> Option<&HighlightEvent> {
        while self.try_next().is_some() {}
        self.latest.as_ref()
    }

    pub fn dispatch_to<L: HighlightListener>(&mut self, listener: &mut L) {
        while let Some(event) = self.try_next() {
            listener.on_highlight(&event);
        }
    }
}

impl Drop for HighlightSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn publisher_does_not_see_its_own_event() {
        let bus = HighlightBus::new();
        let mut tree = bus.subscribe();
        let mut table = bus.subscribe();

        tree.publish(ids(&["A", "B"]));
        assert!(tree.try_next().is_none());
        let event = table.try_next().unwrap();
        assert_eq!(event.case_ids, ids(&["A", "B"]));
        assert_eq!(event.origin, tree.origin());
    }

    #[test]
    fn late_subscriber_gets_last_value() {
        let bus = HighlightBus::new();
        let tree = bus.subscribe();
        tree.publish(ids(&["A"]));
        tree.publish(ids(&["C"]));

        let mut map = bus.subscribe();
        assert_eq!(map.try_next().map(|e| e.case_ids), Some(ids(&["C"])));
        assert!(map.try_next().is_none());
    }

    #[test]
    fn latest_keeps_newest() {
        let bus = HighlightBus::new();
        let tree = bus.subscribe();
        let mut table = bus.subscribe();
        tree.publish(ids(&["A"]));
        tree.publish(ids(&["B"]));
        tree.clear();
        assert!(table.latest().unwrap().is_clear());
    }

    #[test]
    fn dropped_subscription_leaves_bus() {
        let bus = HighlightBus::new();
        let tree = bus.subscribe();
        {
            let _table = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 1);
        tree.publish(ids(&["A"]));
        assert_eq!(bus.last().map(|e| e.origin), Some(tree.origin()));
    }

    #[test]
    fn dispatches_to_listener() {
        #[derive(Default)]
        struct Counter(Vec<usize>);
        impl HighlightListener for Counter {
            fn on_highlight(&mut self, event: &HighlightEvent) {
                self.0.push(event.case_ids.len());
            }
        }

        let bus = HighlightBus::new();
        let tree = bus.subscribe();
        let mut table = bus.subscribe();
        tree.publish(ids(&["A", "B"]));
        tree.publish(ids(&["C"]));

        let mut counter = Counter::default();
        table.dispatch_to(&mut counter);
        assert_eq!(counter.0, vec![2, 1]);
    }
}
