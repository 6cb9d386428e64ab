//! Topic broker shared by every socket of one server.
//!
//! Subscriptions live only here; sockets ask the broker for their topic
//! list instead of mirroring it. Exact topics are looked up directly,
//! wildcard filters are scanned on every publish.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;

use super::topic;
use crate::engine::SocketKey;

/// Receiver of published messages.
pub trait Subscriber: Send + Sync {
    /// Queues a published message. Delivery is best effort.
    fn deliver(&self, data: Bytes, is_binary: bool);
}

type Subscribers = HashMap<SocketKey, Arc<dyn Subscriber>>;

#[derive(Default)]
struct BrokerState {
    exact: HashMap<String, Subscribers>,
    wildcard: HashMap<String, Subscribers>,
    by_socket: HashMap<SocketKey, BTreeSet<String>>,
}

impl BrokerState {
    fn filters_mut(&mut self, filter: &str) -> &mut HashMap<String, Subscribers> {
        if topic::is_wildcard(filter) {
            &mut self.wildcard
        } else {
            &mut self.exact
        }
    }

    fn detach(&mut self, key: SocketKey, filter: &str) {
        let filters = self.filters_mut(filter);
        if let Some(subs) = filters.get_mut(filter) {
            subs.remove(&key);
            if subs.is_empty() {
                filters.remove(filter);
            }
        }
    }
}

/// Publish/subscribe fan-out keyed by topic filter.
#[derive(Default)]
pub struct TopicBroker {
    state: Mutex<BrokerState>,
}

impl fmt::Debug for TopicBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TopicBroker")
            .field("exact", &state.exact.len())
            .field("wildcard", &state.wildcard.len())
            .field("sockets", &state.by_socket.len())
            .finish()
    }
}

impl TopicBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes `subscriber` to `filter`. Returns `false` if it was
    /// already subscribed.
    pub fn subscribe(&self, key: SocketKey, subscriber: Arc<dyn Subscriber>, filter: &str) -> bool {
        let mut state = self.lock();
        if !state.by_socket.entry(key).or_default().insert(filter.to_string()) {
            return false;
        }
        state
            .filters_mut(filter)
            .entry(filter.to_string())
            .or_default()
            .insert(key, subscriber);
        true
    }

    /// Removes one subscription. Returns `false` if there was none.
    pub fn unsubscribe(&self, key: SocketKey, filter: &str) -> bool {
        let mut state = self.lock();
        let removed = match state.by_socket.get_mut(&key) {
            Some(topics) => {
                let removed = topics.remove(filter);
                if topics.is_empty() {
                    state.by_socket.remove(&key);
                }
                removed
            }
            None => false,
        };
        if removed {
            state.detach(key, filter);
        }
        removed
    }

    /// Filters `key` is currently subscribed to, sorted.
    #[must_use]
    pub fn topics(&self, key: SocketKey) -> Vec<String> {
        self.lock()
            .by_socket
            .get(&key)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops every subscription held by `key`.
    pub fn remove(&self, key: SocketKey) {
        let mut state = self.lock();
        if let Some(topics) = state.by_socket.remove(&key) {
            for filter in &topics {
                state.detach(key, filter);
            }
        }
    }

    /// Delivers a message to every subscriber whose filter matches
    /// `topic`, once per subscriber, skipping `exclude`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(
        &self,
        topic: &str,
        data: &Bytes,
        is_binary: bool,
        exclude: Option<SocketKey>,
    ) -> usize {
        let recipients: Subscribers = {
            let state = self.lock();
            let exact = state.exact.get(topic).into_iter();
            let wildcard = state
                .wildcard
                .iter()
                .filter(|(filter, _)| topic::matches(filter, topic))
                .map(|(_, subs)| subs);
            exact
                .chain(wildcard)
                .flat_map(|subs| subs.iter())
                .filter(|(key, _)| Some(**key) != exclude)
                .map(|(key, sub)| (*key, Arc::clone(sub)))
                .collect()
        };

        for subscriber in recipients.values() {
            subscriber.deliver(data.clone(), is_binary);
        }
        recipients.len()
    }

    /// Number of sockets holding at least one subscription.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().by_socket.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Inbox(Mutex<Vec<(Bytes, bool)>>);

    impl Subscriber for Inbox {
        fn deliver(&self, data: Bytes, is_binary: bool) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((data, is_binary));
        }
    }

    impl Inbox {
        fn received(&self) -> Vec<(Bytes, bool)> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    fn inbox() -> Arc<Inbox> {
        Arc::new(Inbox::default())
    }

    #[test]
    fn publisher_is_excluded() {
        let broker = TopicBroker::new();
        let (a, b) = (inbox(), inbox());
        broker.subscribe(SocketKey(1), Arc::clone(&a) as Arc<dyn Subscriber>, "T");
        broker.subscribe(SocketKey(2), Arc::clone(&b) as Arc<dyn Subscriber>, "T");

        let reached = broker.publish("T", &Bytes::from_static(b"hi"), false, Some(SocketKey(1)));

        assert_eq!(reached, 1);
        assert!(a.received().is_empty());
        assert_eq!(b.received(), vec![(Bytes::from_static(b"hi"), false)]);
    }

    #[test]
    fn overlapping_filters_deliver_once() {
        let broker = TopicBroker::new();
        let sub = inbox();
        let key = SocketKey(7);
        broker.subscribe(key, Arc::clone(&sub) as Arc<dyn Subscriber>, "/topic/room1");
        broker.subscribe(key, Arc::clone(&sub) as Arc<dyn Subscriber>, "/topic/#");
        broker.subscribe(key, Arc::clone(&sub) as Arc<dyn Subscriber>, "/topic/+");

        assert_eq!(broker.publish("/topic/room1", &Bytes::new(), true, None), 1);
        assert_eq!(sub.received().len(), 1);
    }

    #[test]
    fn duplicate_subscribe_reports_false() {
        let broker = TopicBroker::new();
        let sub = inbox();
        assert!(broker.subscribe(SocketKey(1), Arc::clone(&sub) as Arc<dyn Subscriber>, "T"));
        assert!(!broker.subscribe(SocketKey(1), Arc::clone(&sub) as Arc<dyn Subscriber>, "T"));
        assert_eq!(broker.topics(SocketKey(1)), vec!["T".to_string()]);
    }

    #[test]
    fn unsubscribe_reports_membership() {
        let broker = TopicBroker::new();
        let sub = inbox();
        broker.subscribe(SocketKey(1), Arc::clone(&sub) as Arc<dyn Subscriber>, "T");

        assert!(broker.unsubscribe(SocketKey(1), "T"));
        assert!(!broker.unsubscribe(SocketKey(1), "T"));
        assert!(!broker.unsubscribe(SocketKey(2), "T"));
        assert_eq!(broker.publish("T", &Bytes::new(), false, None), 0);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn remove_drops_all_subscriptions() {
        let broker = TopicBroker::new();
        let sub = inbox();
        broker.subscribe(SocketKey(3), Arc::clone(&sub) as Arc<dyn Subscriber>, "a");
        broker.subscribe(SocketKey(3), Arc::clone(&sub) as Arc<dyn Subscriber>, "b/#");

        broker.remove(SocketKey(3));

        assert!(broker.topics(SocketKey(3)).is_empty());
        assert_eq!(broker.publish("a", &Bytes::new(), false, None), 0);
        assert_eq!(broker.publish("b/c", &Bytes::new(), false, None), 0);
        assert!(sub.received().is_empty());
    }

    #[test]
    fn topics_are_sorted() {
        let broker = TopicBroker::new();
        let sub = inbox();
        for t in ["zeta", "alpha", "mid"] {
            broker.subscribe(SocketKey(1), Arc::clone(&sub) as Arc<dyn Subscriber>, t);
        }
        assert_eq!(broker.topics(SocketKey(1)), vec!["alpha", "mid", "zeta"]);
    }
}
