use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::warn;

/// Callbacks fired when the listener count crosses zero. They run while the
/// registry is locked, so they must not subscribe or drop subscriptions.
pub struct ActivationHooks {
    pub on_first_subscribe: Box<dyn Fn() + Send + Sync>,
    pub on_last_unsubscribe: Box<dyn Fn() + Send + Sync>,
}

impl ActivationHooks {
    pub fn new(
        on_first_subscribe: impl Fn() + Send + Sync + 'static,
        on_last_unsubscribe: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_first_subscribe: Box::new(on_first_subscribe),
            on_last_unsubscribe: Box::new(on_last_unsubscribe),
        }
    }

    pub fn none() -> Self {
        Self::new(|| {}, || {})
    }
}

/// Multi-subscriber broadcast that reports listener-count transitions.
pub struct ActivatedBroadcast<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    registry: Mutex<Registry<T>>,
    hooks: ActivationHooks,
}

struct Registry<T> {
    sender: Option<broadcast::Sender<T>>,
    listeners: usize,
}

impl<T> Shared<T> {
    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> ActivatedBroadcast<T> {
    pub fn new(capacity: usize, hooks: ActivationHooks) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    sender: Some(sender),
                    listeners: 0,
                }),
                hooks,
            }),
        }
    }

    /// Attaches a listener. After `close` the returned subscription is
    /// already finished and does not count as a listener.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut registry = self.shared.registry();
        let Some(sender) = registry.sender.as_ref() else {
            let (_, receiver) = broadcast::channel(1);
            return Subscription {
                receiver,
                _guard: ListenerGuard {
                    shared: Arc::clone(&self.shared),
                    counted: false,
                },
            };
        };

        let receiver = sender.subscribe();
        registry.listeners += 1;
        if registry.listeners == 1 {
            (self.shared.hooks.on_first_subscribe)();
        }
        Subscription {
            receiver,
            _guard: ListenerGuard {
                shared: Arc::clone(&self.shared),
                counted: true,
            },
        }
    }

    /// Delivers `value` to current listeners; returns how many received it.
    pub fn publish(&self, value: T) -> usize {
        let registry = self.shared.registry();
        match registry.sender.as_ref() {
            Some(sender) => sender.send(value).unwrap_or(0),
            None => 0,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.registry().listeners
    }

    /// Ends every subscription once buffered values are drained.
    pub fn close(&self) {
        self.shared.registry().sender = None;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry().sender.is_none()
    }
}

struct ListenerGuard<T> {
    shared: Arc<Shared<T>>,
    counted: bool,
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        let mut registry = self.shared.registry();
        registry.listeners = registry.listeners.saturating_sub(1);
        if registry.listeners == 0 {
            (self.shared.hooks.on_last_unsubscribe)();
        }
    }
}

/// One listener on an [`ActivatedBroadcast`]. Dropping it detaches.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
    _guard: ListenerGuard<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next value, or `None` once the stream is closed. Values missed because
    /// this listener fell behind are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "result stream: listener lagged, dropping values");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "result stream: listener lagged, dropping values");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Converts into a [`Stream`]; the listener stays attached until the
    /// stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + Unpin {
        let Subscription { receiver, _guard } = self;
        BroadcastStream::new(receiver).filter_map(move |item| {
            let _attached = &_guard;
            match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "result stream: listener lagged, dropping values");
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counters {
        first: Arc<AtomicUsize>,
        last: Arc<AtomicUsize>,
    }

    fn counted_broadcast() -> (ActivatedBroadcast<u32>, Counters) {
        let first = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let hooks = {
            let first = Arc::clone(&first);
            let last = Arc::clone(&last);
            ActivationHooks::new(
                move || {
                    first.fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    last.fetch_add(1, Ordering::SeqCst);
                },
            )
        };
        (ActivatedBroadcast::new(16, hooks), Counters { first, last })
    }

    #[test]
    fn hooks_fire_only_on_zero_crossings() {
        let (results, counters) = counted_broadcast();

        let a = results.subscribe();
        assert_eq!(counters.first.load(Ordering::SeqCst), 1);
        let b = results.subscribe();
        assert_eq!(counters.first.load(Ordering::SeqCst), 1);
        assert_eq!(results.listener_count(), 2);

        drop(a);
        assert_eq!(counters.last.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(counters.last.load(Ordering::SeqCst), 1);
        assert_eq!(results.listener_count(), 0);

        let _c = results.subscribe();
        assert_eq!(counters.first.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_reaches_every_listener() {
        let (results, _) = counted_broadcast();
        assert_eq!(results.publish(1), 0);

        let mut a = results.subscribe();
        let mut b = results.subscribe();
        assert_eq!(results.publish(7), 2);
        assert_eq!(a.try_recv(), Some(7));
        assert_eq!(b.try_recv(), Some(7));
        assert_eq!(a.try_recv(), None);
    }

    #[tokio::test]
    async fn close_drains_then_ends_subscriptions() {
        let (results, counters) = counted_broadcast();
        let mut listener = results.subscribe();
        results.publish(3);
        results.close();

        assert!(results.is_closed());
        assert_eq!(results.publish(4), 0);
        assert_eq!(listener.recv().await, Some(3));
        assert_eq!(listener.recv().await, None);

        let mut late = results.subscribe();
        assert_eq!(late.recv().await, None);
        assert_eq!(counters.first.load(Ordering::SeqCst), 1);
        drop(late);
        assert_eq!(counters.last.load(Ordering::SeqCst), 0);
        drop(listener);
        assert_eq!(counters.last.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lagged_listener_skips_to_retained_values() {
        let results = ActivatedBroadcast::new(2, ActivationHooks::none());
        let mut listener = results.subscribe();
        for value in 0..5u32 {
            results.publish(value);
        }
        assert_eq!(listener.recv().await, Some(3));
        assert_eq!(listener.recv().await, Some(4));
    }

    #[tokio::test]
    async fn stream_keeps_listener_attached_until_dropped() {
        let (results, counters) = counted_broadcast();
        let mut stream = results.subscribe().into_stream();
        assert_eq!(results.listener_count(), 1);

        results.publish(9);
        results.close();
        assert_eq!(stream.next().await, Some(9));
        assert_eq!(stream.next().await, None);

        drop(stream);
        assert_eq!(counters.last.load(Ordering::SeqCst), 1);
    }
}
