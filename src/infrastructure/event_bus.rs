use crate::domain::events::{Event, EventHandler, EventKind};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Token returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

struct Subscription {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

struct Shared {
    handlers: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    pending: AtomicUsize,
}

impl Shared {
    /// Invoke every handler registered for this event's kind. Handlers run
    /// concurrently; one failure does not stop the others.
    async fn process(&self, event: Event) {
        let kind = event.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let guard = self.handlers.read().await;
            guard
                .get(&kind)
                .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!("No handlers for {} event", kind);
        } else {
            let futures = handlers
                .iter()
                .map(|handler| handler.handle(event.clone()));
            for (handler, result) in handlers.iter().zip(join_all(futures).await) {
                if let Err(e) = result {
                    error!(
                        "Handler {} failed for {} event: {:#}",
                        handler.name(),
                        kind,
                        e
                    );
                }
            }
        }

        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Typed in-process pub/sub with a single dispatcher task.
///
/// Events are enqueued on an unbounded queue and dispatched in publish
/// order. `stop` drains everything still queued before returning.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Event>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Event>>>>,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                pending: AtomicUsize::new(0),
            }),
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            task: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a handler for one event kind.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.shared.handlers.write().await;
        debug!("Subscribed {} to {} events", handler.name(), kind);
        guard
            .entry(kind)
            .or_default()
            .push(Subscription { id, handler });
        SubscriptionId { kind, id }
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut guard = self.shared.handlers.write().await;
        if let Some(subs) = guard.get_mut(&subscription.kind) {
            subs.retain(|s| s.id != subscription.id);
        }
    }

    /// Enqueue an event. Never blocks; the queue is unbounded and
    /// publishers are expected to produce at bounded rates.
    pub fn publish(&self, event: Event) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.tx.send(event) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Event bus queue closed, dropping {} event", e.0.kind());
        }
    }

    /// Start the dispatcher task. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("Event bus already consumed its queue, cannot restart");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let stop_signal = Arc::clone(&self.stop_signal);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_signal.notified() => break,
                    maybe = rx.recv() => match maybe {
                        Some(event) => shared.process(event).await,
                        None => break,
                    },
                }
            }
            // Drain whatever is still queued before the task ends.
            while let Ok(event) = rx.try_recv() {
                shared.process(event).await;
            }
        });

        *self.task.lock().await = Some(handle);
        info!("Event bus started");
    }

    /// Stop the dispatcher, draining queued events first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_signal.notify_one();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Event bus dispatcher panicked: {}", e);
            }
        }
        info!("Event bus stopped");
    }

    /// Wait until every published event has been dispatched.
    pub async fn wait_empty(&self) {
        while self.shared.pending.load(Ordering::SeqCst) != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.shared
            .handlers
            .read()
            .await
            .get(&kind)
            .map_or(0, |subs| subs.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{ControlCommand, ControlEvent, FillEvent};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct RecordingHandler {
        seen: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: Event) -> anyhow::Result<()> {
            if let Event::Fill(fill) = event {
                self.seen.lock().unwrap().push(fill.fill_id);
            }
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: Event) -> anyhow::Result<()> {
            anyhow::bail!("intentional failure")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn control_event() -> Event {
        Event::Control(ControlEvent {
            command: ControlCommand::Pause,
        })
    }

    fn fill_event(fill_id: &str) -> Event {
        Event::Fill(FillEvent {
            fill_id: fill_id.to_string(),
            order_id: "ORD-1".to_string(),
            quantity: 1,
            price: dec!(100),
        })
    }

    #[tokio::test]
    async fn test_publish_dispatches_to_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventKind::Control,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await;

        bus.start().await;
        bus.publish(control_event());
        bus.wait_empty().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_preserves_publish_order() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(
            EventKind::Fill,
            Arc::new(RecordingHandler {
                seen: Arc::clone(&seen),
            }),
        )
        .await;

        bus.start().await;
        for i in 0..50 {
            bus.publish(fill_event(&format!("FILL-ORD-1-{i}")));
        }
        bus.wait_empty().await;
        bus.stop().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        for (i, fill_id) in seen.iter().enumerate() {
            assert_eq!(fill_id, &format!("FILL-ORD-1-{i}"));
        }
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::Control, Arc::new(FailingHandler)).await;
        bus.subscribe(
            EventKind::Control,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await;

        bus.start().await;
        bus.publish(control_event());
        bus.publish(control_event());
        bus.wait_empty().await;
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventKind::Control,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await;

        // Publish before the dispatcher ever runs, then stop immediately.
        for _ in 0..10 {
            bus.publish(control_event());
        }
        bus.start().await;
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus
            .subscribe(
                EventKind::Control,
                Arc::new(CountingHandler {
                    count: Arc::clone(&count),
                }),
            )
            .await;
        assert_eq!(bus.subscriber_count(EventKind::Control).await, 1);

        bus.unsubscribe(sub).await;
        assert_eq!(bus.subscriber_count(EventKind::Control).await, 0);

        bus.start().await;
        bus.publish(control_event());
        bus.wait_empty().await;
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
