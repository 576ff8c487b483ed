use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A queued notification. `event_id` drives deduplication.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event_id: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event_id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Delivery backend. SMTP or a chat webhook live behind this; the worker
/// does not care.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Default channel: writes notifications to the application log.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        info!("NOTIFY [{}] {}", notification.subject, notification.body);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub max_queue_size: usize,
    pub rate_limit_per_minute: usize,
    pub dedup_ttl_secs: i64,
    pub backoff_base_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            rate_limit_per_minute: 10,
            dedup_ttl_secs: 300,
            backoff_base_ms: 1000,
            send_timeout_ms: 10_000,
        }
    }
}

struct WorkerState {
    channel: Arc<dyn NotificationChannel>,
    config: NotifierConfig,
    sent_cache: HashMap<String, DateTime<Utc>>,
    send_timestamps: Vec<DateTime<Utc>>,
}

impl WorkerState {
    /// Dedup, rate-limit, then deliver with up to three attempts and
    /// exponential backoff.
    async fn process(&mut self, notification: Notification) {
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(self.config.dedup_ttl_secs);
        self.sent_cache.retain(|_, sent_at| now - *sent_at < ttl);
        if self.sent_cache.contains_key(&notification.event_id) {
            return;
        }

        self.throttle().await;

        for attempt in 0..3u32 {
            let deliver = self.channel.deliver(&notification);
            let timeout = Duration::from_millis(self.config.send_timeout_ms);
            match tokio::time::timeout(timeout, deliver).await {
                Ok(Ok(())) => {
                    self.sent_cache
                        .insert(notification.event_id.clone(), Utc::now());
                    self.send_timestamps.push(Utc::now());
                    return;
                }
                Ok(Err(e)) => warn!(
                    "Notification delivery failed (attempt {}): {:#}",
                    attempt + 1,
                    e
                ),
                Err(_) => warn!("Notification delivery timed out (attempt {})", attempt + 1),
            }
            let backoff = self.config.backoff_base_ms * 2u64.pow(attempt);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
        warn!("Notification dropped after retries: {}", notification.event_id);
    }

    async fn throttle(&mut self) {
        loop {
            let cutoff = Utc::now() - ChronoDuration::seconds(60);
            self.send_timestamps.retain(|t| *t > cutoff);
            if self.send_timestamps.len() < self.config.rate_limit_per_minute {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Queue-backed async notifier. Producers enqueue without blocking; a
/// single worker delivers in the background and drains on stop.
pub struct Notifier {
    tx: Mutex<Option<mpsc::Sender<Notification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    channel: Arc<dyn NotificationChannel>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, config: NotifierConfig) -> Self {
        Self {
            tx: Mutex::new(None),
            worker: Mutex::new(None),
            channel,
            config,
        }
    }

    pub fn start(&self) {
        let (tx, mut rx) = mpsc::channel::<Notification>(self.config.max_queue_size);
        *self.tx.lock().unwrap() = Some(tx);

        let mut state = WorkerState {
            channel: Arc::clone(&self.channel),
            config: self.config.clone(),
            sent_cache: HashMap::new(),
            send_timestamps: Vec::new(),
        };
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                state.process(notification).await;
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
        info!("Notifier started");
    }

    /// Close the queue and wait briefly for the worker to drain it. A
    /// worker that overruns the timeout is abandoned with a warning.
    pub async fn stop(&self) {
        self.tx.lock().unwrap().take();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("Notifier worker did not drain in time, abandoning");
            }
        }
        info!("Notifier stopped");
    }

    /// Enqueue without waiting. A full queue drops the notification with a
    /// warning rather than stalling the caller.
    pub fn enqueue(&self, notification: Notification) {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if tx.try_send(notification).is_err() {
            warn!("Notification queue full or closed, dropping");
        }
    }
}
