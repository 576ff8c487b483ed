use crate::application::execution::OrderManagementSystem;
use crate::application::risk::RiskValidator;
use crate::domain::events::{ControlCommand, ControlEvent, Event};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_ERROR_THRESHOLD: usize = 3;
const DEFAULT_ERROR_WINDOW_MINUTES: i64 = 5;

/// Control plane: pause/resume, kill switch, error-rate trigger and the
/// shutdown request flag the run loop polls.
pub struct ControlManager {
    bus: EventBus,
    oms: Arc<OrderManagementSystem>,
    validator: Arc<RiskValidator>,
    paused: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    error_timestamps: Mutex<Vec<DateTime<Utc>>>,
    error_threshold: usize,
    error_window_minutes: i64,
}

impl ControlManager {
    pub fn new(
        bus: EventBus,
        oms: Arc<OrderManagementSystem>,
        validator: Arc<RiskValidator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            oms,
            validator,
            paused: AtomicBool::new(false),
            shutdown_tx,
            error_timestamps: Mutex::new(Vec::new()),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            error_window_minutes: DEFAULT_ERROR_WINDOW_MINUTES,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.validator.kill_switch_active()
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolves when a shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Pause trading: new signals rejected, existing orders continue.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.oms.pause();
        self.bus.publish(Event::Control(ControlEvent {
            command: ControlCommand::Pause,
        }));
        warn!("Trading PAUSED");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.oms.resume();
        self.bus.publish(Event::Control(ControlEvent {
            command: ControlCommand::Resume,
        }));
        info!("Trading RESUMED");
    }

    /// Latch the kill switch, pause the OMS and request cancellation of all
    /// working orders. Returns the number of cancels requested.
    pub async fn activate_kill_switch(&self, reason: &str) -> usize {
        self.validator.activate_kill_switch();
        self.oms.pause();

        let canceled = self.oms.cancel_all_orders().await;

        self.bus.publish(Event::Control(ControlEvent {
            command: ControlCommand::Kill,
        }));
        error!(
            "KILL SWITCH ACTIVATED: {} (canceled {} orders)",
            reason, canceled
        );
        canceled
    }

    /// Manual intervention only; nothing deactivates the switch on its own.
    pub fn deactivate_kill_switch(&self) {
        self.validator.deactivate_kill_switch();
        warn!("Kill switch DEACTIVATED - manual intervention");
    }

    pub fn request_shutdown(&self, reason: &str) {
        self.shutdown_tx.send_replace(true);
        self.bus.publish(Event::Control(ControlEvent {
            command: ControlCommand::Shutdown,
        }));
        warn!("SHUTDOWN REQUESTED: {}", reason);
    }

    /// Record an error occurrence. Returns true once the rolling-window
    /// count reaches the threshold; the caller then invokes
    /// `handle_repeated_errors`.
    pub fn record_error(&self) -> bool {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(self.error_window_minutes);
        let mut timestamps = self.error_timestamps.lock().unwrap();
        timestamps.push(now);
        timestamps.retain(|t| *t > cutoff);

        if timestamps.len() >= self.error_threshold {
            error!(
                "Error threshold exceeded: {} errors in {} minutes",
                timestamps.len(),
                self.error_window_minutes
            );
            return true;
        }
        false
    }

    pub async fn handle_repeated_errors(&self) {
        let count = self.error_timestamps.lock().unwrap().len();
        self.activate_kill_switch(&format!(
            "Repeated errors: {count} in {} min",
            self.error_window_minutes
        ))
        .await;
    }

    pub fn reset_error_count(&self) {
        self.error_timestamps.lock().unwrap().clear();
    }

    pub fn recent_error_count(&self) -> usize {
        self.error_timestamps.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::infrastructure::mock::MockBroker;
    use crate::infrastructure::persistence::{Database, Repository};
    use crate::domain::ports::Broker;

    async fn setup() -> ControlManager {
        let broker = Arc::new(MockBroker::new());
        broker.connect().await.unwrap();
        let repo = Repository::new(Database::connect_in_memory().await.unwrap());
        let bus = EventBus::new();
        bus.start().await;
        let oms = Arc::new(OrderManagementSystem::new(broker, repo, bus.clone()));
        let validator = Arc::new(RiskValidator::new(RiskConfig::default()));
        ControlManager::new(bus, oms, validator)
    }

    #[tokio::test]
    async fn test_pause_resume_propagates_to_oms() {
        let control = setup().await;
        assert!(!control.is_paused());

        control.pause();
        assert!(control.is_paused());
        assert!(control.oms.is_paused());

        control.resume();
        assert!(!control.is_paused());
        assert!(!control.oms.is_paused());
    }

    #[tokio::test]
    async fn test_kill_switch_latches_and_pauses() {
        let control = setup().await;
        control.activate_kill_switch("test").await;

        assert!(control.is_kill_switch_active());
        assert!(control.oms.is_paused());

        control.deactivate_kill_switch();
        assert!(!control.is_kill_switch_active());
    }

    #[tokio::test]
    async fn test_error_threshold_fires_at_three() {
        let control = setup().await;
        assert!(!control.record_error());
        assert!(!control.record_error());
        assert!(control.record_error());
        assert_eq!(control.recent_error_count(), 3);

        control.reset_error_count();
        assert_eq!(control.recent_error_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_errors_trip_kill_switch() {
        let control = setup().await;
        for _ in 0..3 {
            control.record_error();
        }
        control.handle_repeated_errors().await;
        assert!(control.is_kill_switch_active());
    }

    #[tokio::test]
    async fn test_shutdown_request_wakes_waiter() {
        let control = Arc::new(setup().await);
        assert!(!control.shutdown_requested());

        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.wait_for_shutdown().await })
        };
        control.request_shutdown("test");
        waiter.await.unwrap();
        assert!(control.shutdown_requested());
    }
}
