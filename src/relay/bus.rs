//! In-process event bus fed by the outbox poller.
//!
//! Handlers must be idempotent: delivery is at-least-once, and a handler
//! that fails mid-batch will see the same event again on the next poll.

use crate::domain::DomainEvent;
use crate::service::ClosureService;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler name for logs and failure records.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Fans one event out to every registered handler, in registration order.
/// The first handler failure aborts the fan-out; the poller retries the
/// whole message later.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        for handler in &self.handlers {
            handler
                .handle(event)
                .await
                .map_err(|e| e.context(format!("handler {}", handler.name())))?;
            debug!(handler = handler.name(), event = event.event_type(), "event handled");
        }
        Ok(())
    }
}

/// Moves a batch's closure settlement to PENDING when the final tranche has
/// been emptied. Safe to replay: activation is a no-op past INACTIVE.
pub struct ClosureActivationHandler {
    closure: Arc<ClosureService>,
}

impl ClosureActivationHandler {
    pub fn new(closure: Arc<ClosureService>) -> Self {
        Self { closure }
    }
}

#[async_trait]
impl EventHandler for ClosureActivationHandler {
    fn name(&self) -> &'static str {
        "closure_activation"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        if let DomainEvent::ClosureActivationRequested { batch_id, .. } = event {
            self.closure.activate_for_batch(*batch_id).await?;
        }
        Ok(())
    }
}

/// Captures every published event; used by tests asserting relay behavior.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyHandler {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _event: &DomainEvent) -> anyhow::Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(anyhow!("transient failure"));
            }
            Ok(())
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::BatchActivated {
            batch_id: 1,
            agent_id: 7,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_handlers() {
        let recorder_a = Arc::new(RecordingHandler::new());
        let recorder_b = Arc::new(RecordingHandler::new());
        let mut bus = EventBus::new();
        bus.register(recorder_a.clone());
        bus.register(recorder_b.clone());

        bus.publish(&sample_event()).await.unwrap();
        assert_eq!(recorder_a.events().len(), 1);
        assert_eq!(recorder_b.events().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_aborts_fanout() {
        let flaky = Arc::new(FlakyHandler {
            failures_left: AtomicUsize::new(1),
        });
        let recorder = Arc::new(RecordingHandler::new());
        let mut bus = EventBus::new();
        bus.register(flaky);
        bus.register(recorder.clone());

        assert!(bus.publish(&sample_event()).await.is_err());
        assert!(recorder.events().is_empty());

        // retry succeeds once the transient failure clears
        bus.publish(&sample_event()).await.unwrap();
        assert_eq!(recorder.events().len(), 1);
    }
}
