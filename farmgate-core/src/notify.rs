use async_trait::async_trait;
use farmgate_shared::SettlementEvent;
use std::sync::{Arc, Mutex};

/// Downstream sink for committed settlement events (email/SMS fan-out,
/// vendor payout jobs). Called after commit; failures never undo the write.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes events to the log only
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            event = event.name(),
            order_id = %event.order_id(),
            "Settlement event"
        );
        Ok(())
    }
}

/// Keeps every published event in memory, for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<SettlementEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SettlementEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events
            .lock()
            .map_err(|_| "recording notifier poisoned")?
            .push(event.clone());
        Ok(())
    }
}
