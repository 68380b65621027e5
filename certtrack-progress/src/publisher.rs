//! Completion event publishing

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use certtrack_common::events::{CompletionEvent, EventBus};

use crate::error::Result;

/// Downstream sink for completion events
#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    async fn publish(&self, event: CompletionEvent) -> Result<()>;
}

/// Publishes onto the in-process [`EventBus`]
pub struct EventBusPublisher {
    bus: Arc<EventBus>,
}

impl EventBusPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl CompletionPublisher for EventBusPublisher {
    async fn publish(&self, event: CompletionEvent) -> Result<()> {
        let id = event.id;
        match self.bus.emit(event) {
            Ok(receivers) => debug!(event_id = %id, receivers, "Completion event emitted"),
            // Nobody listening is not a failure
            Err(_) => debug!(event_id = %id, "Completion event emitted with no subscribers"),
        }
        Ok(())
    }
}
