// Inbound reply relay
//
// One forward per received message, in receive-loop order, bounded by a
// timeout. Failures stop here: they are logged and the loop moves on.

use crate::backend::BackendClient;
use crate::channel::InboundMessage;
use crate::error::RelayError;
use crate::session::InboundHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A received message as forwarded to the decision webhook.
///
/// Fields are fixed at construction.
#[derive(Debug, Clone, Serialize)]
pub struct InboundEvent {
    #[serde(skip)]
    id: Uuid,
    from: String,
    body: String,
    timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            from: from.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    /// Receipt id for log correlation (not sent to the backend)
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &str {
        &self.from
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl From<InboundMessage> for InboundEvent {
    fn from(message: InboundMessage) -> Self {
        InboundEvent::new(message.from, message.body)
    }
}

pub struct InboundRelay {
    backend: BackendClient,
    timeout: Duration,
}

impl InboundRelay {
    pub fn new(backend: BackendClient, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Forward one event to the decision webhook within the timeout
    pub async fn forward(&self, event: &InboundEvent) -> Result<(), RelayError> {
        match tokio::time::timeout(self.timeout, self.backend.post_decision(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::ForwardFailure(format!("{:#}", e))),
            Err(_) => Err(RelayError::ForwardFailure(format!(
                "decision webhook did not answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl InboundHandler for InboundRelay {
    async fn handle(&self, message: InboundMessage) {
        let event = InboundEvent::from(message);
        match self.forward(&event).await {
            Ok(()) => debug!(receipt = %event.id(), from = %event.sender(), "Reply forwarded"),
            Err(e) => warn!(
                receipt = %event.id(),
                from = %event.sender(),
                error = %e,
                "Reply dropped"
            ),
        }
    }
}
