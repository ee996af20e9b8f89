//! In-memory transporter for testing

use crate::attachments;
use crate::error::{EmailError, EmailResult};
use crate::models::OutboundMessage;
use crate::transporter::{SendResult, Transporter};
use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Error returned by a failing [`MemoryTransporter`]
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MemoryTransportError(pub String);

/// Transporter that records messages instead of sending them
///
/// Attachments are still materialized, so unreadable files fail the send the
/// same way they would with a real provider. Clones share the same outbox.
#[derive(Clone, Default)]
pub struct MemoryTransporter {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    failure_message: Option<String>,
}

impl MemoryTransporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transporter whose sends always fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Arc::default(),
            failure_message: Some(message.into()),
        }
    }

    /// All recorded messages, oldest first
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }

    /// Check if any recorded message lists `address` as a `to` recipient
    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent
            .lock()
            .await
            .iter()
            .any(|m| m.to.iter().any(|to| to == address))
    }
}

#[async_trait]
impl Transporter for MemoryTransporter {
    async fn send(&self, message: OutboundMessage) -> EmailResult<SendResult> {
        attachments::resolve_all(&message.attachments).await?;

        if let Some(failure) = &self.failure_message {
            return Err(EmailError::Provider(Box::new(MemoryTransportError(
                failure.clone(),
            ))));
        }

        let mut sent = self.sent.lock().await;
        sent.push(message);
        let id = format!("memory-{}", sent.len());

        Ok(SendResult::from_response(json!({ "id": id }), "id"))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
