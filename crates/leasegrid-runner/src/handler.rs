//! Handler contract for queue-bound runners.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use crate::restart::RestartRequested;

/// Delivery metadata handed to a handler next to the decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub message_id: String,
    /// 1 on first delivery.
    pub dequeue_count: u32,
    /// Unix ms at which the lease runs out and the message resurfaces.
    pub leased_until_ms: u64,
}

/// How a handler invocation went wrong.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Leave the message alone; it resurfaces when the lease expires and is
    /// quarantined once it has failed on every allowed delivery.
    #[error("handler failed: {0:#}")]
    Failed(#[from] anyhow::Error),

    /// Give the message back to the queue right away.
    #[error("handler abandoned message: {0}")]
    Abandon(String),

    /// Stop dispatching and restart the process.
    #[error(transparent)]
    Restart(#[from] RestartRequested),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(anyhow::Error::msg(message.into()))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Processes one decoded message.
///
/// Returning `Ok` deletes the message. Handlers must be idempotent: a
/// message can be delivered again after a crash or an expired lease.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    async fn handle(&self, message: T, delivery: Delivery) -> HandlerResult;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: T, delivery: Delivery) -> HandlerResult {
        (self)(message, delivery).await
    }
}
