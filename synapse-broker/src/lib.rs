pub mod adapters;
mod errors;
pub mod in_memory;
mod topic;

pub use errors::BrokerError;
pub use topic::TopicRef;

use std::time::Duration;

use async_trait::async_trait;
use synapse_models::{AcknowledgeRequest, Attributes, PublishResult, PullRequest, PullResponse};

/// Blocking pull/acknowledge contract. Every call runs to completion on the calling thread.
pub trait Subscriber: Send + Sync {
    /// Pull at most `request.max_messages` messages, waiting roughly `timeout` when none are
    /// ready. Nothing arriving is an empty response, not an error.
    fn pull(&self, request: &PullRequest, timeout: Duration) -> Result<PullResponse, BrokerError>;

    /// Acknowledge previously pulled messages. Unknown ids are ignored.
    fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<(), BrokerError>;
}

/// Blocking publish contract. Payload bytes are delivered unmodified.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: Option<&Attributes>,
    ) -> Result<PublishResult, BrokerError>;
}

/// Suspend-capable counterpart of [`Subscriber`].
#[async_trait]
pub trait AsyncSubscriber: Send + Sync {
    async fn pull(
        &self,
        request: &PullRequest,
        timeout: Duration,
    ) -> Result<PullResponse, BrokerError>;

    async fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<(), BrokerError>;
}

/// Suspend-capable counterpart of [`Publisher`].
#[async_trait]
pub trait AsyncPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: Option<&Attributes>,
    ) -> Result<PublishResult, BrokerError>;
}

pub(crate) fn validate_pull(request: &PullRequest) -> Result<(), BrokerError> {
    if request.max_messages == 0 {
        return Err(BrokerError::InvalidRequest(format!(
            "max_messages must be at least 1 for subscription '{}'",
            request.subscription
        )));
    }
    Ok(())
}
