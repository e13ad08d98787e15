use synapse_broker::BrokerError;
use thiserror::Error;

use crate::{HandlerError, ValidationError};

/// Failure of one consumer iteration. The message involved, if any, stays unacknowledged.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("transport error: {0}")]
    Transport(#[from] BrokerError),

    #[error("message {ack_id} is not valid JSON: {source}")]
    Decode {
        ack_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message {ack_id} failed validation: {source}")]
    Validation {
        ack_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("handler failed for message {ack_id}: {source}")]
    Handler {
        ack_id: String,
        #[source]
        source: HandlerError,
    },
}

impl ConsumerError {
    /// Ack id of the message that caused the failure, so a supervisor can reject it.
    pub fn ack_id(&self) -> Option<&str> {
        match self {
            ConsumerError::Transport(_) => None,
            ConsumerError::Decode { ack_id, .. }
            | ConsumerError::Validation { ack_id, .. }
            | ConsumerError::Handler { ack_id, .. } => Some(ack_id),
        }
    }
}
