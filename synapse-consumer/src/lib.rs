//! Transport-agnostic consumer loops.
//!
//! A consumer pulls one message at a time from a subscription, decodes the payload as
//! JSON, validates it against a [`PayloadSchema`], hands the result to a handler and
//! acknowledges the message once the handler returns. Any failure other than an idle
//! pull stops the iteration and is returned to the caller with the message left
//! unacknowledged; redelivery is up to the transport.

mod async_consumer;
mod blocking_consumer;
mod errors;
mod handler;
mod lifecycle;
pub mod schema;

pub use async_consumer::AsyncMessageConsumer;
pub use blocking_consumer::MessageConsumer;
pub use errors::ConsumerError;
pub use handler::{AsyncMessageHandler, HandlerError, MessageHandler};
pub use lifecycle::{Iteration, StopHandle};
pub use schema::{FieldKind, JsonModel, ObjectSchema, PayloadSchema, ValidationError};

use std::time::Duration;

/// Pull timeout used when none is configured.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn decode_payload<P>(
    schema: &P,
    ack_id: &str,
    data: &[u8],
) -> Result<P::Output, ConsumerError>
where
    P: PayloadSchema,
{
    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(|source| ConsumerError::Decode {
            ack_id: ack_id.to_string(),
            source,
        })?;
    schema
        .validate(value)
        .map_err(|source| ConsumerError::Validation {
            ack_id: ack_id.to_string(),
            source,
        })
}
