use async_trait::async_trait;
use synapse_models::SendableError;

pub type HandlerError = SendableError;

/// Receives validated requests on the consumer's thread.
///
/// Handlers own their error policy. Returning `Err` leaves the message unacknowledged
/// and stops the consumer iteration, so most handlers publish an error result and
/// return `Ok` instead.
pub trait MessageHandler<T>: Send + Sync {
    fn handle(&self, request: T) -> Result<(), HandlerError>;
}

impl<T, F> MessageHandler<T> for F
where
    F: Fn(T) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, request: T) -> Result<(), HandlerError> {
        self(request)
    }
}

/// Suspend-capable counterpart of [`MessageHandler`].
#[async_trait]
pub trait AsyncMessageHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn handle(&self, request: T) -> Result<(), HandlerError>;
}
