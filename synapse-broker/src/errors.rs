use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The channel that issued the delivery handles is gone; outstanding handles are void.
    #[error("channel closed")]
    ChannelClosed,
    /// The broker closed the channel after a channel-level error, which also voids its handles.
    #[error("channel closed by broker: {0}")]
    ChannelError(String),
    #[error("invalid topic reference '{0}'")]
    InvalidTopic(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl BrokerError {
    pub fn is_channel_closed(&self) -> bool {
        matches!(
            self,
            BrokerError::ChannelClosed | BrokerError::ChannelError(_)
        )
    }
}
