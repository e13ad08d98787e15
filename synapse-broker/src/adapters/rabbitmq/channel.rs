use async_trait::async_trait;
use futures_util::stream::BoxStream;
use synapse_models::Attributes;

use crate::BrokerError;

/// A delivery as the broker hands it to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub headers: Attributes,
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, Result<RawDelivery, BrokerError>>;

/// An open `basic.consume` on a channel. Must be cancelled with
/// [`AmqpChannel::basic_cancel`] before the channel is used for another consume.
pub struct ConsumeSession {
    pub consumer_tag: String,
    pub deliveries: DeliveryStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub persistent: bool,
    pub headers: Attributes,
}

/// The subset of AMQP channel methods the adapter relies on.
///
/// Implementations return [`BrokerError::ChannelClosed`] once the channel is unusable so
/// the adapter knows every delivery tag it holds has become void.
#[async_trait]
pub trait AmqpChannel: Send + Sync + 'static {
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries per consumer started after this call. Zero means no limit.
    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    async fn basic_consume(&self, queue: &str) -> Result<ConsumeSession, BrokerError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}
