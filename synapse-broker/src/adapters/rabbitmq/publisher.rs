use async_trait::async_trait;
use log::debug;
use synapse_models::{Attributes, PublishResult};

use super::{AmqpChannel, PublishProperties};
use crate::{AsyncPublisher, BrokerError, TopicRef};

/// Publishes persistent messages on one AMQP channel.
///
/// Topics are either a queue name (default exchange) or `exchange:routing_key`.
/// `basic.publish` assigns no message id, so results are always unassigned.
pub struct RabbitMqPublisher<C> {
    channel: C,
}

impl<C> RabbitMqPublisher<C>
where
    C: AmqpChannel,
{
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

#[async_trait]
impl<C> AsyncPublisher for RabbitMqPublisher<C>
where
    C: AmqpChannel,
{
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: Option<&Attributes>,
    ) -> Result<PublishResult, BrokerError> {
        let topic = TopicRef::parse(topic)?;
        let properties = PublishProperties {
            persistent: true,
            headers: attributes.cloned().unwrap_or_default(),
        };

        debug!(
            "Publishing {} byte(s) to exchange '{}' with routing key '{}'",
            payload.len(),
            topic.exchange(),
            topic.routing_key()
        );
        self.channel
            .basic_publish(topic.exchange(), topic.routing_key(), payload, properties)
            .await?;

        Ok(PublishResult::unassigned())
    }
}
