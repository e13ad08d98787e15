use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use synapse_models::Attributes;

use super::{AmqpChannel, ConsumeSession, PublishProperties, RawDelivery, PERSISTENT_DELIVERY_MODE};
use crate::BrokerError;

/// [`AmqpChannel`] backed by a `lapin` channel on a live RabbitMQ connection.
pub struct LapinChannel {
    channel: Channel,
}

impl LapinChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Connect with lapin's I/O running on the current tokio runtime.
    pub async fn connect(uri: &str) -> Result<Connection, BrokerError> {
        Connection::connect(uri, connection_properties())
            .await
            .map_err(transport_error)
    }

    pub async fn open(connection: &Connection) -> Result<Self, BrokerError> {
        connection
            .create_channel()
            .await
            .map(Self::new)
            .map_err(transport_error)
    }
}

fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

fn transport_error(err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed
        }
        lapin::Error::ProtocolError(err) => BrokerError::ChannelError(err.to_string()),
        other => BrokerError::Transport(other.to_string()),
    }
}

fn headers_table(headers: Attributes) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            ShortString::from(key),
            AMQPValue::LongString(LongString::from(value)),
        );
    }
    table
}

fn headers_map(properties: &BasicProperties) -> Attributes {
    let mut headers = Attributes::new();
    if let Some(table) = properties.headers() {
        for (key, value) in table.inner() {
            let text = match value {
                AMQPValue::LongString(value) => value.to_string(),
                AMQPValue::ShortString(value) => value.as_str().to_string(),
                _ => continue,
            };
            headers.insert(key.as_str().to_string(), text);
        }
    }
    headers
}

fn raw_delivery(delivery: Delivery) -> RawDelivery {
    RawDelivery {
        delivery_tag: delivery.delivery_tag,
        headers: headers_map(&delivery.properties),
        redelivered: delivery.redelivered,
        body: delivery.data,
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        let mut amqp_properties = BasicProperties::default();
        if properties.persistent {
            amqp_properties = amqp_properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }
        if !properties.headers.is_empty() {
            amqp_properties = amqp_properties.with_headers(headers_table(properties.headers));
        }

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                amqp_properties,
            )
            .await
            .map_err(transport_error)?
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(transport_error)
    }

    async fn basic_consume(&self, queue: &str) -> Result<ConsumeSession, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;
        let consumer_tag = consumer.tag().as_str().to_string();
        let deliveries = consumer
            .map(|result| result.map(raw_delivery).map_err(transport_error))
            .boxed();

        Ok(ConsumeSession {
            consumer_tag,
            deliveries,
        })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(transport_error)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(transport_error)
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await
            .map_err(transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connections_use_the_tokio_runtime() {
        let properties = connection_properties();
        assert!(properties.executor.is_some());
        assert!(properties.reactor.is_some());
    }

    #[test]
    fn closed_states_map_to_channel_closed() {
        let err = transport_error(lapin::Error::InvalidChannelState(
            lapin::ChannelState::Closed,
        ));
        assert!(matches!(err, BrokerError::ChannelClosed));
    }

    #[test]
    fn headers_round_trip_as_strings() {
        let attributes = Attributes::from([("origin".to_string(), "billing".to_string())]);
        let properties =
            BasicProperties::default().with_headers(headers_table(attributes.clone()));
        assert_eq!(headers_map(&properties), attributes);
    }
}
