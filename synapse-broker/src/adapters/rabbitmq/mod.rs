//! RabbitMQ-style adapter for the subscriber and publisher contracts.
//!
//! AMQP acknowledges by delivery tag: a small integer that is only meaningful on
//! the channel that received the delivery. The subscriber hands callers an opaque
//! string ack id instead and keeps the id to tag mapping in a [`DeliveryTable`]
//! owned by the adapter. One subscriber owns one channel; run one subscriber per
//! consumer loop.

mod blocking;
mod channel;
mod delivery_table;
#[cfg(feature = "rabbitmq")]
mod lapin_channel;
mod publisher;
mod subscriber;

pub use blocking::{BlockingRabbitMqPublisher, BlockingRabbitMqSubscriber};
pub use channel::{AmqpChannel, ConsumeSession, DeliveryStream, PublishProperties, RawDelivery};
pub use delivery_table::DeliveryTable;
#[cfg(feature = "rabbitmq")]
pub use lapin_channel::LapinChannel;
pub use publisher::RabbitMqPublisher;
pub use subscriber::RabbitMqSubscriber;

/// AMQP `delivery-mode` value for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
