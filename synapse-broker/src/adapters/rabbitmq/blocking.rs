use std::time::Duration;

use synapse_models::{AcknowledgeRequest, Attributes, PublishResult, PullRequest, PullResponse};
use tokio::runtime::{Builder, Runtime};

use super::{AmqpChannel, RabbitMqPublisher, RabbitMqSubscriber};
use crate::{AsyncPublisher, AsyncSubscriber, BrokerError, Publisher, Subscriber};

fn current_thread_runtime() -> Result<Runtime, BrokerError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| BrokerError::Runtime(err.to_string()))
}

/// Blocking wrapper around [`RabbitMqSubscriber`].
///
/// Owns a current-thread runtime and drives every call to completion on the calling
/// thread. Do not call it from inside another tokio runtime.
pub struct BlockingRabbitMqSubscriber<C> {
    runtime: Runtime,
    inner: RabbitMqSubscriber<C>,
}

impl<C> BlockingRabbitMqSubscriber<C>
where
    C: AmqpChannel,
{
    pub fn new(channel: C) -> Result<Self, BrokerError> {
        Self::from_async(RabbitMqSubscriber::new(channel))
    }

    pub fn from_async(inner: RabbitMqSubscriber<C>) -> Result<Self, BrokerError> {
        Ok(Self {
            runtime: current_thread_runtime()?,
            inner,
        })
    }

    pub fn nack(&self, request: &AcknowledgeRequest, requeue: bool) -> Result<(), BrokerError> {
        self.runtime.block_on(self.inner.nack(request, requeue))
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    pub fn inner(&self) -> &RabbitMqSubscriber<C> {
        &self.inner
    }
}

impl<C> Subscriber for BlockingRabbitMqSubscriber<C>
where
    C: AmqpChannel,
{
    fn pull(&self, request: &PullRequest, timeout: Duration) -> Result<PullResponse, BrokerError> {
        self.runtime.block_on(self.inner.pull(request, timeout))
    }

    fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<(), BrokerError> {
        self.runtime.block_on(self.inner.acknowledge(request))
    }
}

/// Blocking wrapper around [`RabbitMqPublisher`].
pub struct BlockingRabbitMqPublisher<C> {
    runtime: Runtime,
    inner: RabbitMqPublisher<C>,
}

impl<C> BlockingRabbitMqPublisher<C>
where
    C: AmqpChannel,
{
    pub fn new(channel: C) -> Result<Self, BrokerError> {
        Ok(Self {
            runtime: current_thread_runtime()?,
            inner: RabbitMqPublisher::new(channel),
        })
    }
}

impl<C> Publisher for BlockingRabbitMqPublisher<C>
where
    C: AmqpChannel,
{
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: Option<&Attributes>,
    ) -> Result<PublishResult, BrokerError> {
        self.runtime
            .block_on(self.inner.publish(topic, payload, attributes))
    }
}
