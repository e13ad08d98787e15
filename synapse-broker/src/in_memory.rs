//! In-process AMQP broker for tests and single-process deployments.
//!
//! Models the parts of AMQP the RabbitMQ adapter depends on: the default exchange,
//! direct exchanges with bindings, channel-scoped delivery tags starting at 1,
//! requeue on `basic.nack` and on channel close, and a channel error when a
//! delivery tag is acknowledged that the channel does not know.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use log::debug;
use parking_lot::Mutex;
use synapse_models::Attributes;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::adapters::rabbitmq::{
    AmqpChannel, ConsumeSession, DeliveryStream, PublishProperties, RawDelivery,
};
use crate::BrokerError;

#[derive(Debug, Clone)]
struct StoredMessage {
    // Publish order; a requeued message goes back to this position.
    sequence: u64,
    body: Vec<u8>,
    headers: Attributes,
    persistent: bool,
    redelivered: bool,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    // exchange -> routing key -> bound queues
    bindings: HashMap<String, HashMap<String, Vec<String>>>,
    last_sequence: u64,
}

impl BrokerState {
    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let bindings = self
            .bindings
            .get(exchange)
            .ok_or_else(|| not_found("exchange", exchange))?;
        Ok(bindings.get(routing_key).cloned().unwrap_or_default())
    }

    fn requeue(&mut self, queue: &str, mut message: StoredMessage) {
        message.redelivered = true;
        if let Some(messages) = self.queues.get_mut(queue) {
            let position = messages
                .iter()
                .position(|queued| queued.sequence > message.sequence)
                .unwrap_or(messages.len());
            messages.insert(position, message);
        }
    }
}

/// Shared broker state. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryAmqp {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryAmqp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue. Declaring an existing queue leaves its contents untouched.
    pub fn declare_queue(&self, name: &str) {
        self.state.lock().queues.entry(name.to_string()).or_default();
    }

    /// Declare a direct exchange.
    pub fn declare_exchange(&self, name: &str) {
        self.state.lock().bindings.entry(name.to_string()).or_default();
    }

    pub fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(not_found("queue", queue));
        }
        let bound = state
            .bindings
            .get_mut(exchange)
            .ok_or_else(|| not_found("exchange", exchange))?
            .entry(routing_key.to_string())
            .or_default();
        if !bound.iter().any(|existing| existing == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    pub fn delete_queue(&self, name: &str) -> usize {
        let mut state = self.state.lock();
        for keys in state.bindings.values_mut() {
            for queues in keys.values_mut() {
                queues.retain(|queue| queue != name);
            }
        }
        let removed = state
            .queues
            .remove(name)
            .map(|messages| messages.len())
            .unwrap_or(0);
        drop(state);
        self.notify.notify_waiters();
        removed
    }

    /// Messages ready for delivery, excluding those delivered and not yet acknowledged.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Whether the message at the head of `queue` was published as persistent.
    pub fn head_is_persistent(&self, queue: &str) -> Option<bool> {
        self.state
            .lock()
            .queues
            .get(queue)
            .and_then(|messages| messages.front())
            .map(|message| message.persistent)
    }

    pub fn open_channel(&self) -> InMemoryChannel {
        InMemoryChannel {
            inner: Arc::new(ChannelInner {
                broker: self.clone(),
                state: Mutex::new(ChannelState::default()),
            }),
        }
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mut message: StoredMessage,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let targets = state.route(exchange, routing_key)?;
        state.last_sequence += 1;
        message.sequence = state.last_sequence;
        if targets.is_empty() {
            debug!("Dropping unroutable message for exchange '{exchange}' key '{routing_key}'");
        }
        for queue in targets {
            if let Some(messages) = state.queues.get_mut(&queue) {
                messages.push_back(message.clone());
            }
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

fn not_found(kind: &str, name: &str) -> BrokerError {
    BrokerError::Transport(format!("NOT_FOUND - no {kind} '{name}'"))
}

struct Unacked {
    queue: String,
    message: StoredMessage,
}

#[derive(Default)]
struct ChannelState {
    last_delivery_tag: u64,
    prefetch: u16,
    consumers: HashSet<String>,
    unacked: HashMap<u64, Unacked>,
    closed: bool,
}

struct ChannelInner {
    broker: InMemoryAmqp,
    state: Mutex<ChannelState>,
}

enum Step {
    Delivered(RawDelivery),
    Idle,
    Finished,
}

impl ChannelInner {
    fn next_delivery(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
        delivered: usize,
    ) -> Step {
        let mut channel = self.state.lock();
        if channel.closed || !channel.consumers.contains(consumer_tag) {
            return Step::Finished;
        }
        if prefetch > 0 && delivered >= usize::from(prefetch) {
            return Step::Idle;
        }

        let mut broker = self.broker.state.lock();
        let Some(messages) = broker.queues.get_mut(queue) else {
            return Step::Finished;
        };
        let Some(message) = messages.pop_front() else {
            return Step::Idle;
        };
        drop(broker);

        channel.last_delivery_tag += 1;
        let delivery_tag = channel.last_delivery_tag;
        let delivery = RawDelivery {
            delivery_tag,
            body: message.body.clone(),
            headers: message.headers.clone(),
            redelivered: message.redelivered,
        };
        channel.unacked.insert(
            delivery_tag,
            Unacked {
                queue: queue.to_string(),
                message,
            },
        );
        Step::Delivered(delivery)
    }

    /// Close the channel and return every unacknowledged delivery to its queue.
    fn shut_down(&self) {
        let released: Vec<Unacked> = {
            let mut channel = self.state.lock();
            if channel.closed {
                return;
            }
            channel.closed = true;
            channel.consumers.clear();
            channel.unacked.drain().map(|(_, unacked)| unacked).collect()
        };

        if !released.is_empty() {
            debug!(
                "Channel closed with {} unacknowledged delivery(ies); requeueing",
                released.len()
            );
            let mut broker = self.broker.state.lock();
            for unacked in released {
                broker.requeue(&unacked.queue, unacked.message);
            }
        }
        self.broker.notify.notify_waiters();
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.state.lock().closed {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    /// AMQP closes the channel on an unknown delivery tag; mirror that.
    fn take_unacked(&self, delivery_tag: u64) -> Result<Unacked, BrokerError> {
        let taken = {
            let mut channel = self.state.lock();
            if channel.closed {
                return Err(BrokerError::ChannelClosed);
            }
            channel.unacked.remove(&delivery_tag)
        };
        match taken {
            Some(unacked) => Ok(unacked),
            None => {
                self.shut_down();
                Err(BrokerError::ChannelError(format!(
                    "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
                )))
            }
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.shut_down();
    }
}

/// One channel on an [`InMemoryAmqp`] broker. Dropping the last handle closes it.
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<ChannelInner>,
}

impl InMemoryChannel {
    /// Close the channel as a lost connection would: unacknowledged deliveries are requeued.
    pub fn close(&self) {
        self.inner.shut_down();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn unacked_count(&self) -> usize {
        self.inner.state.lock().unacked.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.state.lock().consumers.len()
    }

    fn deliveries(&self, queue: String, consumer_tag: String, prefetch: u16) -> DeliveryStream {
        let inner = Arc::clone(&self.inner);
        stream::unfold((inner, 0usize), move |(inner, delivered)| {
            let queue = queue.clone();
            let consumer_tag = consumer_tag.clone();
            async move {
                loop {
                    let notify = Arc::clone(&inner.broker.notify);
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match inner.next_delivery(&queue, &consumer_tag, prefetch, delivered) {
                        Step::Delivered(delivery) => {
                            return Some((Ok::<_, BrokerError>(delivery), (inner, delivered + 1)));
                        }
                        Step::Finished => return None,
                        Step::Idle => notified.await,
                    }
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl AmqpChannel for InMemoryChannel {
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        self.inner.ensure_open()?;
        self.inner.broker.publish(
            exchange,
            routing_key,
            StoredMessage {
                sequence: 0,
                body: body.to_vec(),
                headers: properties.headers,
                persistent: properties.persistent,
                redelivered: false,
            },
        )
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        let mut channel = self.inner.state.lock();
        if channel.closed {
            return Err(BrokerError::ChannelClosed);
        }
        channel.prefetch = prefetch_count;
        Ok(())
    }

    async fn basic_consume(&self, queue: &str) -> Result<ConsumeSession, BrokerError> {
        if !self.inner.broker.state.lock().queues.contains_key(queue) {
            return Err(not_found("queue", queue));
        }

        let consumer_tag = format!("ctag-{}", Uuid::new_v4());
        let prefetch = {
            let mut channel = self.inner.state.lock();
            if channel.closed {
                return Err(BrokerError::ChannelClosed);
            }
            channel.consumers.insert(consumer_tag.clone());
            channel.prefetch
        };

        Ok(ConsumeSession {
            deliveries: self.deliveries(queue.to_string(), consumer_tag.clone(), prefetch),
            consumer_tag,
        })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        {
            let mut channel = self.inner.state.lock();
            if channel.closed {
                return Err(BrokerError::ChannelClosed);
            }
            channel.consumers.remove(consumer_tag);
        }
        self.inner.broker.notify.notify_waiters();
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner.take_unacked(delivery_tag).map(|_| ())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let unacked = self.inner.take_unacked(delivery_tag)?;
        if requeue {
            self.inner
                .broker
                .state
                .lock()
                .requeue(&unacked.queue, unacked.message);
            self.inner.broker.notify.notify_waiters();
        }
        Ok(())
    }
}
