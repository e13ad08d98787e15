use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use log::{debug, warn};
use synapse_models::{AcknowledgeRequest, Message, PullRequest, PullResponse, ReceivedMessage};

use super::{AmqpChannel, ConsumeSession, DeliveryStream, DeliveryTable, RawDelivery};
use crate::{validate_pull, AsyncSubscriber, BrokerError};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pulls from a queue on one AMQP channel and correlates ack ids with delivery tags.
pub struct RabbitMqSubscriber<C> {
    channel: C,
    pending: DeliveryTable,
    drain_timeout: Duration,
}

impl<C> RabbitMqSubscriber<C>
where
    C: AmqpChannel,
{
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            pending: DeliveryTable::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// How long to wait for a cancelled consumer stream to finish after `basic.cancel`.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Number of pulled deliveries awaiting acknowledge or nack.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, ack_id: &str) -> bool {
        self.pending.contains(ack_id)
    }

    /// Reject pulled messages. With `requeue` the broker makes them available again.
    /// Unknown ids are ignored, exactly like [`AsyncSubscriber::acknowledge`].
    pub async fn nack(
        &self,
        request: &AcknowledgeRequest,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        for ack_id in &request.ack_ids {
            let Some(delivery_tag) = self.pending.take(ack_id) else {
                debug!("Ignoring nack for unknown ack id {ack_id}");
                continue;
            };
            debug!(
                "Rejecting delivery {delivery_tag} from {} (requeue: {requeue})",
                request.subscription
            );
            self.guard(self.channel.basic_nack(delivery_tag, requeue).await)?;
        }
        Ok(())
    }

    /// Drops every correlation entry when the channel reports it is closed.
    fn guard<T>(&self, result: Result<T, BrokerError>) -> Result<T, BrokerError> {
        if result.as_ref().is_err_and(BrokerError::is_channel_closed) {
            let dropped = self.pending.clear();
            if dropped > 0 {
                warn!("Channel closed; discarded {dropped} unacknowledged delivery handle(s)");
            }
        }
        result
    }

    async fn collect(
        deliveries: &mut DeliveryStream,
        max_messages: usize,
        timeout: Duration,
    ) -> (Vec<RawDelivery>, Option<BrokerError>) {
        let mut taken = Vec::new();

        let first = match tokio::time::timeout(timeout, deliveries.next()).await {
            Err(_) | Ok(None) => return (taken, None),
            Ok(Some(Err(err))) => return (taken, Some(err)),
            Ok(Some(Ok(delivery))) => delivery,
        };
        taken.push(first);

        // Only take what is already buffered; the wait bound applies to the first delivery.
        while taken.len() < max_messages {
            match deliveries.next().now_or_never() {
                Some(Some(Ok(delivery))) => taken.push(delivery),
                Some(Some(Err(err))) => return (taken, Some(err)),
                Some(None) | None => break,
            }
        }

        (taken, None)
    }

    /// Consume whatever the cancelled stream still yields and hand it back to the queue.
    async fn drain(&self, mut deliveries: DeliveryStream) -> Result<(), BrokerError> {
        loop {
            match tokio::time::timeout(self.drain_timeout, deliveries.next()).await {
                Ok(Some(Ok(delivery))) => {
                    warn!(
                        "Requeueing delivery {} received after consumer cancel",
                        delivery.delivery_tag
                    );
                    self.guard(self.channel.basic_nack(delivery.delivery_tag, true).await)?;
                }
                Ok(Some(Err(err))) => return self.guard(Err(err)),
                Ok(None) => return Ok(()),
                Err(_) => {
                    warn!(
                        "Consumer stream still open {:?} after cancel",
                        self.drain_timeout
                    );
                    return Ok(());
                }
            }
        }
    }

    async fn requeue_all(&self, deliveries: &[RawDelivery]) {
        for delivery in deliveries {
            if let Err(err) = self
                .guard(self.channel.basic_nack(delivery.delivery_tag, true).await)
            {
                warn!(
                    "Failed to requeue delivery {} after pull error: {err}",
                    delivery.delivery_tag
                );
            }
        }
    }
}

#[async_trait]
impl<C> AsyncSubscriber for RabbitMqSubscriber<C>
where
    C: AmqpChannel,
{
    async fn pull(
        &self,
        request: &PullRequest,
        timeout: Duration,
    ) -> Result<PullResponse, BrokerError> {
        validate_pull(request)?;

        let prefetch = u16::try_from(request.max_messages).unwrap_or(u16::MAX);
        self.guard(self.channel.basic_qos(prefetch).await)?;

        let ConsumeSession {
            consumer_tag,
            mut deliveries,
        } = self.guard(self.channel.basic_consume(&request.subscription).await)?;

        let (taken, collect_error) =
            Self::collect(&mut deliveries, request.max_messages, timeout).await;

        // The consumer must be gone before the channel serves the next pull.
        let cancelled = self.guard(self.channel.basic_cancel(&consumer_tag).await);
        let drained = self.drain(deliveries).await;

        if let Some(err) = collect_error.or(cancelled.err()).or(drained.err()) {
            self.requeue_all(&taken).await;
            return Err(err);
        }

        let received_messages = taken
            .into_iter()
            .map(|delivery| {
                let ack_id = self.pending.register(delivery.delivery_tag);
                debug!(
                    "Pulled delivery {} from {} as ack id {ack_id}",
                    delivery.delivery_tag, request.subscription
                );
                let message = Message::new(delivery.body)
                    .with_attributes(delivery.headers)
                    .with_redelivered(delivery.redelivered);
                ReceivedMessage::new(message, ack_id)
            })
            .collect();

        Ok(PullResponse::new(received_messages))
    }

    async fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<(), BrokerError> {
        for ack_id in &request.ack_ids {
            let Some(delivery_tag) = self.pending.take(ack_id) else {
                debug!("Ignoring acknowledge for unknown ack id {ack_id}");
                continue;
            };
            debug!(
                "Acknowledging delivery {delivery_tag} from {}",
                request.subscription
            );
            self.guard(self.channel.basic_ack(delivery_tag).await)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rabbitmq::PublishProperties;
    use futures_util::stream;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Qos(u16),
        Consume(String),
        Cancel(String),
        Ack(u64),
        Nack(u64, bool),
    }

    /// Channel whose consume hands out a fixed batch of already-buffered deliveries.
    #[derive(Default)]
    struct ScriptedChannel {
        buffered: Mutex<Vec<RawDelivery>>,
        calls: Mutex<Vec<Call>>,
        closed: Mutex<bool>,
    }

    impl ScriptedChannel {
        fn with_deliveries(tags: &[u64]) -> Self {
            let channel = Self::default();
            *channel.buffered.lock() = tags
                .iter()
                .map(|tag| RawDelivery {
                    delivery_tag: *tag,
                    body: format!("body-{tag}").into_bytes(),
                    headers: Default::default(),
                    redelivered: false,
                })
                .collect();
            channel
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn record(&self, call: Call) -> Result<(), BrokerError> {
            if *self.closed.lock() {
                return Err(BrokerError::ChannelClosed);
            }
            self.calls.lock().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl AmqpChannel for ScriptedChannel {
        async fn basic_publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _body: &[u8],
            _properties: PublishProperties,
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
            self.record(Call::Qos(prefetch_count))
        }

        async fn basic_consume(&self, queue: &str) -> Result<ConsumeSession, BrokerError> {
            self.record(Call::Consume(queue.to_string()))?;
            let deliveries: Vec<Result<RawDelivery, BrokerError>> =
                self.buffered.lock().drain(..).map(Ok).collect();
            Ok(ConsumeSession {
                consumer_tag: "ctag-1".to_string(),
                deliveries: stream::iter(deliveries).boxed(),
            })
        }

        async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
            self.record(Call::Cancel(consumer_tag.to_string()))
        }

        async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
            self.record(Call::Ack(delivery_tag))
        }

        async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
            self.record(Call::Nack(delivery_tag, requeue))
        }
    }

    #[tokio::test]
    async fn pull_cancels_consumer_and_requeues_surplus() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::with_deliveries(&[5, 6]));

        let response = subscriber
            .pull(&PullRequest::single("jobs"), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(response.len(), 1);
        assert_eq!(response.received_messages[0].ack_id, "5");
        assert_eq!(
            subscriber.channel().calls(),
            vec![
                Call::Qos(1),
                Call::Consume("jobs".into()),
                Call::Cancel("ctag-1".into()),
                Call::Nack(6, true),
            ]
        );
        assert!(subscriber.is_pending("5"));
        assert!(!subscriber.is_pending("6"));
    }

    #[tokio::test]
    async fn batch_pull_takes_buffered_deliveries() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::with_deliveries(&[1, 2, 3]));

        let response = subscriber
            .pull(&PullRequest::new("jobs", 2), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(response.ack_ids(), vec!["1".to_string(), "2".to_string()]);
        assert!(subscriber.channel().calls().contains(&Call::Qos(2)));
        assert!(subscriber.channel().calls().contains(&Call::Nack(3, true)));
        assert_eq!(subscriber.pending_count(), 2);
    }

    #[tokio::test]
    async fn zero_max_messages_is_rejected() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::default());
        let result = subscriber
            .pull(&PullRequest::new("jobs", 0), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
        assert!(subscriber.channel().calls().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_forwards_each_known_tag_once() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::with_deliveries(&[9]));
        let response = subscriber
            .pull(&PullRequest::single("jobs"), Duration::from_millis(50))
            .await
            .unwrap();
        let request = AcknowledgeRequest::new("jobs", response.ack_ids());

        subscriber.acknowledge(&request).await.unwrap();
        subscriber.acknowledge(&request).await.unwrap();
        subscriber
            .acknowledge(&AcknowledgeRequest::new("jobs", ["never-issued"]))
            .await
            .unwrap();

        let acks: Vec<Call> = subscriber
            .channel()
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Ack(_)))
            .collect();
        assert_eq!(acks, vec![Call::Ack(9)]);
        assert_eq!(subscriber.pending_count(), 0);
    }

    #[tokio::test]
    async fn nack_removes_correlation_entry() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::with_deliveries(&[4]));
        subscriber
            .pull(&PullRequest::single("jobs"), Duration::from_millis(50))
            .await
            .unwrap();

        let request = AcknowledgeRequest::new("jobs", ["4"]);
        subscriber.nack(&request, true).await.unwrap();
        subscriber.acknowledge(&request).await.unwrap();

        let calls = subscriber.channel().calls();
        assert!(calls.contains(&Call::Nack(4, true)));
        assert!(!calls.contains(&Call::Ack(4)));
    }

    #[tokio::test]
    async fn closed_channel_invalidates_pending_handles() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::with_deliveries(&[1, 2]));
        subscriber
            .pull(&PullRequest::new("jobs", 2), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(subscriber.pending_count(), 2);

        *subscriber.channel().closed.lock() = true;
        let result = subscriber
            .acknowledge(&AcknowledgeRequest::new("jobs", ["1"]))
            .await;

        assert!(matches!(result, Err(BrokerError::ChannelClosed)));
        assert_eq!(subscriber.pending_count(), 0);
        assert!(!subscriber.is_pending("2"));
    }

    #[tokio::test]
    async fn empty_queue_yields_empty_response() {
        let subscriber = RabbitMqSubscriber::new(ScriptedChannel::default());
        let response = subscriber
            .pull(&PullRequest::single("jobs"), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(response.is_empty());
        assert!(subscriber
            .channel()
            .calls()
            .contains(&Call::Cancel("ctag-1".into())));
    }
}
