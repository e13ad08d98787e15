use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use synapse_broker::Subscriber;
use synapse_models::{AcknowledgeRequest, PullRequest};

use crate::{
    decode_payload, ConsumerError, Iteration, MessageHandler, PayloadSchema, StopHandle,
    DEFAULT_PULL_TIMEOUT,
};

/// Consumer loop that runs every step on the calling thread, one message at a time.
pub struct MessageConsumer<S, H, P> {
    subscription: String,
    handler: H,
    schema: P,
    subscriber: S,
    pull_timeout: Duration,
    running: StopHandle,
    // Held for a whole iteration so one instance never has two messages in flight.
    in_flight: Mutex<()>,
}

impl<S, H, P> MessageConsumer<S, H, P>
where
    S: Subscriber,
    P: PayloadSchema,
    H: MessageHandler<P::Output>,
{
    pub fn new(subscription: impl Into<String>, handler: H, schema: P, subscriber: S) -> Self {
        Self {
            subscription: subscription.into(),
            handler,
            schema,
            subscriber,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            running: StopHandle::default(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_pull_timeout(mut self, pull_timeout: Duration) -> Self {
        self.pull_timeout = pull_timeout;
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn start(&self) {
        self.running.start();
    }

    pub fn stop(&self) {
        self.running.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Handle for stopping the loop from another thread or from inside the handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.running.clone()
    }

    /// Pull at most one message, validate it, hand it to the handler and acknowledge it.
    pub fn process_one(&self) -> Result<Iteration, ConsumerError> {
        let _in_flight = self.in_flight.lock();
        let response = self
            .subscriber
            .pull(&PullRequest::single(&self.subscription), self.pull_timeout)?;

        let mut received = response.into_iter();
        let Some(message) = received.next() else {
            return Ok(Iteration::Idle);
        };
        let surplus = received.count();
        if surplus > 0 {
            warn!(
                "Subscriber returned {surplus} extra message(s) from {}; leaving them unacknowledged",
                self.subscription
            );
        }

        debug!("Received message {} from {}", message.ack_id, self.subscription);
        let request = decode_payload(&self.schema, &message.ack_id, &message.message.data)?;

        self.handler
            .handle(request)
            .map_err(|source| ConsumerError::Handler {
                ack_id: message.ack_id.clone(),
                source,
            })?;

        self.subscriber.acknowledge(&AcknowledgeRequest::new(
            self.subscription.as_str(),
            [message.ack_id.as_str()],
        ))?;
        debug!("Acknowledged message {} on {}", message.ack_id, self.subscription);

        Ok(Iteration::Handled {
            ack_id: message.ack_id,
        })
    }

    /// Process messages until stopped. Returns immediately if [`start`](Self::start) was
    /// never called, and returns the first error any iteration produces.
    pub fn run(&self) -> Result<(), ConsumerError> {
        if !self.is_running() {
            return Ok(());
        }

        info!("Consumer for {} started", self.subscription);
        while self.is_running() {
            if let Err(err) = self.process_one() {
                warn!("Consumer for {} stopped on error: {err}", self.subscription);
                return Err(err);
            }
        }
        info!("Consumer for {} stopped", self.subscription);
        Ok(())
    }
}
