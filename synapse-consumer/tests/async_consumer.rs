use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use synapse_broker::{AsyncSubscriber, BrokerError};
use synapse_consumer::{
    AsyncMessageConsumer, AsyncMessageHandler, ConsumerError, HandlerError, Iteration, JsonModel,
    StopHandle,
};
use synapse_models::{
    AcknowledgeRequest, Message, PullRequest, PullResponse, ReceivedMessage, RuntimeError,
};

const SUBSCRIPTION: &str = "projects/test/subscriptions/requests";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestRequest {
    request_id: String,
    data: String,
}

#[derive(Default)]
struct ScriptedSubscriber {
    responses: Mutex<VecDeque<Result<PullResponse, BrokerError>>>,
    pulls: Mutex<Vec<(PullRequest, Duration)>>,
    acks: Mutex<Vec<AcknowledgeRequest>>,
    stop_after: Mutex<Option<(usize, StopHandle)>>,
}

impl ScriptedSubscriber {
    fn with_responses(responses: Vec<PullResponse>) -> Self {
        let subscriber = Self::default();
        subscriber
            .responses
            .lock()
            .extend(responses.into_iter().map(Ok));
        subscriber
    }

    fn push_error(&self, err: BrokerError) {
        self.responses.lock().push_back(Err(err));
    }

    fn stop_after(&self, pulls: usize, handle: StopHandle) {
        *self.stop_after.lock() = Some((pulls, handle));
    }

    fn pull_count(&self) -> usize {
        self.pulls.lock().len()
    }

    fn acked_ids(&self) -> Vec<String> {
        self.acks
            .lock()
            .iter()
            .flat_map(|request| request.ack_ids.clone())
            .collect()
    }
}

#[async_trait]
impl AsyncSubscriber for ScriptedSubscriber {
    async fn pull(
        &self,
        request: &PullRequest,
        timeout: Duration,
    ) -> Result<PullResponse, BrokerError> {
        let count = {
            let mut pulls = self.pulls.lock();
            pulls.push((request.clone(), timeout));
            pulls.len()
        };
        if let Some((limit, handle)) = self.stop_after.lock().as_ref() {
            if count >= *limit {
                handle.stop();
            }
        }
        tokio::task::yield_now().await;
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::empty()))
    }

    async fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<(), BrokerError> {
        self.acks.lock().push(request.clone());
        Ok(())
    }
}

/// Handler that suspends mid-call and tracks how many calls overlap.
#[derive(Default)]
struct RecordingHandler {
    handled: Mutex<Vec<TestRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl AsyncMessageHandler<TestRequest> for RecordingHandler {
    async fn handle(&self, request: TestRequest) -> Result<(), HandlerError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.handled.lock().push(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(Box::new(RuntimeError::new("handler.failed", "boom")));
        }
        Ok(())
    }
}

type TestConsumer = AsyncMessageConsumer<ScriptedSubscriber, RecordingHandler, JsonModel<TestRequest>>;

fn single(ack_id: &str, data: &[u8]) -> PullResponse {
    PullResponse::new(vec![ReceivedMessage::new(Message::new(data.to_vec()), ack_id)])
}

fn request(id: &str) -> PullResponse {
    single(
        id,
        format!(r#"{{"requestId": "{id}", "data": "payload-{id}"}}"#).as_bytes(),
    )
}

fn consumer(responses: Vec<PullResponse>, handler: RecordingHandler) -> TestConsumer {
    AsyncMessageConsumer::new(
        SUBSCRIPTION,
        handler,
        JsonModel::new(),
        ScriptedSubscriber::with_responses(responses),
    )
}

#[tokio::test]
async fn new_consumer_is_stopped() {
    let consumer = consumer(Vec::new(), RecordingHandler::default());
    assert_eq!(consumer.subscription(), SUBSCRIPTION);
    assert!(!consumer.is_running());

    consumer.start();
    assert!(consumer.is_running());
    consumer.stop();
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn pulls_single_message_from_subscription() {
    let consumer = consumer(Vec::new(), RecordingHandler::default())
        .with_pull_timeout(Duration::from_secs(2));

    assert_eq!(consumer.process_one().await.unwrap(), Iteration::Idle);

    let pulls = consumer.subscriber().pulls.lock().clone();
    assert_eq!(
        pulls,
        vec![(PullRequest::single(SUBSCRIPTION), Duration::from_secs(2))]
    );
}

#[tokio::test]
async fn handler_receives_typed_request_before_ack() {
    let consumer = consumer(
        vec![single("ack-1", br#"{"requestId": "123", "data": "test"}"#)],
        RecordingHandler::default(),
    );

    let iteration = consumer.process_one().await.unwrap();

    assert_eq!(
        iteration,
        Iteration::Handled {
            ack_id: "ack-1".into()
        }
    );
    assert_eq!(
        consumer.handler().handled.lock().clone(),
        vec![TestRequest {
            request_id: "123".into(),
            data: "test".into(),
        }]
    );
    assert_eq!(consumer.subscriber().acked_ids(), vec!["ack-1".to_string()]);
}

#[tokio::test]
async fn model_mismatch_is_a_validation_error() {
    let consumer = consumer(
        vec![single("ack-1", br#"{"requestId": 123, "data": "test"}"#)],
        RecordingHandler::default(),
    );

    let err = consumer.process_one().await.unwrap_err();

    assert!(matches!(err, ConsumerError::Validation { .. }));
    assert!(consumer.handler().handled.lock().is_empty());
    assert!(consumer.subscriber().acks.lock().is_empty());
}

#[tokio::test]
async fn malformed_json_is_a_decode_error() {
    let consumer = consumer(
        vec![single("ack-1", b"not json at all")],
        RecordingHandler::default(),
    );

    let err = consumer.process_one().await.unwrap_err();

    assert!(matches!(err, ConsumerError::Decode { .. }));
    assert_eq!(err.ack_id(), Some("ack-1"));
    assert!(consumer.subscriber().acks.lock().is_empty());
}

#[tokio::test]
async fn unicode_request_is_decoded() {
    let consumer = consumer(
        vec![single(
            "ack-1",
            r#"{"requestId": "ü-1", "data": "こんにちは 🌍"}"#.as_bytes(),
        )],
        RecordingHandler::default(),
    );

    consumer.process_one().await.unwrap();

    assert_eq!(consumer.handler().handled.lock()[0].data, "こんにちは 🌍");
}

#[tokio::test]
async fn handler_failure_skips_ack() {
    let handler = RecordingHandler {
        fail: true,
        ..RecordingHandler::default()
    };
    let consumer = consumer(vec![request("1")], handler);

    let err = consumer.process_one().await.unwrap_err();

    assert!(matches!(err, ConsumerError::Handler { .. }));
    assert!(consumer.subscriber().acks.lock().is_empty());
}

#[tokio::test]
async fn transport_failure_propagates() {
    let consumer = consumer(Vec::new(), RecordingHandler::default());
    consumer.subscriber().push_error(BrokerError::ChannelClosed);

    let err = consumer.process_one().await.unwrap_err();

    assert!(matches!(err, ConsumerError::Transport(BrokerError::ChannelClosed)));
    assert_eq!(err.ack_id(), None);
}

#[tokio::test]
async fn run_loops_until_stop_handle_fires() {
    let consumer = consumer(
        vec![request("1"), PullResponse::empty(), request("2"), request("3")],
        RecordingHandler::default(),
    );
    consumer
        .subscriber()
        .stop_after(4, consumer.stop_handle());

    consumer.start();
    consumer.run().await.unwrap();

    assert!(!consumer.is_running());
    assert_eq!(consumer.subscriber().pull_count(), 4);
    assert_eq!(
        consumer.subscriber().acked_ids(),
        vec!["1".to_string(), "2".to_string(), "3".to_string()]
    );
    assert_eq!(consumer.handler().max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn overlapping_calls_on_one_consumer_handle_one_message_at_a_time() {
    let consumer = consumer(vec![request("1"), request("2")], RecordingHandler::default());

    let (first, second) = tokio::join!(consumer.process_one(), consumer.process_one());
    first.unwrap();
    second.unwrap();

    assert_eq!(consumer.handler().max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        consumer.subscriber().acked_ids(),
        vec!["1".to_string(), "2".to_string()]
    );
}

#[tokio::test]
async fn run_without_start_returns_immediately() {
    let consumer = consumer(vec![request("1")], RecordingHandler::default());

    consumer.run().await.unwrap();

    assert_eq!(consumer.subscriber().pull_count(), 0);
}

#[tokio::test]
async fn stop_from_another_task_ends_run() {
    let consumer = consumer(Vec::new(), RecordingHandler::default())
        .with_pull_timeout(Duration::from_millis(10));
    let handle = consumer.stop_handle();

    consumer.start();
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
    };
    let (result, _) = tokio::join!(consumer.run(), stopper);

    result.unwrap();
    assert!(consumer.subscriber().pull_count() >= 1);
}

#[tokio::test]
async fn consumers_on_separate_subscriptions_run_concurrently() {
    let first = consumer(vec![request("a1"), request("a2")], RecordingHandler::default());
    let second = AsyncMessageConsumer::new(
        "projects/test/subscriptions/other",
        RecordingHandler::default(),
        JsonModel::<TestRequest>::new(),
        ScriptedSubscriber::with_responses(vec![request("b1")]),
    );
    first.subscriber().stop_after(2, first.stop_handle());
    second.subscriber().stop_after(1, second.stop_handle());

    first.start();
    second.start();
    let (a, b) = tokio::join!(first.run(), second.run());
    a.unwrap();
    b.unwrap();

    assert_eq!(
        first.subscriber().acked_ids(),
        vec!["a1".to_string(), "a2".to_string()]
    );
    assert_eq!(second.subscriber().acked_ids(), vec!["b1".to_string()]);
    assert_eq!(
        second.subscriber().acks.lock()[0].subscription,
        "projects/test/subscriptions/other"
    );
}
