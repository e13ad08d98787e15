use async_trait::async_trait;
use log::info;
use serde_json::Value;
use synapse_consumer::{AsyncMessageHandler, HandlerError, ObjectSchema};
use uuid::Uuid;

/// Payloads must be JSON objects; everything else is rejected before the handler runs.
pub fn request_schema() -> ObjectSchema {
    ObjectSchema::new()
}

/// Logs each request it receives.
pub struct LoggingHandler {
    worker_id: Uuid,
    subscription: String,
}

impl LoggingHandler {
    pub fn new(worker_id: Uuid, subscription: impl Into<String>) -> Self {
        Self {
            worker_id,
            subscription: subscription.into(),
        }
    }

    fn describe(&self, request: &Value) -> String {
        let request_id = request
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or("<none>");
        format!(
            "Worker {} handled request {} from {}",
            self.worker_id, request_id, self.subscription
        )
    }
}

#[async_trait]
impl AsyncMessageHandler<Value> for LoggingHandler {
    async fn handle(&self, request: Value) -> Result<(), HandlerError> {
        info!("{}", self.describe(&request));
        Ok(())
    }
}
