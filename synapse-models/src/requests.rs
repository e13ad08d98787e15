use serde::{Deserialize, Serialize};

/// Pull request shape: the subscription to read from and an upper bound on messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub subscription: String,
    pub max_messages: usize,
}

impl PullRequest {
    pub fn new(subscription: impl Into<String>, max_messages: usize) -> Self {
        Self {
            subscription: subscription.into(),
            max_messages,
        }
    }

    pub fn single(subscription: impl Into<String>) -> Self {
        Self::new(subscription, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub subscription: String,
    pub ack_ids: Vec<String>,
}

impl AcknowledgeRequest {
    pub fn new<I, S>(subscription: impl Into<String>, ack_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscription: subscription.into(),
            ack_ids: ack_ids.into_iter().map(Into::into).collect(),
        }
    }
}
