use std::{fmt, str::FromStr};

use crate::BrokerError;

/// Destination of a publish: `queue` or `exchange:routing_key`.
///
/// A bare queue name routes through the default (nameless) exchange with the
/// queue name as routing key. Only the first `:` separates exchange from key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRef {
    exchange: String,
    routing_key: String,
}

impl TopicRef {
    pub fn parse(topic: &str) -> Result<Self, BrokerError> {
        if topic.is_empty() {
            return Err(BrokerError::InvalidTopic(topic.to_string()));
        }

        let (exchange, routing_key) = match topic.split_once(':') {
            Some((exchange, routing_key)) => (exchange, routing_key),
            None => ("", topic),
        };

        Ok(Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            exchange: String::new(),
            routing_key: name.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_direct_to_queue(&self) -> bool {
        self.exchange.is_empty()
    }
}

impl FromStr for TopicRef {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicRef::parse(s)
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exchange.is_empty() {
            write!(f, "{}", self.routing_key)
        } else {
            write!(f, "{}:{}", self.exchange, self.routing_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_targets_default_exchange() {
        let topic = TopicRef::parse("orders").unwrap();
        assert_eq!(topic.exchange(), "");
        assert_eq!(topic.routing_key(), "orders");
        assert!(topic.is_direct_to_queue());
    }

    #[test]
    fn separator_splits_exchange_and_key() {
        let topic: TopicRef = "ex:rk".parse().unwrap();
        assert_eq!(topic.exchange(), "ex");
        assert_eq!(topic.routing_key(), "rk");
        assert_eq!(topic.to_string(), "ex:rk");
    }

    #[test]
    fn only_first_separator_counts() {
        let topic = TopicRef::parse("events:order:created").unwrap();
        assert_eq!(topic.exchange(), "events");
        assert_eq!(topic.routing_key(), "order:created");
    }

    #[test]
    fn empty_topic_is_rejected() {
        assert!(matches!(
            TopicRef::parse(""),
            Err(BrokerError::InvalidTopic(_))
        ));
    }
}
