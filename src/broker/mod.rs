//! Message broker abstraction.
//!
//! The poll loop publishes retained messages under a base topic and never
//! waits for acknowledgements. The real client lives in [`mqtt`]; when chatter
//! is disabled the [`SilentBroker`] swallows everything.

#[cfg(feature = "mqtt")]
pub mod mqtt;

use futures::future::BoxFuture;
use thiserror::Error;

/// Delivery guarantee of a published message (MQTT QoS 0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub guarantee: DeliveryGuarantee,
    pub retain: bool,
}

impl Message {
    /// A retained message, the default for every topic this bridge owns.
    pub fn retained(
        topic: impl Into<String>,
        payload: impl Into<String>,
        guarantee: DeliveryGuarantee,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            guarantee,
            retain: true,
        }
    }
}

/// Error type for broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker could not be reached or refused the connection
    #[error("Cannot connect to broker {address}: {reason}")]
    Connect { address: String, reason: String },
    /// The client could not queue a publish
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    /// The client could not queue a disconnect
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// Broker abstraction to enable deterministic unit tests without a broker.
pub trait Broker: Send {
    /// Queue a message. Returns once the client accepted or dropped it, never
    /// waiting on the broker.
    fn publish(&mut self, message: Message) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Flush queued messages and close the connection.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Drop the connection without a DISCONNECT so the broker publishes the
    /// last will.
    fn abort(&mut self) {}
}

/// Broker used when MQTT chatter is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentBroker;

impl Broker for SilentBroker {
    fn publish(&mut self, _message: Message) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Topic names derived from the configured base topic.
///
/// Side topics are appended without a separator, so a base of
/// `domoticz/in` yields `domoticz/instate`, `domoticz/indetected`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Topic receiving value payloads.
    pub fn value(&self) -> &str {
        &self.base
    }

    /// `ONLINE`/`OFFLINE` availability.
    pub fn state(&self) -> String {
        self.side("state")
    }

    /// Latest classification tag.
    pub fn detected(&self) -> String {
        self.side("detected")
    }

    /// Time of the latest heartbeat.
    pub fn updated(&self) -> String {
        self.side("updated")
    }

    /// Static device kind announcement.
    pub fn kind(&self) -> String {
        self.side("type")
    }

    /// Static device model announcement.
    pub fn device(&self) -> String {
        self.side("device")
    }

    fn side(&self, name: &str) -> String {
        format!("{}{}", self.base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_append_without_separator() {
        let topics = Topics::new("domoticz/in");
        assert_eq!(topics.value(), "domoticz/in");
        assert_eq!(topics.state(), "domoticz/instate");
        assert_eq!(topics.detected(), "domoticz/indetected");
        assert_eq!(topics.updated(), "domoticz/inupdated");
        assert_eq!(topics.kind(), "domoticz/intype");
        assert_eq!(topics.device(), "domoticz/indevice");
    }

    #[test]
    fn test_retained_message() {
        let message = Message::retained("t", "ONLINE", DeliveryGuarantee::AtLeastOnce);
        assert!(message.retain);
        assert_eq!(message.payload, "ONLINE");
    }

    #[test]
    fn test_silent_broker_accepts_everything() {
        let mut broker = SilentBroker;
        tokio_test::block_on(async {
            broker
                .publish(Message::retained("t", "p", DeliveryGuarantee::ExactlyOnce))
                .await
                .unwrap();
            broker.disconnect().await.unwrap();
        });
    }

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::Connect {
            address: "192.168.1.10:1883".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot connect to broker 192.168.1.10:1883: connection refused"
        );
    }
}
