//! MQTT broker client backed by `rumqttc`.
//!
//! `rumqttc` splits a connection into a client handle that queues requests and
//! an event loop that performs the network I/O. The event loop runs on its own
//! task for the lifetime of the connection and never touches filter or gate
//! state.

use super::{Broker, BrokerError, DeliveryGuarantee, Message};
use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Capacity of the client request queue.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Pause between reconnect attempts after the connection dropped.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on flushing queued messages during disconnect.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<DeliveryGuarantee> for QoS {
    fn from(guarantee: DeliveryGuarantee) -> Self {
        match guarantee {
            DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
            DeliveryGuarantee::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Username and password
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    /// Published by the broker if the connection drops without a disconnect
    pub last_will: Option<Message>,
}

impl MqttConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }

        if let Some(will) = &self.last_will {
            options.set_last_will(LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                will.guarantee.into(),
                will.retain,
            ));
        }

        options
    }
}

/// A connected MQTT client.
#[derive(Debug)]
pub struct MqttBroker {
    client: AsyncClient,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttBroker {
    /// Connect and wait for the broker to acknowledge the session.
    ///
    /// # Errors
    /// Returns `BrokerError::Connect` if the broker is unreachable or refuses
    /// the connection. There is no retry at connect time.
    pub async fn connect(config: &MqttConfig) -> Result<Self, BrokerError> {
        let (client, mut event_loop) =
            AsyncClient::new(config.to_options(), REQUEST_CHANNEL_CAPACITY);

        let connect_error = |reason: String| BrokerError::Connect {
            address: config.address(),
            reason,
        };

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(connect_error(format!("{:?}", ack.code)));
                }
                Ok(event) => trace!(?event, "mqtt event before connack"),
                Err(e) => return Err(connect_error(e.to_string())),
            }
        }

        debug!(address = %config.address(), "mqtt connected");

        Ok(Self {
            client,
            event_loop: Some(tokio::spawn(drive(event_loop))),
        })
    }
}

/// Service the connection until the client disconnects.
async fn drive(mut event_loop: EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("mqtt disconnected");
                break;
            }
            Ok(event) => trace!(?event, "mqtt event"),
            Err(e) => {
                warn!(error = %e, "mqtt connection error, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

impl Broker for MqttBroker {
    fn publish(&mut self, message: Message) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let Message {
                topic,
                payload,
                guarantee,
                retain,
            } = message;
            // The event loop stops draining requests while disconnected.
            match self
                .client
                .try_publish(topic.clone(), guarantee.into(), retain, payload)
            {
                Ok(()) => Ok(()),
                Err(ClientError::TryRequest(_)) => {
                    warn!(%topic, "mqtt request queue full, dropping message");
                    Ok(())
                }
                Err(e) => Err(BrokerError::Publish {
                    topic,
                    reason: e.to_string(),
                }),
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let queued = self.client.try_disconnect();

            if let Some(handle) = self.event_loop.take() {
                if let Err(e) = queued {
                    handle.abort();
                    return Err(BrokerError::Disconnect(e.to_string()));
                }
                if tokio::time::timeout(DISCONNECT_TIMEOUT, handle).await.is_err() {
                    warn!("mqtt event loop did not finish flushing before disconnect timeout");
                }
            }
            Ok(())
        })
    }

    fn abort(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.abort();
    }
}
