//! Core application runner (poll loop) for `dht-mqtt`.
//!
//! This module is intentionally decoupled from hardware, the network and process
//! signals so the loop can be tested deterministically. Each tick reads the
//! sensor, runs both values through the outlier filter, lets the publish gate
//! decide on a value update and always sends the heartbeat.

use crate::broker::{Broker, BrokerError, DeliveryGuarantee, Message, Topics};
use crate::filter::SensorFilter;
use crate::gate::{GateDecision, GatePolicy, PublishGate, parse_duration};
use crate::output::PayloadFormatter;
use crate::output::csv::{CsvRecorder, Record};
use crate::output::domoticz::DomoticzFormatter;
use crate::reading::{Detected, Reading};
use crate::sensor::{DEFAULT_IIO_DEVICE, DeviceType, Sensor, SensorError};
use crate::units::TemperatureUnit;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Keep-alive is this many poll intervals.
const KEEP_ALIVE_POLLS: u32 = 60;

/// Client id used when no device index is configured.
const DEFAULT_CLIENT_ID: &str = "dht-mqtt";

/// How much the bridge talks to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chatter {
    /// Values, heartbeats and availability
    Essential,
    /// No broker connection at all
    Silent,
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggingMode {
    /// Structured log lines on stdout
    pub stdout: bool,
    /// CSV record files in the log directory
    pub file: bool,
}

/// Parse the chatter level. Anything mentioning `essential` talks to the broker.
pub fn parse_chatter(src: &str) -> Result<Chatter, String> {
    if src.to_lowercase().contains("essential") {
        Ok(Chatter::Essential)
    } else {
        Ok(Chatter::Silent)
    }
}

/// Parse logging destinations, e.g. `log2stdout`, `log2file` or `log2stdout|log2file`.
pub fn parse_logging(src: &str) -> Result<LoggingMode, String> {
    let src = src.to_lowercase();
    Ok(LoggingMode {
        stdout: src.contains("log2stdout"),
        file: src.contains("log2file"),
    })
}

/// Parse the filtering switch. Anything mentioning `enabled` turns filtering on.
pub fn parse_enabled(src: &str) -> Result<bool, String> {
    Ok(src.to_lowercase().contains("enabled"))
}

/// Parse a boolean switch that is only on for `true`.
pub fn parse_true(src: &str) -> Result<bool, String> {
    Ok(src.trim().eq_ignore_ascii_case("true"))
}

/// Configuration for the bridge.
///
/// Every option can also be set through the environment key shown in `--help`.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Base MQTT topic. Status topics are appended to it (`<topic>state`, ...)
    #[arg(long, env = "topic", default_value = "domoticz/in")]
    pub topic: String,

    /// Domoticz device index
    #[arg(long, env = "idx")]
    pub idx: Option<u64>,

    /// MQTT broker host
    #[arg(long, env = "broker", default_value = "192.168.1.10")]
    pub broker: String,

    /// MQTT broker port
    #[arg(long, env = "broker_port", default_value_t = 1883)]
    pub broker_port: u16,

    /// MQTT username
    #[arg(long, env = "username")]
    pub username: Option<String>,

    /// MQTT password
    #[arg(long, env = "password", hide_env_values = true)]
    pub password: Option<String>,

    /// Publish unchanged values at least this often.
    /// Accepts duration with suffix: 30s, 15m, 1h. Without suffix, seconds.
    #[arg(long, env = "maxUpdateTime", default_value = "900", value_parser = parse_duration)]
    pub max_update_time: Duration,

    /// Publish as soon as both temperature and humidity changed
    #[arg(
        long,
        env = "updateOnEveryChange",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = parse_true
    )]
    pub update_on_every_change: bool,

    /// Time between sensor reads. Without suffix, seconds
    #[arg(long, env = "poll", default_value = "2", value_parser = parse_duration)]
    pub poll: Duration,

    /// GPIO pin the sensor data line is wired to
    #[arg(long, env = "pin", default_value_t = 4)]
    pub pin: u8,

    /// Sensor model
    #[arg(long, env = "device_type", default_value_t, value_enum, ignore_case = true)]
    pub device_type: DeviceType,

    /// Temperature unit of published values
    #[arg(long, env = "unit", default_value_t, value_enum, ignore_case = true)]
    pub unit: TemperatureUnit,

    /// `essential` publishes to the broker, anything else stays silent
    #[arg(long, env = "mqtt_chatter", default_value = "essential", value_parser = parse_chatter)]
    pub mqtt_chatter: Chatter,

    /// Log destinations: `log2stdout`, `log2file`, both, or `None`
    #[arg(long, env = "logging", default_value = "None", value_parser = parse_logging)]
    pub logging: LoggingMode,

    /// Directory for CSV record files
    #[arg(long, env = "log_dir", default_value = "/log")]
    pub log_dir: PathBuf,

    /// `enabled` rejects outliers, anything else publishes every reading
    #[arg(
        long,
        env = "filtering",
        default_value = "enabled",
        action = ArgAction::Set,
        value_parser = parse_enabled
    )]
    pub filtering: bool,

    /// Sysfs directory of the sensor's IIO device
    #[arg(long, env = "iio_device", default_value = DEFAULT_IIO_DEVICE)]
    pub iio_device: PathBuf,
}

impl Options {
    pub fn topics(&self) -> Topics {
        Topics::new(self.topic.clone())
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            update_delay: self.max_update_time,
            update_on_every_change: self.update_on_every_change,
        }
    }

    /// Broker keep-alive, a fixed multiple of the poll interval.
    ///
    /// MQTT counts keep-alive in whole seconds (`u16`), so the value is rounded
    /// up and clamped to that range.
    pub fn keep_alive(&self) -> Duration {
        let interval = self
            .poll
            .checked_mul(KEEP_ALIVE_POLLS)
            .unwrap_or(Duration::MAX);
        let secs = interval
            .as_secs()
            .saturating_add(u64::from(interval.subsec_nanos() > 0));
        Duration::from_secs(secs.clamp(1, u64::from(u16::MAX)))
    }

    pub fn client_id(&self) -> String {
        self.idx
            .map(|idx| idx.to_string())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
    }

    /// Message the broker publishes if the connection drops unexpectedly.
    pub fn last_will(&self) -> Message {
        Message::retained(
            self.topics().state(),
            "OFFLINE",
            DeliveryGuarantee::AtLeastOnce,
        )
    }

    #[cfg(feature = "mqtt")]
    pub fn mqtt_config(&self) -> crate::broker::mqtt::MqttConfig {
        crate::broker::mqtt::MqttConfig {
            host: self.broker.clone(),
            port: self.broker_port,
            client_id: self.client_id(),
            credentials: self
                .username
                .clone()
                .map(|username| (username, self.password.clone().unwrap_or_default())),
            keep_alive: self.keep_alive(),
            last_will: Some(self.last_will()),
        }
    }
}

/// Errors returned by the poll loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Current local time as published on the `updated` topic.
pub fn timestamp_string() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// Human-readable age of the last update: seconds below a minute, minutes above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let minutes = (elapsed.as_secs_f64() / 60.0 * 100.0).round() / 100.0;
    if minutes < 1.0 {
        format!("{} seconds", elapsed.as_secs())
    } else {
        format!("{} minutes", minutes)
    }
}

/// State owned by the poll loop. Nothing else mutates it.
struct Bridge<'a> {
    options: &'a Options,
    topics: Topics,
    filter: SensorFilter,
    gate: PublishGate,
    formatter: DomoticzFormatter,
    recorder: &'a CsvRecorder,
}

impl<'a> Bridge<'a> {
    fn new(options: &'a Options, recorder: &'a CsvRecorder) -> Self {
        Self {
            options,
            topics: options.topics(),
            filter: SensorFilter::new(options.unit),
            gate: PublishGate::new(options.gate_policy()),
            formatter: DomoticzFormatter::new(options.idx),
            recorder,
        }
    }

    fn retained(&self, topic: impl Into<String>, payload: impl Into<String>) -> Message {
        Message::retained(topic, payload, DeliveryGuarantee::AtLeastOnce)
    }

    /// Publish the static device description and mark the bridge online.
    async fn announce(&self, broker: &mut dyn Broker) -> Result<(), BrokerError> {
        let messages = [
            self.retained(self.topics.kind(), "sensor"),
            self.retained(self.topics.device(), self.options.device_type.to_string()),
            self.retained(self.topics.updated(), timestamp_string()),
            self.retained(self.topics.state(), "ONLINE"),
        ];
        for message in messages {
            broker.publish(message).await?;
        }
        debug!("Announced device on {}", self.topics.value());
        Ok(())
    }

    async fn poll(
        &mut self,
        sensor: &mut dyn Sensor,
        broker: &mut dyn Broker,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), RunError> {
        info!("Begin capture...");
        while !*shutdown.borrow() {
            self.tick(sensor, broker).await?;
            tokio::time::sleep(self.options.poll).await;
        }
        Ok(())
    }

    async fn tick(
        &mut self,
        sensor: &mut dyn Sensor,
        broker: &mut dyn Broker,
    ) -> Result<(), RunError> {
        let timestamp = SystemTime::now();

        match sensor.read().await {
            Ok(raw) => {
                let reading = Reading {
                    timestamp,
                    temperature: self.options.unit.convert(raw.temperature),
                    humidity: raw.humidity,
                };
                let state = self.gate.state();
                debug!(
                    last_temperature = state.last_temperature,
                    last_humidity = state.last_humidity,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    "Read sensor"
                );

                let batch = self.filter.classify(reading);
                let detected = batch.detected(self.options.filtering);
                self.update(broker, detected, Some(&reading)).await?;

                info!(
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    temperature_outlier = ?batch.temperature.outlier_flag(),
                    humidity_outlier = ?batch.humidity.outlier_flag(),
                    %detected,
                    "Recording"
                );
                self.record(&Record::Recording(batch));
            }
            Err(SensorError::Recoverable(reason)) => {
                self.update(broker, Detected::Error, None).await?;
                warn!(error_type = %reason, "Sensor read failed, retrying next poll");
                self.record(&Record::Error {
                    timestamp,
                    error_type: reason,
                });
            }
            Err(fatal) => return Err(fatal.into()),
        }

        Ok(())
    }

    /// Run the gate, publish the value if it says so and always send the heartbeat.
    async fn update(
        &mut self,
        broker: &mut dyn Broker,
        detected: Detected,
        reading: Option<&Reading>,
    ) -> Result<GateDecision, BrokerError> {
        let decision = self.gate.decide(detected, reading);

        match (decision, reading) {
            (GateDecision::Publish, Some(reading)) => {
                let payload = self.formatter.format(reading);
                info!(%payload, "Publishing payload");
                broker
                    .publish(self.retained(self.topics.value(), payload))
                    .await?;
            }
            (GateDecision::Unchanged { changed, elapsed }, _) => {
                info!(
                    change_in_values = changed,
                    last_update = %format_elapsed(elapsed),
                    "Ignoring MQTT update"
                );
            }
            _ => {}
        }

        broker
            .publish(self.retained(self.topics.detected(), detected.as_str()))
            .await?;
        broker
            .publish(self.retained(self.topics.updated(), timestamp_string()))
            .await?;

        Ok(decision)
    }

    fn record(&self, record: &Record) {
        if let Err(e) = self.recorder.record(record) {
            warn!(error = %e, "Dropping record");
        }
    }

    /// Mark the bridge offline with the strongest guarantee and disconnect.
    async fn go_offline(&self, broker: &mut dyn Broker) -> Result<(), BrokerError> {
        let offline = [
            Message::retained(self.topics.state(), "OFFLINE", DeliveryGuarantee::ExactlyOnce),
            Message::retained(
                self.topics.updated(),
                timestamp_string(),
                DeliveryGuarantee::ExactlyOnce,
            ),
        ];
        for message in offline {
            broker.publish(message).await?;
        }
        broker.disconnect().await
    }
}

/// Run the bridge until `shutdown` turns true or a fatal error occurs.
///
/// - Recoverable sensor errors are recorded, heartbeat as `error` and the loop continues.
/// - On a fatal error the broker connection is dropped so the last will marks the
///   device offline, the sensor is closed and the error returned.
/// - On shutdown the bridge publishes `OFFLINE`, disconnects and closes the sensor.
///
/// The shutdown flag is checked before each tick; an in-progress sleep is not interrupted.
pub async fn run(
    options: &Options,
    sensor: &mut dyn Sensor,
    broker: &mut dyn Broker,
    recorder: &CsvRecorder,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RunError> {
    let mut bridge = Bridge::new(options, recorder);

    let outcome = match bridge.announce(broker).await {
        Ok(()) => bridge.poll(sensor, broker, &shutdown).await,
        Err(e) => Err(e.into()),
    };

    match outcome {
        Ok(()) => {
            info!("Shutting down");
            let offline = bridge.go_offline(broker).await;
            sensor.close();
            offline.map_err(RunError::from)
        }
        Err(fatal) => {
            error!(error = %fatal, "Fatal error, releasing sensor and broker");
            broker.abort();
            sensor.close();
            Err(fatal)
        }
    }
}
