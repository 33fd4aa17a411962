//! `dht-mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for configuration, logging setup and
//! process exit codes. The poll loop lives in [`crate::app`] where it can be tested
//! deterministically with an injected sensor, broker and shutdown signal.

pub mod app;
pub mod broker;
pub mod filter;
pub mod gate;
pub mod output;
pub mod reading;
pub mod sensor;
pub mod units;

// Re-export commonly used types at the crate root
pub use broker::{Broker, BrokerError, DeliveryGuarantee, Message, SilentBroker, Topics};
pub use filter::{Quantity, RollingWindow, SensorFilter};
pub use gate::{GateDecision, GatePolicy, PublishGate, PublishState, parse_duration};
pub use output::PayloadFormatter;
pub use output::csv::{CsvRecorder, Record};
pub use output::domoticz::DomoticzFormatter;
pub use reading::{Classification, Detected, RawReading, Reading, ReadingBatch};
pub use sensor::{DeviceType, ReadResult, Sensor, SensorError};
pub use units::{TemperatureUnit, humidity_status};
