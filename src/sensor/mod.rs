//! Sensor abstraction for DHT-family temperature/humidity sensors.
//!
//! The poll loop only needs one operation from the hardware: read a raw
//! temperature/humidity pair, or fail. Failures are split into recoverable
//! faults (checksum mismatch, timing glitch) that the loop rides out, and
//! fatal ones that end the process.

#[cfg(feature = "iio")]
pub mod iio;

use crate::reading::RawReading;
use futures::future::BoxFuture;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Error type for sensor reads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// Transient fault, the next read may succeed
    #[error("Recoverable read error: {0}")]
    Recoverable(String),
    /// The sensor is gone or misconfigured
    #[error("Sensor failure: {0}")]
    Fatal(String),
}

/// Default sysfs directory of the first IIO device.
pub const DEFAULT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";

/// Convenience alias for a single sensor read.
pub type ReadResult = Result<RawReading, SensorError>;

/// Sensor abstraction to enable deterministic unit tests without hardware.
pub trait Sensor: Send {
    /// Take one reading. Temperature is returned in Celsius.
    fn read(&mut self) -> BoxFuture<'_, ReadResult>;

    /// Release the sensor. Called once on every exit path of the poll loop.
    fn close(&mut self) {}
}

/// Supported sensor models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeviceType {
    /// DHT11, integer resolution
    Dht11,
    /// DHT22
    #[default]
    Dht22,
    /// AM2302 (wired DHT22)
    Am2302,
}

impl DeviceType {
    /// Temperature range the sensor can report, in Celsius.
    pub fn temperature_range(self) -> RangeInclusive<f64> {
        match self {
            DeviceType::Dht11 => 0.0..=50.0,
            DeviceType::Dht22 | DeviceType::Am2302 => -40.0..=80.0,
        }
    }

    /// Relative humidity range the sensor can report, in percent.
    pub fn humidity_range(self) -> RangeInclusive<f64> {
        match self {
            DeviceType::Dht11 => 5.0..=95.0,
            DeviceType::Dht22 | DeviceType::Am2302 => 0.0..=100.0,
        }
    }

    /// Reject readings the sensor cannot physically produce.
    ///
    /// Corrupted frames that slip past the checksum show up as wild values,
    /// which are treated like any other transient read fault.
    pub fn validate(self, reading: RawReading) -> ReadResult {
        if !self.temperature_range().contains(&reading.temperature) {
            return Err(SensorError::Recoverable(format!(
                "temperature {} out of range for {}",
                reading.temperature, self
            )));
        }
        if !self.humidity_range().contains(&reading.humidity) {
            return Err(SensorError::Recoverable(format!(
                "humidity {} out of range for {}",
                reading.humidity, self
            )));
        }
        Ok(reading)
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Dht11 => write!(f, "dht11"),
            DeviceType::Dht22 => write!(f, "dht22"),
            DeviceType::Am2302 => write!(f, "am2302"),
        }
    }
}
