//! Linux IIO backend for DHT sensors.
//!
//! The kernel `dht11` driver (enabled on a Raspberry Pi with
//! `dtoverlay=dht11,gpiopin=<pin>`) handles DHT11, DHT22 and AM2302 and exposes
//! the latest measurement through sysfs in milli-units. The driver bit-bangs
//! the one-wire protocol itself and reports checksum and timing faults as
//! `EIO`/`ETIMEDOUT` on read.

use super::{DeviceType, ReadResult, Sensor, SensorError};
use crate::reading::RawReading;
use futures::future::BoxFuture;
use std::io;
use std::path::{Path, PathBuf};

/// Temperature channel, millidegrees Celsius.
const TEMPERATURE_CHANNEL: &str = "in_temp_input";

/// Relative humidity channel, milli-percent.
const HUMIDITY_CHANNEL: &str = "in_humidityrelative_input";

/// DHT sensor read through the IIO sysfs interface.
#[derive(Debug)]
pub struct IioSensor {
    device: DeviceType,
    dir: PathBuf,
}

impl IioSensor {
    /// Open the sensor at `dir`, failing if the channels are missing.
    pub async fn open(device: DeviceType, dir: impl AsRef<Path>) -> Result<Self, SensorError> {
        let dir = dir.as_ref().to_path_buf();
        for channel in [TEMPERATURE_CHANNEL, HUMIDITY_CHANNEL] {
            let path = dir.join(channel);
            tokio::fs::metadata(&path).await.map_err(|e| {
                SensorError::Fatal(format!("cannot access {}: {}", path.display(), e))
            })?;
        }
        Ok(Self { device, dir })
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    async fn read_channel(&self, channel: &str) -> Result<f64, SensorError> {
        let raw = tokio::fs::read_to_string(self.dir.join(channel))
            .await
            .map_err(|e| classify_io_error(channel, e))?;
        let milli: i64 = raw.trim().parse().map_err(|_| {
            SensorError::Recoverable(format!("unparsable {} value {:?}", channel, raw.trim()))
        })?;
        Ok(milli as f64 / 1000.0)
    }

    async fn read_reading(&self) -> ReadResult {
        // Both channels are served from the same cached measurement.
        let temperature = self.read_channel(TEMPERATURE_CHANNEL).await?;
        let humidity = self.read_channel(HUMIDITY_CHANNEL).await?;
        self.device.validate(RawReading {
            temperature,
            humidity,
        })
    }
}

impl Sensor for IioSensor {
    fn read(&mut self) -> BoxFuture<'_, ReadResult> {
        Box::pin(self.read_reading())
    }
}

/// Split driver errors into transient faults and real failures.
fn classify_io_error(channel: &str, err: io::Error) -> SensorError {
    match err.raw_os_error() {
        Some(libc::EIO | libc::ETIMEDOUT | libc::EAGAIN | libc::EBUSY) => {
            SensorError::Recoverable(format!("{}: {}", channel, err))
        }
        _ => SensorError::Fatal(format!("{}: {}", channel, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device_dir(temperature: &str, humidity: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TEMPERATURE_CHANNEL), temperature).unwrap();
        std::fs::write(dir.path().join(HUMIDITY_CHANNEL), humidity).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_read_converts_milli_units() {
        let dir = device_dir("21500\n", "45200\n");
        let mut sensor = IioSensor::open(DeviceType::Dht22, dir.path()).await.unwrap();
        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 45.2);
    }

    #[tokio::test]
    async fn test_read_negative_temperature() {
        let dir = device_dir("-5300\n", "80000\n");
        let mut sensor = IioSensor::open(DeviceType::Am2302, dir.path()).await.unwrap();
        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.temperature, -5.3);
        assert_eq!(reading.humidity, 80.0);
    }

    #[tokio::test]
    async fn test_open_missing_device_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = IioSensor::open(DeviceType::Dht22, dir.path().join("iio:device7"))
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_garbage_value_is_recoverable() {
        let dir = device_dir("21500\n", "??\n");
        let mut sensor = IioSensor::open(DeviceType::Dht22, dir.path()).await.unwrap();
        let err = sensor.read().await.unwrap_err();
        assert!(matches!(err, SensorError::Recoverable(_)));
        assert!(err.to_string().contains(HUMIDITY_CHANNEL));
    }

    #[tokio::test]
    async fn test_out_of_range_is_recoverable() {
        let dir = device_dir("60000\n", "50000\n");
        let mut sensor = IioSensor::open(DeviceType::Dht11, dir.path()).await.unwrap();
        let err = sensor.read().await.unwrap_err();
        assert!(matches!(err, SensorError::Recoverable(_)));
    }

    #[test]
    fn test_classify_io_error() {
        let transient = classify_io_error("in_temp_input", io::Error::from_raw_os_error(libc::EIO));
        assert!(matches!(transient, SensorError::Recoverable(_)));

        let timeout = classify_io_error(
            "in_temp_input",
            io::Error::from_raw_os_error(libc::ETIMEDOUT),
        );
        assert!(matches!(timeout, SensorError::Recoverable(_)));

        let missing = classify_io_error(
            "in_temp_input",
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert!(matches!(missing, SensorError::Fatal(_)));
    }
}
