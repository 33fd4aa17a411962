//! Sensor reading data structures.

use std::fmt;
use std::time::SystemTime;

/// A raw reading as returned by the sensor driver.
///
/// Temperature is always in Celsius, humidity in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent (0-100)
    pub humidity: f64,
}

/// A reading converted to the configured display unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Timestamp when the reading was taken
    pub timestamp: SystemTime,
    /// Temperature in the configured unit
    pub temperature: f64,
    /// Relative humidity in percent (0-100)
    pub humidity: f64,
}

/// Verdict of the outlier filter for a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The window is still warming up, no verdict
    Bootstrapping,
    /// Within the statistical bounds of the window
    Accurate,
    /// Outside the statistical bounds of the window
    Outlier,
}

impl Classification {
    /// Outlier flag as recorded in the recording log (`None` while bootstrapping).
    pub fn outlier_flag(self) -> Option<bool> {
        match self {
            Classification::Bootstrapping => None,
            Classification::Accurate => Some(false),
            Classification::Outlier => Some(true),
        }
    }
}

/// Tag published on the `detected` heartbeat topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    Accurate,
    Outlier,
    Bypass,
    Error,
}

impl Detected {
    /// Combine both classifications into a single tag.
    ///
    /// Temperature and humidity faults are correlated, so either one rejecting
    /// the sample (or still bootstrapping) marks the whole reading as an outlier.
    pub fn from_classifications(temperature: Classification, humidity: Classification) -> Self {
        match (temperature, humidity) {
            (Classification::Accurate, Classification::Accurate) => Detected::Accurate,
            _ => Detected::Outlier,
        }
    }

    /// Whether a reading with this tag may be published.
    pub fn is_publishable(self) -> bool {
        matches!(self, Detected::Accurate | Detected::Bypass)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Detected::Accurate => "accurate",
            Detected::Outlier => "outlier",
            Detected::Bypass => "bypass",
            Detected::Error => "error",
        }
    }
}

impl fmt::Display for Detected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one tick: the reading and both verdicts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingBatch {
    pub reading: Reading,
    pub temperature: Classification,
    pub humidity: Classification,
}

impl ReadingBatch {
    /// The heartbeat tag for this batch, honouring the filtering bypass.
    pub fn detected(&self, filtering: bool) -> Detected {
        if filtering {
            Detected::from_classifications(self.temperature, self.humidity)
        } else {
            Detected::Bypass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(temperature: Classification, humidity: Classification) -> ReadingBatch {
        ReadingBatch {
            reading: Reading {
                timestamp: SystemTime::UNIX_EPOCH,
                temperature: 21.0,
                humidity: 40.0,
            },
            temperature,
            humidity,
        }
    }

    #[test]
    fn test_detected_requires_both_accurate() {
        use Classification::*;
        assert_eq!(batch(Accurate, Accurate).detected(true), Detected::Accurate);
        assert_eq!(batch(Accurate, Outlier).detected(true), Detected::Outlier);
        assert_eq!(batch(Outlier, Accurate).detected(true), Detected::Outlier);
        assert_eq!(
            batch(Bootstrapping, Accurate).detected(true),
            Detected::Outlier
        );
    }

    #[test]
    fn test_detected_bypass_ignores_classification() {
        use Classification::*;
        assert_eq!(batch(Outlier, Outlier).detected(false), Detected::Bypass);
        assert!(Detected::Bypass.is_publishable());
        assert!(!Detected::Outlier.is_publishable());
        assert!(!Detected::Error.is_publishable());
    }

    #[test]
    fn test_detected_display() {
        assert_eq!(Detected::Accurate.to_string(), "accurate");
        assert_eq!(Detected::Outlier.to_string(), "outlier");
        assert_eq!(Detected::Bypass.to_string(), "bypass");
        assert_eq!(Detected::Error.to_string(), "error");
    }

    #[test]
    fn test_outlier_flag() {
        assert_eq!(Classification::Bootstrapping.outlier_flag(), None);
        assert_eq!(Classification::Accurate.outlier_flag(), Some(false));
        assert_eq!(Classification::Outlier.outlier_flag(), Some(true));
    }
}
