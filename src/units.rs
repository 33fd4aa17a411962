//! Temperature unit handling and humidity status codes.

use std::fmt;

/// Jitter applied around the first temperature samples, in degrees Celsius.
pub const TEMPERATURE_JITTER_CELSIUS: f64 = 0.3;

/// Display unit for published temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TemperatureUnit {
    /// Degrees Celsius (sensor native)
    #[default]
    #[value(name = "C")]
    Celsius,
    /// Degrees Fahrenheit
    #[value(name = "F")]
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert a raw Celsius temperature to this unit.
    ///
    /// # Example
    /// ```
    /// use dht_mqtt::units::TemperatureUnit;
    ///
    /// assert_eq!(TemperatureUnit::Fahrenheit.convert(20.0), 68.0);
    /// assert_eq!(TemperatureUnit::Celsius.convert(20.0), 20.0);
    /// ```
    pub fn convert(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * (9.0 / 5.0) + 32.0,
        }
    }

    /// Convert a temperature difference (not an absolute temperature) to this unit.
    pub fn convert_delta(self, celsius_delta: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius_delta,
            TemperatureUnit::Fahrenheit => celsius_delta * (9.0 / 5.0),
        }
    }

    /// Bootstrap jitter in this unit.
    pub fn jitter(self) -> f64 {
        self.convert_delta(TEMPERATURE_JITTER_CELSIUS)
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "C"),
            TemperatureUnit::Fahrenheit => write!(f, "F"),
        }
    }
}

/// Domoticz humidity status for a relative humidity in percent.
///
/// `0` normal, `1` comfortable, `2` dry, `3` wet.
pub fn humidity_status(humidity: f64) -> u8 {
    if humidity < 30.0 {
        2
    } else if humidity < 45.0 {
        0
    } else if humidity < 70.0 {
        1
    } else {
        3
    }
}

/// Render a value the way downstream consumers expect: integral values keep
/// one decimal place (`20.0`), everything else uses the shortest exact form.
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_celsius_unchanged() {
        assert_eq!(TemperatureUnit::Celsius.convert(20.0), 20.0);
        assert_eq!(TemperatureUnit::Celsius.convert(-4.5), -4.5);
    }

    #[test]
    fn test_convert_fahrenheit() {
        assert_eq!(TemperatureUnit::Fahrenheit.convert(20.0), 68.0);
        assert_eq!(TemperatureUnit::Fahrenheit.convert(0.0), 32.0);
        assert_eq!(TemperatureUnit::Fahrenheit.convert(-40.0), -40.0);
    }

    #[test]
    fn test_jitter_per_unit() {
        assert_eq!(TemperatureUnit::Celsius.jitter(), 0.3);
        assert!((TemperatureUnit::Fahrenheit.jitter() - 0.54).abs() < 1e-9);
    }

    #[test]
    fn test_humidity_status_boundaries() {
        assert_eq!(humidity_status(25.0), 2);
        assert_eq!(humidity_status(30.0), 0);
        assert_eq!(humidity_status(44.0), 0);
        assert_eq!(humidity_status(45.0), 1);
        assert_eq!(humidity_status(69.0), 1);
        assert_eq!(humidity_status(70.0), 3);
    }

    #[test]
    fn test_humidity_status_fractional() {
        assert_eq!(humidity_status(29.9), 2);
        assert_eq!(humidity_status(44.99), 0);
        assert_eq!(humidity_status(69.9), 1);
        assert_eq!(humidity_status(99.9), 3);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(20.0), "20.0");
        assert_eq!(format_value(21.5), "21.5");
        assert_eq!(format_value(-3.0), "-3.0");
        assert_eq!(format_value(68.18), "68.18");
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(TemperatureUnit::Celsius.to_string(), "C");
        assert_eq!(TemperatureUnit::Fahrenheit.to_string(), "F");
    }
}
