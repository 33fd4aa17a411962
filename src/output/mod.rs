//! Output formatters for sensor readings.
//!
//! [`PayloadFormatter`] turns an accepted reading into the broker payload;
//! [`domoticz`] implements the Domoticz `udevice` command. [`csv`] renders
//! the per-run recording and error logs.

pub mod csv;
pub mod domoticz;

use crate::reading::Reading;

/// Trait for formatting readings into broker payloads.
///
/// Implementations convert a `Reading` into the string published on the value
/// topic of a specific consumer (e.g., Domoticz JSON).
pub trait PayloadFormatter: Send + Sync {
    /// Format a reading.
    ///
    /// # Arguments
    /// * `reading` - The reading to format, temperature already in the display unit
    ///
    /// # Returns
    /// The payload to publish
    fn format(&self, reading: &Reading) -> String;
}
