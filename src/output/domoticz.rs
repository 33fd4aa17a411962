//! Domoticz `udevice` JSON payload.

use crate::output::PayloadFormatter;
use crate::reading::Reading;
use crate::units::{format_value, humidity_status};
use serde::Serialize;

/// The JSON document Domoticz expects on `domoticz/in`.
#[derive(Debug, Serialize)]
struct UpdateDevice<'a> {
    command: &'a str,
    idx: Option<u64>,
    nvalue: u8,
    svalue: String,
    parse: bool,
}

/// Formatter for temperature/humidity devices (`Temp+Hum`).
///
/// The `svalue` field carries `<temperature>;<humidity>;<humidity status>`.
#[derive(Debug, Clone)]
pub struct DomoticzFormatter {
    /// Device index in Domoticz
    idx: Option<u64>,
}

impl DomoticzFormatter {
    pub fn new(idx: Option<u64>) -> Self {
        Self { idx }
    }

    fn svalue(reading: &Reading) -> String {
        format!(
            "{};{};{}",
            format_value(reading.temperature),
            format_value(reading.humidity),
            humidity_status(reading.humidity)
        )
    }
}

impl PayloadFormatter for DomoticzFormatter {
    fn format(&self, reading: &Reading) -> String {
        let document = UpdateDevice {
            command: "udevice",
            idx: self.idx,
            nvalue: 0,
            svalue: Self::svalue(reading),
            parse: false,
        };
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_string(&document).unwrap_or_default()
    }
}
