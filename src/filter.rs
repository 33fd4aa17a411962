//! Rolling-window outlier rejection for temperature and humidity readings.
//!
//! Each measured quantity keeps a small FIFO window of recently accepted values.
//! A new value is accepted when it lies strictly within three population standard
//! deviations of the window mean. The window bootstraps itself from cold start and
//! is flushed after a run of consecutive rejections, so a stuck or drifting sensor
//! cannot poison the statistics forever.

use crate::reading::{Classification, Reading, ReadingBatch};
use crate::units::TemperatureUnit;
use std::collections::VecDeque;

/// Maximum number of samples kept per window.
pub const WINDOW_CAPACITY: usize = 10;

/// Windows at or below this length are still bootstrapping.
pub const BOOTSTRAP_LEN: usize = 3;

/// Consecutive outliers that trigger a window flush.
pub const ERROR_FLUSH_THRESHOLD: u32 = 3;

/// Width of the acceptance band, in standard deviations.
pub const STD_DEVIATIONS: f64 = 3.0;

/// The quantity a window tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
}

/// Bounded history of recent values for one quantity.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    consecutive_errors: u32,
    /// Offset of the synthetic samples seeded around bootstrap values.
    jitter: Option<f64>,
}

impl RollingWindow {
    /// Create an empty window. When `jitter` is set, every bootstrap value is
    /// accompanied by `value - jitter` and `value + jitter`.
    pub fn new(jitter: Option<f64>) -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
            consecutive_errors: 0,
            jitter,
        }
    }

    /// Create the window for a quantity. Only temperature receives jitter seeding.
    pub fn for_quantity(quantity: Quantity, unit: TemperatureUnit) -> Self {
        match quantity {
            Quantity::Temperature => Self::new(Some(unit.jitter())),
            Quantity::Humidity => Self::new(None),
        }
    }

    /// Build a window from existing state.
    pub fn from_parts(samples: impl IntoIterator<Item = f64>, consecutive_errors: u32) -> Self {
        let mut window = Self::new(None);
        window.samples.extend(samples);
        window.consecutive_errors = consecutive_errors;
        window.evict();
        window
    }

    pub fn samples(&self) -> &VecDeque<f64> {
        &self.samples
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Whether the next value will be classified without a verdict.
    pub fn is_bootstrapping(&self) -> bool {
        self.consecutive_errors >= ERROR_FLUSH_THRESHOLD || self.samples.len() <= BOOTSTRAP_LEN
    }

    /// Classify `value` against the window, updating the window in place.
    pub fn classify(&mut self, value: f64) -> Classification {
        if self.consecutive_errors >= ERROR_FLUSH_THRESHOLD {
            self.flush();
        }

        if self.samples.len() <= BOOTSTRAP_LEN {
            self.push_unique(value);
            if let Some(jitter) = self.jitter {
                self.samples.push_back(value - jitter);
                self.samples.push_back(value + jitter);
            }
            self.evict();
            return Classification::Bootstrapping;
        }

        let (mean, std_dev) = self.mean_and_std_dev();
        let band = std_dev * STD_DEVIATIONS;

        let classification = if mean - band < value && value < mean + band {
            self.push_unique(value);
            self.consecutive_errors = 0;
            Classification::Accurate
        } else {
            self.consecutive_errors += 1;
            Classification::Outlier
        };

        self.evict();
        classification
    }

    fn flush(&mut self) {
        self.samples.clear();
        self.consecutive_errors = 0;
    }

    // Repeated identical readings neither grow the window nor refresh it.
    fn push_unique(&mut self, value: f64) {
        if !self.samples.contains(&value) {
            self.samples.push_back(value);
        }
    }

    fn evict(&mut self) {
        while self.samples.len() > WINDOW_CAPACITY {
            self.samples.pop_front();
        }
    }

    /// Population mean and standard deviation of the window.
    fn mean_and_std_dev(&self) -> (f64, f64) {
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|sample| (sample - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }
}

/// The pair of windows used for one sensor.
#[derive(Debug, Clone)]
pub struct SensorFilter {
    temperature: RollingWindow,
    humidity: RollingWindow,
}

impl SensorFilter {
    pub fn new(unit: TemperatureUnit) -> Self {
        Self {
            temperature: RollingWindow::for_quantity(Quantity::Temperature, unit),
            humidity: RollingWindow::for_quantity(Quantity::Humidity, unit),
        }
    }

    /// Run both values of a reading through their windows.
    pub fn classify(&mut self, reading: Reading) -> ReadingBatch {
        ReadingBatch {
            reading,
            temperature: self.temperature.classify(reading.temperature),
            humidity: self.humidity.classify(reading.humidity),
        }
    }

    pub fn window(&self, quantity: Quantity) -> &RollingWindow {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }
}
