//! Publish gating for validated readings.
//!
//! The gate decides whether a reading that survived the outlier filter is
//! worth sending to the broker now. A value update goes out on cold start,
//! when both values changed (if change detection is enabled) or when the
//! last update is older than the configured delay. Everything else is
//! suppressed and only the heartbeat is sent.

use crate::reading::{Detected, Reading};
use std::time::{Duration, Instant};

/// Default maximum time between two value updates.
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_secs(900);

/// Policy knobs for the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Publish at least this often, even when values are unchanged
    pub update_delay: Duration,
    /// Publish as soon as both temperature and humidity changed
    pub update_on_every_change: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            update_delay: DEFAULT_UPDATE_DELAY,
            update_on_every_change: false,
        }
    }
}

/// Values and time of the last successful publish.
///
/// Both values at zero means nothing was published yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishState {
    pub last_temperature: f64,
    pub last_humidity: f64,
    pub last_publish: Instant,
}

impl PublishState {
    pub fn new(started: Instant) -> Self {
        Self {
            last_temperature: 0.0,
            last_humidity: 0.0,
            last_publish: started,
        }
    }

    pub fn is_first_time(&self) -> bool {
        self.last_temperature == 0.0 && self.last_humidity == 0.0
    }
}

/// Outcome of a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Send the value payload
    Publish,
    /// The reading was not trustworthy (outlier, bootstrapping or sensor error)
    Rejected(Detected),
    /// The reading is fine but nothing warrants an update yet
    Unchanged {
        changed: bool,
        elapsed: Duration,
    },
}

impl GateDecision {
    pub fn should_publish(&self) -> bool {
        matches!(self, GateDecision::Publish)
    }
}

/// Decides, per tick, whether a value update is sent.
#[derive(Debug)]
pub struct PublishGate {
    policy: GatePolicy,
    state: PublishState,
}

impl PublishGate {
    /// Create a gate whose update timer starts now.
    pub fn new(policy: GatePolicy) -> Self {
        Self::started_at(policy, Instant::now())
    }

    /// Create a gate whose update timer started at `started`.
    pub fn started_at(policy: GatePolicy, started: Instant) -> Self {
        PublishGate {
            policy,
            state: PublishState::new(started),
        }
    }

    pub fn state(&self) -> &PublishState {
        &self.state
    }

    /// Decide for the current tick using the current time.
    ///
    /// `reading` is `None` when the sensor read failed.
    pub fn decide(&mut self, detected: Detected, reading: Option<&Reading>) -> GateDecision {
        self.decide_at(detected, reading, Instant::now())
    }

    /// Decide for the current tick at time `now`.
    ///
    /// The publish state is only updated when the decision is [`GateDecision::Publish`].
    pub fn decide_at(
        &mut self,
        detected: Detected,
        reading: Option<&Reading>,
        now: Instant,
    ) -> GateDecision {
        let reading = match reading {
            Some(reading) if detected.is_publishable() => reading,
            _ => return GateDecision::Rejected(detected),
        };

        let changed = self.policy.update_on_every_change
            && reading.temperature != self.state.last_temperature
            && reading.humidity != self.state.last_humidity;
        let elapsed = now.saturating_duration_since(self.state.last_publish);

        if changed || self.state.is_first_time() || elapsed >= self.policy.update_delay {
            self.state = PublishState {
                last_temperature: reading.temperature,
                last_humidity: reading.humidity,
                last_publish: now,
            };
            GateDecision::Publish
        } else {
            GateDecision::Unchanged { changed, elapsed }
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports `ms`, `s`, `m` and `h` suffixes. Without a suffix the value is
/// interpreted as seconds.
///
/// # Examples
/// ```
/// use dht_mqtt::gate::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("900").unwrap(), Duration::from_secs(900));
/// assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // `ms` must be tried before `m` and `s`.
    let units: [(&str, &str, u64); 4] = [
        ("ms", "milliseconds", 0),
        ("h", "hours", 3600),
        ("m", "minutes", 60),
        ("s", "seconds", 1),
    ];

    for (suffix, name, secs_per_unit) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid {}: {}", name, num))?;
            if secs_per_unit == 0 {
                return Ok(Duration::from_millis(value));
            }
            return value
                .checked_mul(secs_per_unit)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("{} out of range: {}", name, num));
        }
    }

    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}
