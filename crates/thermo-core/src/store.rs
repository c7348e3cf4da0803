//! Measurement store.
//!
//! The store keeps the most recent sensor readings and the timestamps of the
//! last measurement attempt and the last valid one. Sensor drivers write into
//! it from their polling loop; the web layer only ever reads.

use crate::clock::Clock;
use crate::model::{format_measurement, format_timespan};
use std::sync::{Arc, Mutex};

/// Read access to the latest sensor values.
///
/// `temperature`/`humidity` return the latest measurement attempt, which may
/// be NaN when the last read failed; the `last_*` variants return the most
/// recent valid value (NaN only if nothing was ever measured).
pub trait SensorSource: Send + Sync {
    /// Latest measured temperature in degrees celsius, NaN when unknown.
    fn temperature(&self) -> f32;

    /// Latest measured relative humidity in percent, NaN when unknown.
    fn humidity(&self) -> f32;

    /// Most recent valid temperature, NaN if never measured.
    fn last_temperature(&self) -> f32;

    /// Most recent valid humidity, NaN if never measured.
    fn last_humidity(&self) -> f32;

    /// Milliseconds since the last measurement attempt.
    fn time_since_measurement(&self) -> Option<u64>;

    /// Milliseconds since the last valid measurement.
    fn time_since_valid_measurement(&self) -> Option<u64>;

    /// Latest temperature formatted for display.
    fn temperature_string(&self) -> String {
        format_measurement(self.temperature())
    }

    /// Latest humidity formatted for display.
    fn humidity_string(&self) -> String {
        format_measurement(self.humidity())
    }

    /// Last valid temperature formatted for display.
    fn last_temperature_string(&self) -> String {
        format_measurement(self.last_temperature())
    }

    /// Last valid humidity formatted for display.
    fn last_humidity_string(&self) -> String {
        format_measurement(self.last_humidity())
    }

    /// Time since the last valid measurement formatted as `HH:MM:SS.mmm`.
    fn time_since_valid_measurement_string(&self) -> String {
        format_timespan(self.time_since_valid_measurement())
    }
}

#[derive(Debug)]
struct Readings {
    temperature: f32,
    humidity: f32,
    last_temperature: f32,
    last_humidity: f32,
    last_measurement: Option<u64>,
    last_valid_measurement: Option<u64>,
}

impl Readings {
    fn new() -> Self {
        Self {
            temperature: f32::NAN,
            humidity: f32::NAN,
            last_temperature: f32::NAN,
            last_humidity: f32::NAN,
            last_measurement: None,
            last_valid_measurement: None,
        }
    }
}

/// In-memory measurement store implementation.
pub struct SensorStore {
    clock: Arc<dyn Clock>,
    readings: Mutex<Readings>,
}

impl SensorStore {
    /// Create an empty store using the given clock for timestamps.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            readings: Mutex::new(Readings::new()),
        }
    }

    /// Record a measurement attempt.
    ///
    /// NaN values mark a failed read of that channel; a measurement counts as
    /// valid when at least one channel read back a number.
    pub fn record(&self, temperature: f32, humidity: f32) {
        let now = self.clock.millis();
        let mut readings = self.readings.lock().unwrap();
        readings.temperature = temperature;
        readings.humidity = humidity;
        readings.last_measurement = Some(now);
        if !temperature.is_nan() {
            readings.last_temperature = temperature;
        }
        if !humidity.is_nan() {
            readings.last_humidity = humidity;
        }
        if !temperature.is_nan() || !humidity.is_nan() {
            readings.last_valid_measurement = Some(now);
        }
    }
}

impl SensorSource for SensorStore {
    fn temperature(&self) -> f32 {
        self.readings.lock().unwrap().temperature
    }

    fn humidity(&self) -> f32 {
        self.readings.lock().unwrap().humidity
    }

    fn last_temperature(&self) -> f32 {
        self.readings.lock().unwrap().last_temperature
    }

    fn last_humidity(&self) -> f32 {
        self.readings.lock().unwrap().last_humidity
    }

    fn time_since_measurement(&self) -> Option<u64> {
        let last = self.readings.lock().unwrap().last_measurement?;
        Some(self.clock.millis().saturating_sub(last))
    }

    fn time_since_valid_measurement(&self) -> Option<u64> {
        let last = self.readings.lock().unwrap().last_valid_measurement?;
        Some(self.clock.millis().saturating_sub(last))
    }
}
