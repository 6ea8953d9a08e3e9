use chrono::{DateTime, Utc};

const SECONDS_PER_HOUR: f64 = 3600.0;
const WATTS_PER_KILOWATT: f64 = 1000.0;

/// Accumulates power readings over wall-clock time into a kWh total.
///
/// Left-rectangle integration: each reading is held until the next
/// observation. The total lives in memory only and starts at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyIntegrator {
    total_kwh: f64,
    last_observed: Option<DateTime<Utc>>,
}

impl EnergyIntegrator {
    /// Creates an integrator with no reference timestamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an integrator whose first interval starts at `at`.
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            total_kwh: 0.0,
            last_observed: Some(at),
        }
    }

    /// Feeds one power reading in watts observed at `now`.
    /// Returns the running total in kWh.
    ///
    /// Missing readings and non-positive intervals leave the state untouched.
    /// The first observation only seeds the reference timestamp.
    pub fn observe(&mut self, power_watts: Option<f64>, now: DateTime<Utc>) -> f64 {
        let Some(power_watts) = power_watts.filter(|p| p.is_finite()) else {
            return self.total_kwh;
        };

        let Some(previous) = self.last_observed else {
            self.last_observed = Some(now);
            return self.total_kwh;
        };

        let elapsed_hours = (now - previous).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_HOUR;
        if elapsed_hours <= 0.0 {
            return self.total_kwh;
        }

        // Negative readings would make the total decrease
        self.total_kwh += power_watts.max(0.0) * elapsed_hours / WATTS_PER_KILOWATT;
        self.last_observed = Some(now);
        self.total_kwh
    }

    pub fn total_kwh(&self) -> f64 {
        self.total_kwh
    }

    /// Total rounded to two decimals, as reported to observers.
    pub fn reported_kwh(&self) -> f64 {
        (self.total_kwh * 100.0).round() / 100.0
    }

    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.last_observed
    }
}
