use crate::error::ConfigError;
use crate::util::Interval;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The tunable parameters of a simulation, fixed at construction.
///
/// Distances are in world units, where the default lane is 10 units wide.
/// Vehicle speeds are in world units per simulated frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// The width of a single lane.
    pub lane_width: f64,
    /// Half the width of the square box in which the arms meet.
    pub intersection_half_size: f64,
    /// Half the width of the visible area around the intersection.
    pub world_half_size: f64,
    /// Distance from the centre at which new vehicles are placed, beyond the visible area.
    pub spawn_distance: f64,
    /// How far past the visible area exiting vehicles travel before they are removed.
    pub despawn_margin: f64,
    /// Clearance between the intersection box and the front of a stopped vehicle.
    pub stop_margin: f64,
    /// The vehicle length.
    pub vehicle_length: f64,
    /// The vehicle width.
    pub vehicle_width: f64,
    /// The minimum bumper-to-bumper gap between queued vehicles.
    pub min_gap: f64,
    /// The distance a moving vehicle covers every frame.
    pub speed: f64,
    /// The green time of every phase until it is overridden, in s.
    pub green_secs: f64,
    /// The yellow clearance time in s.
    pub yellow_secs: f64,
    /// The all-red clearance time in s.
    pub all_red_secs: f64,
    /// The admissible green durations accepted by a signal controller, in s.
    pub controller_duration_bounds: Interval<f64>,
    /// The probability of a background arrival in each lane on each frame.
    pub spawn_probability: f64,
    /// The seed of the arrival generator.
    pub seed: u32,
    /// An arm is jammed when a stopped queue reaches within this distance
    /// of the edge of the visible area.
    pub jam_distance: f64,
    /// The admissible green durations chosen by the timing advisor, in s.
    pub advisory_duration_bounds: Interval<f64>,
    /// How long to wait for the advisory service before falling back.
    pub advisory_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lane_width: 10.0,
            intersection_half_size: 30.0,
            world_half_size: 300.0,
            spawn_distance: 340.0,
            despawn_margin: 60.0,
            stop_margin: 2.0,
            vehicle_length: 14.0,
            vehicle_width: 7.0,
            min_gap: 6.0,
            speed: 2.0,
            green_secs: 12.0,
            yellow_secs: 3.0,
            all_red_secs: 1.0,
            controller_duration_bounds: Interval::new(5.0, 60.0),
            spawn_probability: 0.004,
            seed: 1337,
            jam_distance: 40.0,
            advisory_duration_bounds: Interval::new(5.0, 45.0),
            advisory_timeout: Duration::from_secs(9),
        }
    }
}

impl SimConfig {
    /// Parses a configuration from JSON. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the signal timings, which must leave every phase a positive green time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |field: &'static str, rule, value: f64, ok: bool| {
            if ok && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { field, rule, value })
            }
        };
        check("green_secs", "positive", self.green_secs, self.green_secs > 0.0)?;
        check("yellow_secs", "at least 0", self.yellow_secs, self.yellow_secs >= 0.0)?;
        check("all_red_secs", "at least 0", self.all_red_secs, self.all_red_secs >= 0.0)?;
        for (field, bounds) in [
            ("controller_duration_bounds", self.controller_duration_bounds),
            ("advisory_duration_bounds", self.advisory_duration_bounds),
        ] {
            check(field, "a positive lower bound", bounds.min, bounds.min > 0.0)?;
            check(field, "an upper bound above the lower", bounds.max, bounds.max >= bounds.min)?;
        }
        Ok(())
    }

    /// Distance from the centre, along an arm, of the line that the front of a
    /// vehicle must not cross while its movement is red.
    pub fn stop_line(&self) -> f64 {
        self.intersection_half_size + self.stop_margin
    }

    /// Distance from the centre beyond which exiting vehicles are removed.
    pub fn despawn_distance(&self) -> f64 {
        self.world_half_size + self.despawn_margin
    }
}
