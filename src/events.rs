//! A reproducible source of vehicle arrivals.

use crate::arm::{Arm, LANES_PER_ARM};
use crate::config::SimConfig;
use log::debug;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Offset between the lanes of an arm when injecting vehicles, in s.
const LANE_STAGGER: f64 = 0.15;

/// Offset between successive vehicles in a lane when bulk adding, in s.
const BULK_STAGGER: f64 = 1.2;

/// A vehicle arrival.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The simulation time at which the vehicle arrives, in s.
    pub time: f64,
    /// The arm the vehicle arrives on.
    pub arm: Arm,
    /// The lane the vehicle arrives in.
    pub lane: usize,
}

/// The events emitted by a single tick.
pub type EventBatch = SmallVec<[Event; 16]>;

/// The arms targeted by a bulk addition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkTarget {
    Arm(Arm),
    All,
}

/// A linear congruential generator with the parameters from Numerical Recipes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    const MULTIPLIER: u32 = 1664525;
    const INCREMENT: u32 = 1013904223;

    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Returns a value uniformly distributed in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        self.next_u32() as f64 / 4294967296.0
    }
}

impl RngCore for Lcg {
    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        self.state
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.next_u32() as u64;
        let hi = self.next_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for Lcg {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }
}

/// Produces the vehicle arrivals shared by every scenario of a simulation.
///
/// Two sources created with the same seed and driven by the same sequence of
/// calls emit identical events.
#[derive(Clone, Debug)]
pub struct EventSource {
    seed: u32,
    spawn_probability: f64,
    rng: Lcg,
    /// The current time in s.
    clock: f64,
    /// Scheduled arrivals, ordered by time.
    schedule: Vec<Event>,
}

impl EventSource {
    /// Creates a new event source.
    pub fn new(seed: u32, spawn_probability: f64) -> Self {
        Self {
            seed,
            spawn_probability,
            rng: Lcg::new(seed),
            clock: 0.0,
            schedule: vec![],
        }
    }

    /// Creates an event source using the seed and spawn probability of a configuration.
    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.seed, config.spawn_probability)
    }

    /// The current time in s.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// The number of scheduled arrivals still to be emitted.
    pub fn pending(&self) -> usize {
        self.schedule.len()
    }

    /// Advances the clock by `dt` seconds and returns the arrivals that occur.
    ///
    /// Scheduled arrivals come first in time order, followed by one random draw
    /// for every lane of every arm.
    pub fn tick(&mut self, dt: f64) -> EventBatch {
        self.clock += dt;

        let due = self
            .schedule
            .iter()
            .position(|event| event.time > self.clock)
            .unwrap_or(self.schedule.len());
        let mut events = self.schedule.drain(..due).collect::<EventBatch>();

        for arm in Arm::ALL {
            for lane in 0..LANES_PER_ARM {
                if self.rng.next_unit() < self.spawn_probability {
                    events.push(Event {
                        time: self.clock,
                        arm,
                        lane,
                    });
                }
            }
        }

        events
    }

    /// Schedules one arrival in every lane of `arm`.
    pub fn inject_arm(&mut self, arm: Arm) {
        for lane in 0..LANES_PER_ARM {
            self.schedule_event(Event {
                time: self.clock + lane as f64 * LANE_STAGGER,
                arm,
                lane,
            });
        }
        debug!("Injected a vehicle into every lane of the {} arm", arm);
    }

    /// Schedules `count` arrivals in every lane of the targeted arms.
    pub fn bulk_add(&mut self, target: BulkTarget, count: usize) {
        let arms = match target {
            BulkTarget::Arm(arm) => vec![arm],
            BulkTarget::All => Arm::ALL.to_vec(),
        };
        for arm in arms {
            for i in 0..count {
                for lane in 0..LANES_PER_ARM {
                    self.schedule_event(Event {
                        time: self.clock + i as f64 * BULK_STAGGER + lane as f64 * LANE_STAGGER,
                        arm,
                        lane,
                    });
                }
            }
        }
        debug!("Scheduled {} vehicles per lane for {:?}", count, target);
    }

    /// Restores the seed, clears the schedule and zeroes the clock.
    pub fn reset(&mut self) {
        self.rng = Lcg::new(self.seed);
        self.schedule.clear();
        self.clock = 0.0;
    }

    /// Inserts an event after all scheduled events with the same or an earlier time.
    fn schedule_event(&mut self, event: Event) {
        let idx = self
            .schedule
            .iter()
            .position(|e| e.time > event.time)
            .unwrap_or(self.schedule.len());
        self.schedule.insert(idx, event);
    }
}
