use crate::advisor::{AdvisoryClient, TimingAdvisor};
use crate::arm::Arm;
use crate::config::SimConfig;
use crate::engine::MotionEngine;
use crate::events::{BulkTarget, Event, EventSource};
use crate::phase::{ExtendedPhase, Phase, RotationPhase};
use crate::signal::{PhaseEnds, SignalController};
use arrayvec::ArrayVec;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The vehicles to add to every lane when a schedule entry is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCounts {
    /// The same number of vehicles on every arm.
    Uniform(usize),
    /// A number of vehicles per arm, indexed by [Arm::index].
    PerArm([usize; 4]),
}

/// An entry of a traffic schedule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// The simulation time at which the vehicles are added, in s.
    pub time: f64,
    pub counts: ScheduleCounts,
}

/// A summary of one scenario.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioStats {
    /// The number of vehicles which have left the simulation.
    pub passed: usize,
    /// The mean wait of the vehicles which have left the simulation, in s.
    pub average_wait: f64,
    /// The number of vehicles approaching the intersection.
    pub queued: u32,
    /// The arms whose queues reach the edge of the visible area.
    pub jammed: ArrayVec<Arm, 4>,
}

/// A summary of both scenarios at the same instant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonReport {
    /// The simulation time in s.
    pub elapsed: f64,
    pub baseline: ScenarioStats,
    pub adaptive: ScenarioStats,
}

/// The vehicles and signals of one timing strategy.
#[derive(Clone, Debug)]
pub struct Scenario<P: Phase> {
    engine: MotionEngine,
    controller: SignalController<P>,
}

impl<P: Phase> Scenario<P> {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            engine: MotionEngine::new(config),
            controller: SignalController::new(config),
        }
    }

    pub fn engine(&self) -> &MotionEngine {
        &self.engine
    }

    pub fn controller(&self) -> &SignalController<P> {
        &self.controller
    }

    /// Advances the signals, then the vehicles.
    ///
    /// Returns the phases whose green time ended during this step.
    pub fn step(&mut self, dt: f64) -> PhaseEnds<P> {
        let ended = self.controller.tick(dt);
        self.engine.step(dt, &self.controller);
        ended
    }

    pub fn stats(&self) -> ScenarioStats {
        ScenarioStats {
            passed: self.engine.passed(),
            average_wait: self.engine.average_wait(),
            queued: self.engine.queue_counts().total(),
            jammed: self.engine.jammed_arms(),
        }
    }

    fn spawn(&mut self, events: &[Event]) {
        for event in events {
            self.engine.spawn(event.arm, event.lane);
        }
    }
}

/// Runs a fixed-time and an adaptive controller side by side on identical arrivals.
pub struct Simulation {
    config: SimConfig,
    /// The arrivals shared by both scenarios.
    events: EventSource,
    /// Round-robin fixed timing.
    baseline: Scenario<RotationPhase>,
    /// Timing chosen by the advisor.
    adaptive: Scenario<ExtendedPhase>,
    advisor: TimingAdvisor<ExtendedPhase>,
    client: Option<Arc<dyn AdvisoryClient>>,
    /// The loaded schedule, ordered by time.
    schedule: Vec<ScheduleEntry>,
    /// The index of the next schedule entry to play.
    schedule_pos: usize,
    /// The current frame of simulation.
    frame: usize,
}

impl Simulation {
    /// Creates a new simulation whose adaptive scenario relies on the local heuristic.
    pub fn new(config: SimConfig) -> Self {
        Self::with_client(config, None)
    }

    /// Creates a new simulation, consulting the given advisory service if any.
    pub fn with_client(config: SimConfig, client: Option<Arc<dyn AdvisoryClient>>) -> Self {
        let mut sim = Self {
            events: EventSource::from_config(&config),
            baseline: Scenario::new(&config),
            adaptive: Scenario::new(&config),
            advisor: TimingAdvisor::new(&config, client.clone()),
            client,
            schedule: vec![],
            schedule_pos: 0,
            frame: 0,
            config,
        };
        sim.kick_off();
        sim
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The simulation time in s.
    pub fn clock(&self) -> f64 {
        self.events.clock()
    }

    /// The number of frames simulated since the start or the last reset.
    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn baseline(&self) -> &Scenario<RotationPhase> {
        &self.baseline
    }

    pub fn adaptive(&self) -> &Scenario<ExtendedPhase> {
        &self.adaptive
    }

    pub fn advisor(&self) -> &TimingAdvisor<ExtendedPhase> {
        &self.advisor
    }

    /// Advances the simulation by one frame of `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.play_schedule();

        let events = self.events.tick(dt);
        self.baseline.spawn(&events);
        self.adaptive.spawn(&events);

        self.baseline.step(dt);
        let ended = self.adaptive.step(dt);

        self.advisor.poll(&mut self.adaptive.controller);
        for ended in ended {
            self.advisor.on_phase_end(
                ended,
                &self.adaptive.engine,
                &mut self.adaptive.controller,
                self.events.clock(),
            );
        }

        self.frame += 1;
    }

    /// Adds a vehicle to every lane of an arm in both scenarios.
    pub fn inject_arm(&mut self, arm: Arm) {
        self.events.inject_arm(arm);
    }

    /// Adds `count` vehicles to every lane of the targeted arms in both scenarios.
    pub fn bulk_add(&mut self, target: BulkTarget, count: usize) {
        self.events.bulk_add(target, count);
    }

    /// Replaces the traffic schedule.
    ///
    /// Each entry is played once the simulation clock reaches its time; entries
    /// whose time has already passed are played on the next frame.
    pub fn load_schedule(&mut self, entries: impl IntoIterator<Item = ScheduleEntry>) {
        self.schedule = entries.into_iter().collect();
        self.schedule.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.schedule_pos = 0;
        info!("Loaded a schedule of {} entries", self.schedule.len());
    }

    /// Restarts both scenarios from the beginning with the same seed.
    ///
    /// Any outstanding advisory request is abandoned. The loaded schedule is kept
    /// and replayed from its start.
    pub fn reset(&mut self) {
        self.advisor.cancel();
        self.events.reset();
        self.baseline = Scenario::new(&self.config);
        self.adaptive = Scenario::new(&self.config);
        self.advisor = TimingAdvisor::new(&self.config, self.client.clone());
        self.schedule_pos = 0;
        self.frame = 0;
        info!("Simulation reset");
        self.kick_off();
    }

    /// Summarises both scenarios.
    pub fn report(&self) -> ComparisonReport {
        ComparisonReport {
            elapsed: self.clock(),
            baseline: self.baseline.stats(),
            adaptive: self.adaptive.stats(),
        }
    }

    /// Asks the advisor for the first decision before any phase has ended.
    fn kick_off(&mut self) {
        self.advisor.start(
            &self.adaptive.engine,
            &mut self.adaptive.controller,
            self.events.clock(),
        );
    }

    fn play_schedule(&mut self) {
        let now = self.events.clock();
        while let Some(entry) = self.schedule.get(self.schedule_pos) {
            if entry.time > now {
                break;
            }
            match entry.counts {
                ScheduleCounts::Uniform(count) => self.events.bulk_add(BulkTarget::All, count),
                ScheduleCounts::PerArm(counts) => {
                    for (arm, count) in Arm::ALL.into_iter().zip(counts) {
                        if count > 0 {
                            self.events.bulk_add(BulkTarget::Arm(arm), count);
                        }
                    }
                }
            }
            self.schedule_pos += 1;
        }
    }
}
