use crate::arm::{Arm, Movement, LANES_PER_ARM};
use crate::config::SimConfig;
use crate::geometry::Layout;
use crate::signal::SignalView;
use crate::vehicle::{Vehicle, VehicleStage};
use crate::{VehicleId, VehicleSet};
use arrayvec::ArrayVec;
use itertools::{iproduct, Itertools};
use log::debug;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;

/// The number of approaching vehicles in each lane of each arm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts([[u32; LANES_PER_ARM]; 4]);

impl QueueCounts {
    /// The number of vehicles approaching on `arm` to make `movement`.
    pub fn get(&self, arm: Arm, movement: Movement) -> u32 {
        self.0[arm.index()][movement.lane()]
    }

    /// The number of vehicles approaching on `arm`.
    pub fn arm_total(&self, arm: Arm) -> u32 {
        self.0[arm.index()].iter().sum()
    }

    /// The number of vehicles approaching on all arms.
    pub fn total(&self) -> u32 {
        Arm::ALL.iter().map(|arm| self.arm_total(*arm)).sum()
    }

    /// Iterates over every (arm, movement) pair and its count.
    pub fn iter(&self) -> impl Iterator<Item = (Arm, Movement, u32)> + '_ {
        iproduct!(Arm::ALL, Movement::ALL)
            .map(move |(arm, movement)| (arm, movement, self.get(arm, movement)))
    }

    fn increment(&mut self, arm: Arm, movement: Movement) {
        self.0[arm.index()][movement.lane()] += 1;
    }
}

/// Moves the vehicles of one scenario through the intersection.
#[derive(Clone, Debug)]
pub struct MotionEngine {
    /// The geometry of the intersection.
    layout: Layout,
    /// The vehicles being simulated.
    vehicles: VehicleSet,
    /// The next spawn sequence number.
    seq: usize,
    /// The number of vehicles which have left the simulation.
    passed: usize,
    /// The total wait time of vehicles which have left the simulation, in s.
    total_wait: f64,
}

impl MotionEngine {
    /// Creates an empty engine.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            layout: Layout::new(config),
            vehicles: VehicleSet::default(),
            seq: 0,
            passed: 0,
            total_wait: 0.0,
        }
    }

    /// The geometry of the intersection.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Adds a vehicle to the approach lane `lane` of `arm`.
    ///
    /// # Panics
    /// If `lane` is not a valid lane index.
    pub fn spawn(&mut self, arm: Arm, lane: usize) -> VehicleId {
        let seq = self.seq;
        self.seq += 1;
        let layout = &self.layout;
        let id = self
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, seq, arm, lane, layout));
        debug!("Spawned vehicle {} on the {} arm, lane {}", seq, arm, lane);
        id
    }

    /// Advances every vehicle by one step of `dt` seconds.
    pub fn step(&mut self, dt: f64, signals: &impl SignalView) {
        let gaps = self.leader_gaps();

        let mut finished = vec![];
        for (id, vehicle) in &mut self.vehicles {
            if vehicle.step(dt, &self.layout, signals, gaps.get(id).copied()) {
                finished.push(id);
            }
        }

        for id in finished {
            if let Some(vehicle) = self.vehicles.remove(id) {
                self.passed += 1;
                self.total_wait += vehicle.wait();
            }
        }
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Gets a reference to the vehicle with the given ID, if it is still simulated.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle_id)
    }

    /// The number of vehicles spawned so far.
    pub fn spawned(&self) -> usize {
        self.seq
    }

    /// The number of vehicles currently simulated.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Counts the approaching vehicles in each lane of each arm.
    pub fn queue_counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for vehicle in self.approaching() {
            counts.increment(vehicle.arm(), vehicle.movement());
        }
        counts
    }

    /// The number of vehicles which have left the simulation.
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// The total time vehicles which have left the simulation spent waiting at red signals, in s.
    pub fn total_wait(&self) -> f64 {
        self.total_wait
    }

    /// The mean wait of the vehicles which have left the simulation, in s.
    pub fn average_wait(&self) -> f64 {
        if self.passed == 0 {
            0.0
        } else {
            self.total_wait / self.passed as f64
        }
    }

    /// Whether the queue on `arm` has backed up to the edge of the visible area.
    pub fn is_jammed(&self, arm: Arm) -> bool {
        let limit = self.layout.world_half_size - self.layout.jam_distance;
        self.approaching()
            .filter(|vehicle| vehicle.arm() == arm && vehicle.halted())
            .any(|vehicle| vehicle.rear_distance() >= limit)
    }

    /// The arms whose queues have backed up to the edge of the visible area.
    pub fn jammed_arms(&self) -> ArrayVec<Arm, 4> {
        Arm::ALL.into_iter().filter(|arm| self.is_jammed(*arm)).collect()
    }

    fn approaching(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles
            .values()
            .filter(|vehicle| vehicle.stage() == VehicleStage::Approach)
    }

    /// Finds the bumper-to-bumper gap between each approaching vehicle and the
    /// approaching vehicle ahead of it in the same lane, as of the start of the step.
    fn leader_gaps(&self) -> SecondaryMap<VehicleId, f64> {
        let mut queue = self
            .approaching()
            .map(|v| (v.arm(), v.lane(), v.distance(), v.seq(), v.id(), v.length()))
            .collect::<Vec<_>>();
        queue.sort_by(|a, b| {
            (a.0, a.1)
                .cmp(&(b.0, b.1))
                .then(a.2.total_cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let mut gaps = SecondaryMap::new();
        for (leader, follower) in queue.iter().tuple_windows() {
            if (leader.0, leader.1) == (follower.0, follower.1) {
                let leader_rear = leader.2 + 0.5 * leader.5;
                let follower_front = follower.2 - 0.5 * follower.5;
                gaps.insert(follower.4, follower_front - leader_rear);
            }
        }
        gaps
    }
}
