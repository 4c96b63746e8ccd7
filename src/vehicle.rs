use crate::arm::{Arm, Movement};
use crate::geometry::{Layout, TurnPath};
use crate::math::{project_local, ParametricCurve2d, Point2d, Vector2d};
use crate::signal::SignalView;
use crate::VehicleId;
use cgmath::prelude::*;

/// Tolerance used when comparing positions along an arm.
const EPSILON: f64 = 1e-9;

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID.
    id: VehicleId,
    /// The order in which the vehicle was spawned.
    seq: usize,
    /// The arm the vehicle arrived on.
    arm: Arm,
    /// The movement the vehicle makes, fixed by its lane.
    movement: Movement,
    /// Half the vehicle's length.
    half_len: f64,
    /// Half the vehicle's width.
    half_wid: f64,
    /// The world space coordinates of the centre of the vehicle.
    pos: Point2d,
    /// A unit vector aligned with the vehicle's heading.
    dir: Vector2d,
    /// Where the vehicle is in its journey.
    stage: Stage,
    /// The time spent stopped at a red signal, in s.
    wait: f64,
    /// Whether the vehicle failed to move during the last step.
    halted: bool,
}

/// The lifecycle stage of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleStage {
    Approach,
    Turning,
    Exit,
}

#[derive(Clone, Debug)]
enum Stage {
    Approach,
    Turning(TurnPath),
    Exit { arm: Arm },
}

impl Vehicle {
    /// Creates a new vehicle in the given approach lane, at the spawn distance.
    pub(crate) fn new(id: VehicleId, seq: usize, arm: Arm, lane: usize, layout: &Layout) -> Self {
        let movement = Movement::from_lane(lane);
        Self {
            id,
            seq,
            arm,
            movement,
            half_len: layout.half_len,
            half_wid: layout.half_wid,
            pos: layout.approach_point(arm, lane, layout.spawn_distance),
            dir: arm.inbound(),
            stage: Stage::Approach,
            wait: 0.0,
            halted: false,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The order in which the vehicle was spawned.
    pub fn seq(&self) -> usize {
        self.seq
    }

    /// The arm the vehicle arrived on.
    pub fn arm(&self) -> Arm {
        self.arm
    }

    /// The approach lane the vehicle arrived in.
    pub fn lane(&self) -> usize {
        self.movement.lane()
    }

    pub fn movement(&self) -> Movement {
        self.movement
    }

    /// The vehicle's length.
    pub fn length(&self) -> f64 {
        2.0 * self.half_len
    }

    /// The vehicle's width.
    pub fn width(&self) -> f64 {
        2.0 * self.half_wid
    }

    /// The coordinates in world space of the centre of the vehicle.
    pub fn position(&self) -> Point2d {
        self.pos
    }

    /// A unit vector in world space aligned with the vehicle's heading.
    pub fn direction(&self) -> Vector2d {
        self.dir
    }

    pub fn stage(&self) -> VehicleStage {
        match self.stage {
            Stage::Approach => VehicleStage::Approach,
            Stage::Turning(_) => VehicleStage::Turning,
            Stage::Exit { .. } => VehicleStage::Exit,
        }
    }

    /// The time the vehicle has spent stopped at a red signal, in s.
    pub fn wait(&self) -> f64 {
        self.wait
    }

    /// Whether the vehicle failed to move during the last step.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// How far along its turning path the vehicle is, while turning.
    pub fn turn_progress(&self) -> Option<f64> {
        match &self.stage {
            Stage::Turning(path) => Some(path.progress),
            _ => None,
        }
    }

    /// The exit arm, once the vehicle has left the intersection.
    pub fn exit_arm(&self) -> Option<Arm> {
        match self.stage {
            Stage::Exit { arm } => Some(arm),
            _ => None,
        }
    }

    /// The distance of the centre of the vehicle from the centre of the
    /// intersection, measured along the arm it is currently on.
    pub fn distance(&self) -> f64 {
        let arm = self.exit_arm().unwrap_or(self.arm);
        project_local(self.pos, Point2d::origin(), arm.approach_right(), arm.outward()).y
    }

    /// The distance from the centre of the front of an approaching vehicle.
    pub fn front_distance(&self) -> f64 {
        self.distance() - self.half_len
    }

    /// The distance from the centre of the rear of an approaching vehicle.
    pub fn rear_distance(&self) -> f64 {
        self.distance() + self.half_len
    }

    /// Advances the vehicle by one step.
    /// Returns `true` iff the vehicle has left the simulated area.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    /// * `layout` - The geometry of the intersection
    /// * `signals` - The signals governing the stop lines
    /// * `gap` - The gap to the vehicle ahead in the same lane, if there is one
    pub(crate) fn step(
        &mut self,
        dt: f64,
        layout: &Layout,
        signals: &impl SignalView,
        gap: Option<f64>,
    ) -> bool {
        match self.stage {
            Stage::Approach => {
                let can_go = signals.can_go(self.arm, self.movement);
                self.step_approach(dt, layout, can_go, gap);
                false
            }
            Stage::Turning(_) => {
                self.step_turning(layout);
                false
            }
            Stage::Exit { .. } => self.step_exit(layout),
        }
    }

    fn step_approach(&mut self, dt: f64, layout: &Layout, can_go: bool, gap: Option<f64>) {
        let to_stop = self.front_distance() - layout.stop_line;

        // Hold at the stop line while red
        if to_stop <= EPSILON && !can_go {
            self.halted = true;
            self.wait += dt;
            return;
        }

        // Blocked by the vehicle ahead
        if gap.map_or(false, |gap| gap < layout.min_gap) {
            self.halted = true;
            return;
        }

        let mut advance = f64::min(layout.speed, to_stop.max(0.0));
        if let Some(gap) = gap {
            advance = advance.min(gap - layout.min_gap);
        }
        self.pos += self.arm.inbound() * advance;
        self.halted = advance <= EPSILON;

        if can_go && self.front_distance() - layout.stop_line <= EPSILON {
            self.begin_turn(layout);
        }
    }

    /// Enters the intersection, snapping to the start of the turning path.
    fn begin_turn(&mut self, layout: &Layout) {
        let path = layout.turn_path(self.arm, self.movement);
        self.pos = path.curve.start();
        self.stage = Stage::Turning(path);
        self.halted = false;
    }

    fn step_turning(&mut self, layout: &Layout) {
        let Stage::Turning(path) = &mut self.stage else {
            return;
        };
        path.progress += layout.speed / path.length;

        if path.progress >= 1.0 {
            let arm = path.exit_arm;
            self.pos = layout.exit_point(arm, path.exit_lane, layout.path_end_distance());
            self.dir = arm.outward();
            self.stage = Stage::Exit { arm };
        } else {
            self.pos = path.curve.sample(path.progress);
            let tan = path.curve.sample_dt(path.progress);
            if tan.magnitude2() > 0.0 {
                self.dir = tan.normalize();
            }
        }
    }

    fn step_exit(&mut self, layout: &Layout) -> bool {
        self.pos += self.dir * layout.speed;
        self.distance() - self.half_len > layout.despawn_distance
    }
}
