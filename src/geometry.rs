//! The fixed geometry of the intersection: lane positions, stop lines and turning paths.

use crate::arm::{Arm, Movement};
use crate::config::SimConfig;
use crate::math::{arc_length, CubicBezier2d, Point2d};
use cgmath::prelude::*;

/// The number of chords used to approximate the length of a turning path.
const PATH_SEGMENTS: usize = 24;

/// How far the pivot of a turning path lies from the centre, as a fraction of the half-size.
const PIVOT_FRACTION: f64 = 0.5;

/// How far the control points of a turning path are pulled toward its pivot.
const PIVOT_PULL: f64 = 0.55;

/// Distances and sizes derived from a [SimConfig].
#[derive(Clone, Debug)]
pub struct Layout {
    pub lane_width: f64,
    pub half_size: f64,
    pub world_half_size: f64,
    pub spawn_distance: f64,
    pub despawn_distance: f64,
    /// Distance from the centre of the stop line on every arm.
    pub stop_line: f64,
    pub half_len: f64,
    pub half_wid: f64,
    pub min_gap: f64,
    pub speed: f64,
    pub jam_distance: f64,
}

/// The route of a vehicle through the intersection.
#[derive(Clone, Copy, Debug)]
pub struct TurnPath {
    /// The curve followed by the centre of the vehicle.
    pub curve: CubicBezier2d,
    /// The approximate length of the curve.
    pub length: f64,
    /// How far along the curve the vehicle is, from 0 to 1.
    pub progress: f64,
    /// The arm the vehicle leaves through.
    pub exit_arm: Arm,
    /// The lane of the exit arm the vehicle leaves in.
    pub exit_lane: usize,
}

impl Layout {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            lane_width: config.lane_width,
            half_size: config.intersection_half_size,
            world_half_size: config.world_half_size,
            spawn_distance: config.spawn_distance,
            despawn_distance: config.despawn_distance(),
            stop_line: config.stop_line(),
            half_len: 0.5 * config.vehicle_length,
            half_wid: 0.5 * config.vehicle_width,
            min_gap: config.min_gap,
            speed: config.speed,
            jam_distance: config.jam_distance,
        }
    }

    /// A point in an approach lane, `dist` from the centre along the arm.
    pub fn approach_point(&self, arm: Arm, lane: usize, dist: f64) -> Point2d {
        let lat = (lane as f64 + 0.5) * self.lane_width;
        Point2d::from_vec(arm.outward() * dist + arm.approach_right() * lat)
    }

    /// A point in an exit lane, `dist` from the centre along the arm.
    pub fn exit_point(&self, arm: Arm, lane: usize, dist: f64) -> Point2d {
        let lat = (lane as f64 + 0.5) * self.lane_width;
        Point2d::from_vec(arm.outward() * dist + arm.exit_right() * lat)
    }

    /// The distance from the centre of a vehicle's centre when its front is on the stop line.
    pub fn stop_distance(&self) -> f64 {
        self.stop_line + self.half_len
    }

    /// Distance from the centre along the exit arm at which turning paths end.
    pub fn path_end_distance(&self) -> f64 {
        self.stop_line + self.half_len
    }

    /// Builds the path taken through the intersection by a vehicle
    /// which has stopped at the stop line of the given arm and lane.
    pub fn turn_path(&self, arm: Arm, movement: Movement) -> TurnPath {
        let exit_arm = movement.exit_arm(arm);
        let exit_lane = movement.exit_lane();
        let start = self.approach_point(arm, movement.lane(), self.stop_distance());
        let end = self.exit_point(exit_arm, exit_lane, self.path_end_distance());

        let curve = match movement {
            Movement::Straight => CubicBezier2d::line(start, end),
            Movement::Left | Movement::Right => {
                // The corner where the approach lane meets the exit lane picks the quadrant
                let inbound = arm.inbound();
                let corner = start + inbound * (end - start).dot(inbound);
                let reach = PIVOT_FRACTION * self.half_size;
                let pivot = Point2d::new(reach * corner.x.signum(), reach * corner.y.signum());
                CubicBezier2d::toward_pivot(start, end, pivot, PIVOT_PULL)
            }
        };

        TurnPath {
            curve,
            length: arc_length(&curve, PATH_SEGMENTS),
            progress: 0.0,
            exit_arm,
            exit_lane,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::ParametricCurve2d;
    use assert_approx_eq::assert_approx_eq;
    use itertools::iproduct;

    fn layout() -> Layout {
        Layout::new(&SimConfig::default())
    }

    #[test]
    fn lanes_keep_right() {
        let layout = layout();
        // Southbound left-turn lane is just west of the centre line
        let p = layout.approach_point(Arm::North, 0, 100.0);
        assert_approx_eq!(p.x, -5.0);
        assert_approx_eq!(p.y, 100.0);
        // Eastbound traffic leaving through the east arm keeps south of the centre line
        let p = layout.exit_point(Arm::East, 2, 100.0);
        assert_approx_eq!(p.x, 100.0);
        assert_approx_eq!(p.y, -25.0);
    }

    #[test]
    fn exit_mapping_table() {
        let layout = layout();
        let expected = [
            (Arm::North, [(Arm::East, 2), (Arm::South, 1), (Arm::West, 0)]),
            (Arm::East, [(Arm::South, 2), (Arm::West, 1), (Arm::North, 0)]),
            (Arm::South, [(Arm::West, 2), (Arm::North, 1), (Arm::East, 0)]),
            (Arm::West, [(Arm::North, 2), (Arm::East, 1), (Arm::South, 0)]),
        ];
        for (arm, exits) in expected {
            for (movement, (exit_arm, exit_lane)) in Movement::ALL.into_iter().zip(exits) {
                let path = layout.turn_path(arm, movement);
                assert_eq!((path.exit_arm, path.exit_lane), (exit_arm, exit_lane));
            }
        }
    }

    #[test]
    fn paths_join_stop_line_to_exit_lane() {
        let layout = layout();
        for (arm, movement) in iproduct!(Arm::ALL, Movement::ALL) {
            let path = layout.turn_path(arm, movement);
            let start = layout.approach_point(arm, movement.lane(), layout.stop_distance());
            let end = layout.exit_point(path.exit_arm, path.exit_lane, layout.path_end_distance());
            assert_approx_eq!(path.curve.sample(0.0).distance(start), 0.0);
            assert_approx_eq!(path.curve.sample(1.0).distance(end), 0.0);
            assert!(path.length >= start.distance(end) - 1e-6);
        }
    }

    #[test]
    fn straight_paths_stay_on_axis() {
        let layout = layout();
        let path = layout.turn_path(Arm::East, Movement::Straight);
        for i in 0..=20 {
            let p = path.curve.sample(i as f64 / 20.0);
            assert_approx_eq!(p.y, 15.0);
        }
    }

    #[test]
    fn opposite_turns_from_one_arm_stay_apart() {
        let layout = layout();
        for arm in Arm::ALL {
            let left = layout.turn_path(arm, Movement::Left);
            let right = layout.turn_path(arm, Movement::Right);
            for (i, j) in iproduct!(0..=32, 0..=32) {
                let a = left.curve.sample(i as f64 / 32.0);
                let b = right.curve.sample(j as f64 / 32.0);
                assert!(a.distance(b) > 2.0 * layout.half_wid, "{:?} turns collide", arm);
            }
        }
    }

    #[test]
    fn turns_bend_around_different_quadrants() {
        let layout = layout();
        let left = layout.turn_path(Arm::North, Movement::Left).curve;
        let right = layout.turn_path(Arm::North, Movement::Right).curve;
        // Control points of the left turn lean south-west, of the right turn north-west
        assert!(left.points()[1].y < right.points()[1].y);
        assert!(left.points()[2].y < 0.0);
        assert!(right.points()[2].y > 0.0);
    }
}
