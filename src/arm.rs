//! The arms of the intersection and the movements vehicles make through it.

use crate::math::{rot90_cw, Vector2d};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The number of approach lanes on every arm, one per [Movement].
pub const LANES_PER_ARM: usize = 3;

/// One of the four approach roads meeting at the intersection.
///
/// World space has `x` pointing east and `y` pointing north, with the
/// centre of the intersection at the origin. Traffic drives on the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    North,
    East,
    South,
    West,
}

/// The directional intent of a lane, and of every vehicle spawned into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    Left,
    Straight,
    Right,
}

impl Arm {
    /// All arms in clockwise order, starting from north.
    pub const ALL: [Arm; 4] = [Arm::North, Arm::East, Arm::South, Arm::West];

    /// The index of the arm within [Arm::ALL].
    pub fn index(self) -> usize {
        self as usize
    }

    /// The next arm in clockwise order.
    pub fn clockwise(self) -> Arm {
        Self::ALL[(self.index() + 1) % 4]
    }

    /// The next arm in counter-clockwise order.
    pub fn counter_clockwise(self) -> Arm {
        Self::ALL[(self.index() + 3) % 4]
    }

    /// The arm across the intersection.
    pub fn opposite(self) -> Arm {
        Self::ALL[(self.index() + 2) % 4]
    }

    /// Whether the two arms lie on the same axis (equal or opposite).
    pub fn same_axis(self, other: Arm) -> bool {
        self == other || self.opposite() == other
    }

    /// A unit vector pointing from the centre of the intersection out along the arm.
    pub fn outward(self) -> Vector2d {
        match self {
            Arm::North => Vector2d::new(0.0, 1.0),
            Arm::East => Vector2d::new(1.0, 0.0),
            Arm::South => Vector2d::new(0.0, -1.0),
            Arm::West => Vector2d::new(-1.0, 0.0),
        }
    }

    /// The direction of travel of vehicles approaching the intersection on this arm.
    pub fn inbound(self) -> Vector2d {
        -self.outward()
    }

    /// Unit vector to the right of approaching traffic, pointing away from the centre line.
    pub fn approach_right(self) -> Vector2d {
        rot90_cw(self.inbound())
    }

    /// Unit vector to the right of departing traffic, pointing away from the centre line.
    pub fn exit_right(self) -> Vector2d {
        rot90_cw(self.outward())
    }

    /// The single-letter name of the arm.
    pub fn letter(self) -> char {
        match self {
            Arm::North => 'N',
            Arm::East => 'E',
            Arm::South => 'S',
            Arm::West => 'W',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arm::North => "north",
            Arm::East => "east",
            Arm::South => "south",
            Arm::West => "west",
        }
    }
}

impl Movement {
    /// All movements, ordered by lane index.
    pub const ALL: [Movement; 3] = [Movement::Left, Movement::Straight, Movement::Right];

    /// The movement of vehicles in the given lane.
    ///
    /// # Panics
    /// If `lane` is not less than [LANES_PER_ARM].
    pub fn from_lane(lane: usize) -> Movement {
        assert!(lane < LANES_PER_ARM, "Lane {} does not exist", lane);
        Self::ALL[lane]
    }

    /// The approach lane which carries this movement.
    pub fn lane(self) -> usize {
        self as usize
    }

    /// The lane on the exit arm which vehicles making this movement leave through.
    /// Lanes are counted outward from the centre line: lefts take the outer
    /// lane, straights the middle lane and rights the inner lane.
    pub fn exit_lane(self) -> usize {
        match self {
            Movement::Left => 2,
            Movement::Straight => 1,
            Movement::Right => 0,
        }
    }

    /// The arm a vehicle entering from `arm` leaves through.
    pub fn exit_arm(self, arm: Arm) -> Arm {
        match self {
            Movement::Left => arm.clockwise(),
            Movement::Straight => arm.opposite(),
            Movement::Right => arm.counter_clockwise(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Movement::Left => "left",
            Movement::Straight => "straight",
            Movement::Right => "right",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether two movements through the intersection can collide.
///
/// Movements from the same arm never conflict. Movements from different arms
/// conflict when they merge into the same exit arm, when an opposing left crosses
/// an opposing straight, or when they come from perpendicular arms and neither
/// of them is a right turn.
pub fn movements_conflict(a: (Arm, Movement), b: (Arm, Movement)) -> bool {
    let ((arm_a, mov_a), (arm_b, mov_b)) = (a, b);
    if arm_a == arm_b {
        return false;
    }
    if mov_a.exit_arm(arm_a) == mov_b.exit_arm(arm_b) {
        return true;
    }
    if arm_a.opposite() == arm_b {
        use Movement::*;
        matches!((mov_a, mov_b), (Left, Straight) | (Straight, Left))
    } else {
        mov_a != Movement::Right && mov_b != Movement::Right
    }
}
