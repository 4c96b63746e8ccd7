//! The closed catalogs of signal phases.

use crate::arm::{Arm, Movement};
use std::fmt::Debug;

/// A set of (arm, movement) pairs which may proceed together.
///
/// Implemented by closed enumerations; each implementation is one phase catalog.
pub trait Phase: Copy + Eq + Debug + Send + 'static {
    /// Every phase in the catalog. The first member is the initial phase of a controller.
    const ALL: &'static [Self];

    /// The round-robin sequence a controller follows when no override is pending.
    const ROTATION: &'static [Self];

    /// The short identifier of the phase.
    fn key(self) -> &'static str;

    /// The position of the phase within [Phase::ALL].
    fn index(self) -> usize;

    /// Whether the phase gives right of way to the movement.
    fn allows(self, arm: Arm, movement: Movement) -> bool;

    /// The phase that gives right of way to every movement of a single arm.
    fn for_arm(arm: Arm) -> Self;

    /// The arm whose position in the clockwise rotation this phase occupies.
    fn rotation_arm(self) -> Arm;

    /// Looks up a phase by its key.
    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|phase| phase.key() == key)
    }

    /// The single-arm phase clockwise after this one.
    fn successor(self) -> Self {
        Self::for_arm(self.rotation_arm().clockwise())
    }
}

/// The four single-arm phases served in turn by a fixed-time controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RotationPhase {
    North,
    East,
    South,
    West,
}

/// The single-arm phases plus a phase for each movement of each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtendedPhase {
    North,
    East,
    South,
    West,
    NorthSouthLeft,
    NorthSouthStraight,
    NorthSouthRight,
    EastWestLeft,
    EastWestStraight,
    EastWestRight,
}

impl Phase for RotationPhase {
    const ALL: &'static [Self] = &[Self::North, Self::East, Self::South, Self::West];
    const ROTATION: &'static [Self] = Self::ALL;

    fn key(self) -> &'static str {
        match self {
            Self::North => "N",
            Self::East => "E",
            Self::South => "S",
            Self::West => "W",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn allows(self, arm: Arm, _movement: Movement) -> bool {
        arm == self.rotation_arm()
    }

    fn for_arm(arm: Arm) -> Self {
        match arm {
            Arm::North => Self::North,
            Arm::East => Self::East,
            Arm::South => Self::South,
            Arm::West => Self::West,
        }
    }

    fn rotation_arm(self) -> Arm {
        match self {
            Self::North => Arm::North,
            Self::East => Arm::East,
            Self::South => Arm::South,
            Self::West => Arm::West,
        }
    }
}

impl Phase for ExtendedPhase {
    const ALL: &'static [Self] = &[
        Self::North,
        Self::East,
        Self::South,
        Self::West,
        Self::NorthSouthLeft,
        Self::NorthSouthStraight,
        Self::NorthSouthRight,
        Self::EastWestLeft,
        Self::EastWestStraight,
        Self::EastWestRight,
    ];
    const ROTATION: &'static [Self] = &[Self::North, Self::East, Self::South, Self::West];

    fn key(self) -> &'static str {
        match self {
            Self::North => "N",
            Self::East => "E",
            Self::South => "S",
            Self::West => "W",
            Self::NorthSouthLeft => "NS_L",
            Self::NorthSouthStraight => "NS_S",
            Self::NorthSouthRight => "NS_R",
            Self::EastWestLeft => "EW_L",
            Self::EastWestStraight => "EW_S",
            Self::EastWestRight => "EW_R",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn allows(self, arm: Arm, movement: Movement) -> bool {
        use Movement::*;
        let axis = |first: Arm, mov: Movement| arm.same_axis(first) && movement == mov;
        match self {
            Self::North | Self::East | Self::South | Self::West => arm == self.rotation_arm(),
            Self::NorthSouthLeft => axis(Arm::North, Left),
            Self::NorthSouthStraight => axis(Arm::North, Straight),
            Self::NorthSouthRight => axis(Arm::North, Right),
            Self::EastWestLeft => axis(Arm::East, Left),
            Self::EastWestStraight => axis(Arm::East, Straight),
            Self::EastWestRight => axis(Arm::East, Right),
        }
    }

    fn for_arm(arm: Arm) -> Self {
        match arm {
            Arm::North => Self::North,
            Arm::East => Self::East,
            Arm::South => Self::South,
            Arm::West => Self::West,
        }
    }

    /// Paired phases take the place of the first arm of their axis.
    fn rotation_arm(self) -> Arm {
        match self {
            Self::North => Arm::North,
            Self::East => Arm::East,
            Self::South => Arm::South,
            Self::West => Arm::West,
            Self::NorthSouthLeft | Self::NorthSouthStraight | Self::NorthSouthRight => Arm::North,
            Self::EastWestLeft | Self::EastWestStraight | Self::EastWestRight => Arm::East,
        }
    }
}
