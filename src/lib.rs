pub use advisor::{
    heuristic_target, AdvisorDecision, AdvisoryClient, AdvisoryRequest, AdvisoryResponse,
    DemandSnapshot, Rationale, TimingAdvisor, REASON_MAX_CHARS,
};
pub use arm::{movements_conflict, Arm, Movement, LANES_PER_ARM};
pub use cgmath;
pub use config::SimConfig;
pub use engine::{MotionEngine, QueueCounts};
pub use error::{AdvisoryError, ConfigError, ValidationError};
pub use events::{BulkTarget, Event, EventBatch, EventSource, Lcg};
pub use geometry::{Layout, TurnPath};
pub use phase::{ExtendedPhase, Phase, RotationPhase};
pub use signal::{PhaseEnds, SignalController, SignalState, SignalView, SubPhase};
pub use simulation::{
    ComparisonReport, Scenario, ScenarioStats, ScheduleCounts, ScheduleEntry, Simulation,
};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::Interval;
pub use vehicle::{Vehicle, VehicleStage};

mod advisor;
mod arm;
mod config;
mod engine;
mod error;
mod events;
mod geometry;
pub mod math;
mod phase;
mod signal;
mod simulation;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

type VehicleSet = SlotMap<VehicleId, Vehicle>;
