use crate::arm::{Arm, Movement};
use crate::config::SimConfig;
use crate::error::ValidationError;
use crate::phase::Phase;
use crate::util::Interval;
use log::{debug, warn};
use smallvec::SmallVec;

/// No green time is ever shorter than this, in s.
const MIN_GREEN_SECS: f64 = 1.0;

/// The phases whose green time ended during one tick, oldest first.
pub type PhaseEnds<P> = SmallVec<[P; 2]>;

/// The clearance stage within the active phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubPhase {
    Green,
    Yellow,
    AllRed,
}

/// The aspect shown to a single movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    Red,
    Yellow,
    Green,
}

/// Anything vehicles can ask for permission to enter the intersection.
pub trait SignalView {
    /// Whether vehicles making the movement may cross the stop line.
    fn can_go(&self, arm: Arm, movement: Movement) -> bool;
}

/// The signal timing of one intersection, cycling through the phases of catalog `P`.
#[derive(Clone, Debug)]
pub struct SignalController<P: Phase> {
    /// The active phase.
    phase: P,
    /// The stage of the active phase.
    sub_phase: SubPhase,
    /// The time spent in the current sub-phase in s.
    elapsed: f64,
    /// The green time of each phase in s, indexed by [Phase::index].
    green_secs: Vec<f64>,
    /// The yellow time in s.
    yellow_secs: f64,
    /// The all-red time in s.
    all_red_secs: f64,
    /// The range that overriding green durations are clamped to.
    bounds: Interval<f64>,
    /// The phase to serve after the current one, if overridden.
    pending: Option<P>,
    /// The position of the active phase within [Phase::ROTATION].
    rotation: usize,
    /// The number of phase changes so far.
    cycle: u64,
}

impl<P: Phase> SignalController<P> {
    /// Creates a new controller showing green for the first phase of the catalog.
    ///
    /// The configured green time is clamped like any override. Clearance times
    /// below zero, or not finite, are treated as zero.
    pub fn new(config: &SimConfig) -> Self {
        let phase = P::ALL[0];
        let bounds = config.controller_duration_bounds;
        let green = clamp_green(bounds, config.green_secs);
        if green != config.green_secs {
            warn!("Green time {}s clamped to {}s", config.green_secs, green);
        }
        Self {
            phase,
            sub_phase: SubPhase::Green,
            elapsed: 0.0,
            green_secs: vec![green; P::ALL.len()],
            yellow_secs: clearance(config.yellow_secs),
            all_red_secs: clearance(config.all_red_secs),
            bounds,
            pending: None,
            rotation: P::ROTATION.iter().position(|p| *p == phase).unwrap_or(0),
            cycle: 0,
        }
    }

    /// The active phase.
    pub fn phase(&self) -> P {
        self.phase
    }

    /// The stage of the active phase.
    pub fn sub_phase(&self) -> SubPhase {
        self.sub_phase
    }

    /// The time spent in the current sub-phase in s.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// The number of times a new phase has turned green since the controller was created.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The phase that will follow the current one, if one has been requested.
    pub fn pending(&self) -> Option<P> {
        self.pending
    }

    /// The green time of the phase in s.
    pub fn green_duration(&self, phase: P) -> f64 {
        self.green_secs[phase.index()]
    }

    /// The aspect shown to the movement.
    pub fn signal_state(&self, arm: Arm, movement: Movement) -> SignalState {
        if !self.phase.allows(arm, movement) {
            return SignalState::Red;
        }
        match self.sub_phase {
            SubPhase::Green => SignalState::Green,
            SubPhase::Yellow => SignalState::Yellow,
            SubPhase::AllRed => SignalState::Red,
        }
    }

    /// Advances the signal timing by `dt` seconds.
    ///
    /// Returns every phase whose green time ended during this step. A step longer
    /// than a whole phase ends more than one.
    pub fn tick(&mut self, dt: f64) -> PhaseEnds<P> {
        self.elapsed += dt;
        let mut ended = PhaseEnds::new();
        while self.elapsed >= self.sub_phase_secs() {
            self.elapsed -= self.sub_phase_secs();
            match self.sub_phase {
                SubPhase::Green => {
                    self.sub_phase = SubPhase::Yellow;
                    ended.push(self.phase);
                }
                SubPhase::Yellow => {
                    self.sub_phase = SubPhase::AllRed;
                }
                SubPhase::AllRed => {
                    self.sub_phase = SubPhase::Green;
                    self.advance_phase();
                }
            }
            debug!("Signal now {:?} on phase {}", self.sub_phase, self.phase.key());
        }
        ended
    }

    /// Requests that `phase` be served next with a green time of `duration` seconds.
    ///
    /// The duration is clamped to the controller's admissible range and kept as the
    /// phase's green time until overridden again. When `phase` is already showing
    /// green, the duration applies to the running green and nothing is queued.
    pub fn set_next_phase(&mut self, phase: P, duration: f64) -> Result<(), ValidationError> {
        if !duration.is_finite() {
            return Err(ValidationError::InvalidDuration(duration));
        }
        let duration = clamp_green(self.bounds, duration);
        self.green_secs[phase.index()] = duration;
        if self.phase == phase && self.sub_phase == SubPhase::Green {
            debug!("Running phase {} extended to {}s", phase.key(), duration);
        } else {
            self.pending = Some(phase);
            debug!("Phase {} queued next for {}s", phase.key(), duration);
        }
        Ok(())
    }

    /// Like [Self::set_next_phase], with the phase named by its key.
    pub fn set_next_phase_key(&mut self, key: &str, duration: f64) -> Result<(), ValidationError> {
        let phase = P::from_key(key).ok_or_else(|| ValidationError::UnknownPhase(key.to_owned()))?;
        self.set_next_phase(phase, duration)
    }

    /// The length of the current sub-phase in s.
    fn sub_phase_secs(&self) -> f64 {
        match self.sub_phase {
            SubPhase::Green => self.green_duration(self.phase),
            SubPhase::Yellow => self.yellow_secs,
            SubPhase::AllRed => self.all_red_secs,
        }
    }

    /// Moves on to the pending phase, or the next phase of the rotation.
    fn advance_phase(&mut self) {
        match self.pending.take() {
            Some(phase) => {
                if let Some(idx) = P::ROTATION.iter().position(|p| *p == phase) {
                    self.rotation = idx;
                }
                self.phase = phase;
            }
            None => {
                self.rotation = (self.rotation + 1) % P::ROTATION.len();
                self.phase = P::ROTATION[self.rotation];
            }
        }
        self.cycle += 1;
    }
}

fn clamp_green(bounds: Interval<f64>, secs: f64) -> f64 {
    bounds.clamp(secs).max(MIN_GREEN_SECS)
}

fn clearance(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

impl<P: Phase> SignalView for SignalController<P> {
    fn can_go(&self, arm: Arm, movement: Movement) -> bool {
        self.sub_phase == SubPhase::Green && self.phase.allows(arm, movement)
    }
}
