//! Adaptive green timing, advised by an optional remote scoring service.

use crate::arm::{Arm, Movement};
use crate::config::SimConfig;
use crate::engine::{MotionEngine, QueueCounts};
use crate::error::AdvisoryError;
use crate::phase::Phase;
use crate::signal::{SignalController, SubPhase};
use crate::util::{truncate_chars, Interval};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The maximum length of a decision's reason text, in characters.
pub const REASON_MAX_CHARS: usize = 160;

/// The weight of a queued left turn relative to a straight or right turn.
const LEFT_TURN_WEIGHT: f64 = 0.25;

/// The green time given to an empty approach, before clamping.
const BASE_GREEN_SECS: f64 = 8.0;

/// The extra green time per unit of demand.
const SECS_PER_DEMAND: f64 = 1.8;

/// The queues of one scenario at the moment a phase ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DemandSnapshot {
    queues: QueueCounts,
}

impl DemandSnapshot {
    pub fn new(queues: QueueCounts) -> Self {
        Self { queues }
    }

    /// Takes a snapshot of the approaching vehicles of an engine.
    pub fn capture(engine: &MotionEngine) -> Self {
        Self::new(engine.queue_counts())
    }

    pub fn queues(&self) -> &QueueCounts {
        &self.queues
    }

    /// The weighted demand of an arm, where left turns count for a quarter.
    pub fn arm_demand(&self, arm: Arm) -> f64 {
        let count = |movement| self.queues.get(arm, movement) as f64;
        count(Movement::Straight)
            + count(Movement::Right)
            + LEFT_TURN_WEIGHT * count(Movement::Left)
    }

    /// The demand served by a phase, taken as that of the arm it stands for in the rotation.
    pub fn phase_demand<P: Phase>(&self, phase: P) -> f64 {
        self.arm_demand(phase.rotation_arm())
    }
}

/// The green time the local heuristic gives a phase with the given demand.
pub fn heuristic_target(demand: f64, bounds: Interval<f64>) -> f64 {
    bounds.clamp((BASE_GREEN_SECS + demand * SECS_PER_DEMAND).round())
}

/// The body sent to the advisory service.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdvisoryRequest {
    /// Approaching vehicles per movement, keyed like `north_left`.
    pub queues: BTreeMap<String, u32>,
    /// Weighted demand per single-arm phase key.
    pub demand: BTreeMap<&'static str, f64>,
    pub ended_phase: &'static str,
    pub next_phase: &'static str,
    pub baseline_duration: f64,
    pub heuristic_target: f64,
    pub elapsed_seconds: f64,
}

impl AdvisoryRequest {
    fn new<P: Phase>(
        snapshot: &DemandSnapshot,
        ended: P,
        next: P,
        baseline_duration: f64,
        heuristic_target: f64,
        elapsed_seconds: f64,
    ) -> Self {
        let queues = snapshot
            .queues()
            .iter()
            .map(|(arm, movement, count)| (format!("{}_{}", arm, movement), count))
            .collect();
        let demand = Arm::ALL
            .into_iter()
            .map(|arm| (P::for_arm(arm).key(), snapshot.arm_demand(arm)))
            .collect();
        Self {
            queues,
            demand,
            ended_phase: ended.key(),
            next_phase: next.key(),
            baseline_duration,
            heuristic_target,
            elapsed_seconds,
        }
    }

    /// Serializes the request as a JSON body.
    pub fn to_json(&self) -> Result<String, AdvisoryError> {
        serde_json::to_string(self).map_err(|err| AdvisoryError::Transport(err.to_string()))
    }
}

/// The body returned by the advisory service.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AdvisoryResponse {
    /// The suggested green time in s.
    pub duration: f64,
    #[serde(default)]
    pub reason: Option<String>,
    /// Whether the service claims its suggestion beats the heuristic.
    #[serde(default)]
    pub improved: Option<bool>,
    /// The phase the service would serve next. Informational only.
    #[serde(default)]
    pub next_phase: Option<String>,
}

impl AdvisoryResponse {
    pub fn parse(body: &str) -> Result<Self, AdvisoryError> {
        let response: Self = serde_json::from_str(body)
            .map_err(|err| AdvisoryError::MalformedResponse(err.to_string()))?;
        if !response.duration.is_finite() {
            return Err(AdvisoryError::MalformedResponse(format!(
                "duration {} is not finite",
                response.duration
            )));
        }
        Ok(response)
    }
}

/// A connection to the advisory service.
///
/// Implementations block until the service answers; the advisor calls them from
/// a worker thread and enforces its own deadline.
pub trait AdvisoryClient: Send + Sync {
    /// Sends a request and returns the raw response body.
    fn advise(&self, request: &AdvisoryRequest) -> Result<String, AdvisoryError>;
}

impl<F> AdvisoryClient for F
where
    F: Fn(&AdvisoryRequest) -> Result<String, AdvisoryError> + Send + Sync,
{
    fn advise(&self, request: &AdvisoryRequest) -> Result<String, AdvisoryError> {
        self(request)
    }
}

/// Why a decision's duration was chosen.
#[derive(Clone, Debug, PartialEq)]
pub enum Rationale {
    /// The remote suggestion was applied.
    Accepted,
    /// The remote suggestion was usable but further from the heuristic than the baseline.
    Rejected,
    /// No usable suggestion; `None` when no service is configured.
    Fallback(Option<AdvisoryError>),
}

/// The green time chosen for the phase following one that ended.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvisorDecision<P> {
    pub ended_phase: P,
    pub next_phase: P,
    /// The green time given to the next phase in s.
    pub duration: f64,
    pub heuristic_target: f64,
    pub rationale: Rationale,
    /// Human-readable explanation, at most [REASON_MAX_CHARS] characters.
    pub reason: String,
}

type AdviceResult = Result<AdvisoryResponse, AdvisoryError>;

/// An outstanding request to the advisory service.
struct InFlight<P> {
    ended: P,
    next: P,
    /// The controller's [SignalController::cycle] when the request was made.
    cycle: u64,
    target: f64,
    deadline: Instant,
    rx: Receiver<AdviceResult>,
}

impl<P: Phase> InFlight<P> {
    /// Whether a decision for `next` can still be applied without serving it out of turn.
    ///
    /// That holds until `next` has had its green: while the controller is still on
    /// the cycle the request was made in, or while `next` is showing the green
    /// that directly followed it.
    fn is_current(&self, controller: &SignalController<P>) -> bool {
        let cycle = controller.cycle();
        cycle == self.cycle
            || (cycle == self.cycle + 1
                && controller.phase() == self.next
                && controller.sub_phase() == SubPhase::Green)
    }
}

/// Chooses the green time of each next phase of an adaptive controller.
pub struct TimingAdvisor<P: Phase> {
    client: Option<Arc<dyn AdvisoryClient>>,
    /// The range of green times the advisor will apply.
    bounds: Interval<f64>,
    /// The green time of the fixed baseline strategy.
    baseline_secs: f64,
    timeout: Duration,
    in_flight: Option<InFlight<P>>,
    /// Set once the service reports it cannot be used.
    disabled: bool,
    last_decision: Option<AdvisorDecision<P>>,
    decisions: usize,
}

impl<P: Phase> TimingAdvisor<P> {
    /// Creates an advisor. Without a client every decision uses the local heuristic.
    pub fn new(config: &SimConfig, client: Option<Arc<dyn AdvisoryClient>>) -> Self {
        Self {
            client,
            bounds: config.advisory_duration_bounds,
            baseline_secs: config.green_secs,
            timeout: config.advisory_timeout,
            in_flight: None,
            disabled: false,
            last_decision: None,
            decisions: 0,
        }
    }

    /// Whether a request to the advisory service is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the advisory service has been given up on for the rest of the run.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The most recently applied decision.
    pub fn last_decision(&self) -> Option<&AdvisorDecision<P>> {
        self.last_decision.as_ref()
    }

    /// The number of decisions applied so far.
    pub fn decisions(&self) -> usize {
        self.decisions
    }

    /// Decides the green time of the phase following `ended`.
    ///
    /// Ignored while a previous request is outstanding, or when the controller is
    /// no longer clearing `ended`. Without a usable service the decision is applied
    /// to the controller immediately; otherwise it is applied by a later [Self::poll].
    pub fn on_phase_end(
        &mut self,
        ended: P,
        engine: &MotionEngine,
        controller: &mut SignalController<P>,
        elapsed: f64,
    ) {
        if controller.phase() != ended || controller.sub_phase() == SubPhase::Green {
            debug!("Phase {} is no longer clearing, ignoring its end", ended.key());
            return;
        }
        self.request(ended, engine, controller, elapsed);
    }

    /// Decides the green time of the phase following the one showing green now,
    /// before it has ended.
    pub fn start(
        &mut self,
        engine: &MotionEngine,
        controller: &mut SignalController<P>,
        elapsed: f64,
    ) {
        self.request(controller.phase(), engine, controller, elapsed);
    }

    fn request(
        &mut self,
        ended: P,
        engine: &MotionEngine,
        controller: &mut SignalController<P>,
        elapsed: f64,
    ) {
        if self.in_flight.is_some() {
            debug!("Advisor busy, ignoring end of phase {}", ended.key());
            return;
        }

        let snapshot = DemandSnapshot::capture(engine);
        let next = ended.successor();
        let target = heuristic_target(snapshot.phase_demand(next), self.bounds);

        let Some(client) = self.client.clone().filter(|_| !self.disabled) else {
            self.apply_fallback(controller, ended, next, target, None);
            return;
        };

        let request =
            AdvisoryRequest::new(&snapshot, ended, next, self.baseline_secs, target, elapsed);
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let result = client
                .advise(&request)
                .and_then(|body| AdvisoryResponse::parse(&body));
            // The advisor may have given up on this request
            let _ = tx.send(result);
        });
        debug!("Requested advice for phase {}", next.key());

        self.in_flight = Some(InFlight {
            ended,
            next,
            cycle: controller.cycle(),
            target,
            deadline: Instant::now() + self.timeout,
            rx,
        });
    }

    /// Applies the outstanding request's decision once it has arrived or timed out.
    ///
    /// A decision that comes back after its phase has already been served is
    /// discarded.
    pub fn poll(&mut self, controller: &mut SignalController<P>) {
        let Some(flight) = &self.in_flight else {
            return;
        };
        let result = match flight.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) if Instant::now() < flight.deadline => return,
            Err(TryRecvError::Empty) => Err(AdvisoryError::Timeout(self.timeout)),
            Err(TryRecvError::Disconnected) => Err(AdvisoryError::Transport(
                "advisory worker stopped without answering".to_owned(),
            )),
        };
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        if let Err(AdvisoryError::Configuration(_)) = &result {
            self.disabled = true;
        }
        if !flight.is_current(controller) {
            info!(
                "Discarded advice for phase {}, which was already served",
                flight.next.key()
            );
            return;
        }

        match result {
            Ok(response) => self.apply_advice(controller, flight, response),
            Err(err) => {
                let InFlight { ended, next, target, .. } = flight;
                self.apply_fallback(controller, ended, next, target, Some(err));
            }
        }
    }

    /// Abandons any outstanding request without applying a decision.
    pub fn cancel(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            info!("Abandoned advice for phase {}", flight.next.key());
        }
    }

    fn apply_advice(
        &mut self,
        controller: &mut SignalController<P>,
        flight: InFlight<P>,
        response: AdvisoryResponse,
    ) {
        let suggested = self.bounds.clamp(response.duration);
        let target = flight.target;
        let no_further = (suggested - target).abs() <= (self.baseline_secs - target).abs();
        let (duration, rationale) = if response.improved == Some(true) || no_further {
            (suggested, Rationale::Accepted)
        } else {
            (target, Rationale::Rejected)
        };
        let reason = match response.reason {
            Some(reason) => truncate_chars(&reason, REASON_MAX_CHARS),
            None => format!("advisory service suggested {}s", suggested),
        };
        self.apply(
            controller,
            AdvisorDecision {
                ended_phase: flight.ended,
                next_phase: flight.next,
                duration,
                heuristic_target: target,
                rationale,
                reason,
            },
        );
    }

    fn apply_fallback(
        &mut self,
        controller: &mut SignalController<P>,
        ended: P,
        next: P,
        target: f64,
        err: Option<AdvisoryError>,
    ) {
        let reason = match &err {
            Some(err) => {
                warn!("Falling back to heuristic timing: {}", err);
                truncate_chars(&format!("heuristic target ({})", err), REASON_MAX_CHARS)
            }
            None => "heuristic target".to_owned(),
        };
        self.apply(
            controller,
            AdvisorDecision {
                ended_phase: ended,
                next_phase: next,
                duration: target,
                heuristic_target: target,
                rationale: Rationale::Fallback(err),
                reason,
            },
        );
    }

    fn apply(&mut self, controller: &mut SignalController<P>, decision: AdvisorDecision<P>) {
        if let Err(err) = controller.set_next_phase(decision.next_phase, decision.duration) {
            warn!("Controller refused decision for {}: {}", decision.next_phase.key(), err);
            return;
        }
        info!(
            "Phase {} gets {}s after {} ({:?}): {}",
            decision.next_phase.key(),
            decision.duration,
            decision.ended_phase.key(),
            decision.rationale,
            decision.reason
        );
        self.decisions += 1;
        self.last_decision = Some(decision);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phase::{ExtendedPhase, RotationPhase};
    use crate::signal::SubPhase;
    use crossbeam_channel::{unbounded, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bounds() -> Interval<f64> {
        SimConfig::default().advisory_duration_bounds
    }

    /// An engine with `n` vehicles queued in each lane of `arm`.
    fn queued(arm: Arm, n: usize) -> MotionEngine {
        let mut engine = MotionEngine::new(&SimConfig::default());
        for _ in 0..n {
            for lane in 0..3 {
                engine.spawn(arm, lane);
            }
        }
        engine
    }

    fn advisor_with<F>(config: &SimConfig, client: F) -> TimingAdvisor<ExtendedPhase>
    where
        F: Fn(&AdvisoryRequest) -> Result<String, AdvisoryError> + Send + Sync + 'static,
    {
        TimingAdvisor::new(config, Some(Arc::new(client)))
    }

    /// A client that answers with `body` once the returned sender is dropped.
    fn gated(
        config: &SimConfig,
        body: &'static str,
    ) -> (Sender<()>, TimingAdvisor<ExtendedPhase>) {
        let (release, gate) = unbounded::<()>();
        let advisor = advisor_with(config, move |_: &AdvisoryRequest| {
            let _ = gate.recv();
            Ok(body.to_owned())
        });
        (release, advisor)
    }

    /// Polls until the outstanding request has been resolved.
    fn settle<P: Phase>(advisor: &mut TimingAdvisor<P>, ctrl: &mut SignalController<P>) {
        for _ in 0..1000 {
            advisor.poll(ctrl);
            if !advisor.is_busy() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("advice never arrived");
    }

    #[test]
    fn demand_discounts_left_turns() {
        let engine = queued(Arm::South, 4);
        let snapshot = DemandSnapshot::capture(&engine);
        assert_eq!(snapshot.arm_demand(Arm::South), 4.0 + 4.0 + 1.0);
        assert_eq!(snapshot.arm_demand(Arm::North), 0.0);
        assert_eq!(snapshot.phase_demand(ExtendedPhase::NorthSouthLeft), 0.0);
        assert_eq!(snapshot.phase_demand(RotationPhase::South), 9.0);
    }

    #[test]
    fn heuristic_stays_in_bounds() {
        assert_eq!(heuristic_target(0.0, bounds()), 8.0);
        assert_eq!(heuristic_target(9.0, bounds()), 24.0);
        assert_eq!(heuristic_target(2.5, bounds()), 13.0);
        assert_eq!(heuristic_target(1e6, bounds()), 45.0);
        assert_eq!(heuristic_target(-10.0, bounds()), 5.0);
    }

    #[test]
    fn request_names_every_queue() {
        let engine = queued(Arm::East, 2);
        let snapshot = DemandSnapshot::capture(&engine);
        let request = AdvisoryRequest::new(
            &snapshot,
            ExtendedPhase::North,
            ExtendedPhase::East,
            12.0,
            16.0,
            42.0,
        );
        assert_eq!(request.queues.len(), 12);
        assert_eq!(request.queues["east_left"], 2);
        assert_eq!(request.queues["west_right"], 0);
        assert_eq!(request.demand.len(), 4);
        assert_eq!(request.demand["E"], 4.5);

        let json: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(json["next_phase"], "E");
        assert_eq!(json["ended_phase"], "N");
        assert_eq!(json["queues"]["east_straight"], 2);
        assert_eq!(json["heuristic_target"], 16.0);
    }

    #[test]
    fn parses_responses() {
        let response = AdvisoryResponse::parse(r#"{"duration": 21.5, "improved": true}"#).unwrap();
        assert_eq!(response.duration, 21.5);
        assert_eq!(response.improved, Some(true));
        assert_eq!(response.reason, None);

        for body in ["", "{}", r#"{"duration": null}"#, r#"{"duration": "long"}"#, "[]"] {
            assert!(
                matches!(AdvisoryResponse::parse(body), Err(AdvisoryError::MalformedResponse(_))),
                "{:?} parsed",
                body
            );
        }
    }

    #[test]
    fn without_client_applies_heuristic_at_once() {
        let config = SimConfig::default();
        let mut advisor = TimingAdvisor::<RotationPhase>::new(&config, None);
        let mut ctrl = SignalController::new(&config);
        let engine = queued(Arm::East, 5);

        ctrl.tick(12.0);
        advisor.on_phase_end(RotationPhase::North, &engine, &mut ctrl, 12.0);

        assert!(!advisor.is_busy());
        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.next_phase, RotationPhase::East);
        assert_eq!(decision.duration, 28.0);
        assert_eq!(decision.rationale, Rationale::Fallback(None));
        assert_eq!(ctrl.pending(), Some(RotationPhase::East));
        assert_eq!(ctrl.green_duration(RotationPhase::East), 28.0);
    }

    #[test]
    fn paired_phases_are_followed_by_next_arm() {
        let config = SimConfig::default();
        let mut advisor = TimingAdvisor::<ExtendedPhase>::new(&config, None);
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        use ExtendedPhase::*;
        for (ended, next) in [(NorthSouthStraight, East), (EastWestLeft, South), (West, North)] {
            ctrl.set_next_phase(ended, 10.0).unwrap();
            let mut ticks = 0;
            while !ctrl.tick(0.5).contains(&ended) {
                ticks += 1;
                assert!(ticks < 200, "{:?} never ended", ended);
            }
            advisor.on_phase_end(ended, &engine, &mut ctrl, 0.0);
            assert_eq!(advisor.last_decision().unwrap().next_phase, next);
        }
        assert_eq!(advisor.decisions(), 3);
    }

    #[test]
    fn end_of_phase_not_clearing_is_ignored() {
        let config = SimConfig::default();
        let mut advisor = TimingAdvisor::<ExtendedPhase>::new(&config, None);
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 0.0);
        advisor.on_phase_end(ExtendedPhase::East, &engine, &mut ctrl, 0.0);
        assert_eq!(advisor.decisions(), 0);

        advisor.start(&engine, &mut ctrl, 0.0);
        assert_eq!(advisor.decisions(), 1);
        assert_eq!(ctrl.pending(), Some(ExtendedPhase::East));
    }

    #[test]
    fn accepts_suggestion_closer_than_baseline() {
        let config = SimConfig::default();
        let mut advisor = advisor_with(&config, |_: &AdvisoryRequest| {
            Ok(r#"{"duration": 25, "reason": "long queue"}"#.to_owned())
        });
        let mut ctrl = SignalController::new(&config);
        // Demand 9 gives a heuristic target of 24
        let engine = queued(Arm::East, 4);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        assert!(advisor.is_busy());
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.rationale, Rationale::Accepted);
        assert_eq!(decision.duration, 25.0);
        assert_eq!(decision.heuristic_target, 24.0);
        assert_eq!(decision.reason, "long queue");
        assert_eq!(ctrl.green_duration(ExtendedPhase::East), 25.0);
    }

    #[test]
    fn rejects_suggestion_further_than_baseline() {
        let config = SimConfig::default();
        let mut advisor =
            advisor_with(&config, |_: &AdvisoryRequest| Ok(r#"{"duration": 2}"#.to_owned()));
        let mut ctrl = SignalController::new(&config);
        let engine = queued(Arm::East, 4);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        settle(&mut advisor, &mut ctrl);

        // Clamped to 5, which is further from 24 than the baseline 12
        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.rationale, Rationale::Rejected);
        assert_eq!(decision.duration, 24.0);
        assert_eq!(ctrl.green_duration(ExtendedPhase::East), 24.0);
    }

    #[test]
    fn trusts_claimed_improvement() {
        let config = SimConfig::default();
        let reason = "x".repeat(500);
        let body = format!(r#"{{"duration": 90, "improved": true, "reason": "{}"}}"#, reason);
        let mut advisor = advisor_with(&config, move |_: &AdvisoryRequest| Ok(body.clone()));
        let mut ctrl = SignalController::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &MotionEngine::new(&config), &mut ctrl, 0.0);
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.rationale, Rationale::Accepted);
        assert_eq!(decision.duration, 45.0);
        assert_eq!(decision.reason.chars().count(), REASON_MAX_CHARS);
    }

    #[test]
    fn malformed_response_falls_back() {
        let config = SimConfig::default();
        let mut advisor =
            advisor_with(&config, |_: &AdvisoryRequest| Ok(r#"{"reason": "hi"}"#.to_owned()));
        let mut ctrl = SignalController::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &MotionEngine::new(&config), &mut ctrl, 0.0);
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert!(matches!(
            decision.rationale,
            Rationale::Fallback(Some(AdvisoryError::MalformedResponse(_)))
        ));
        assert_eq!(decision.duration, 8.0);
        assert!(!advisor.is_disabled());
    }

    #[test]
    fn configuration_error_disables_service() {
        let config = SimConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut advisor = advisor_with(&config, move |_: &AdvisoryRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AdvisoryError::Configuration("no endpoint".to_owned()))
        });
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        settle(&mut advisor, &mut ctrl);
        assert!(advisor.is_disabled());

        // East was given the heuristic 8 s, so it ends 12 s after north did
        assert_eq!(ctrl.tick(12.0).as_slice(), &[ExtendedPhase::East]);
        advisor.on_phase_end(ExtendedPhase::East, &engine, &mut ctrl, 24.0);
        assert!(!advisor.is_busy());
        assert_eq!(advisor.last_decision().unwrap().rationale, Rationale::Fallback(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(advisor.decisions(), 2);
    }

    #[test]
    fn single_flight_ignores_overlapping_triggers() {
        let config = SimConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut advisor = advisor_with(&config, move |_: &AdvisoryRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(r#"{"duration": 10}"#.to_owned())
        });
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        advisor.start(&engine, &mut ctrl, 0.0);
        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        advisor.start(&engine, &mut ctrl, 12.0);
        settle(&mut advisor, &mut ctrl);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(advisor.decisions(), 1);
        assert_eq!(advisor.last_decision().unwrap().next_phase, ExtendedPhase::East);
    }

    #[test]
    fn slow_service_times_out_to_heuristic() {
        let config = SimConfig {
            advisory_timeout: Duration::from_millis(20),
            ..SimConfig::default()
        };
        let mut advisor = advisor_with(&config, |_: &AdvisoryRequest| {
            thread::sleep(Duration::from_millis(500));
            Ok(r#"{"duration": 40, "improved": true}"#.to_owned())
        });
        let mut ctrl = SignalController::new(&config);
        let engine = queued(Arm::East, 2);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        advisor.poll(&mut ctrl);
        assert!(advisor.is_busy());
        assert_eq!(ctrl.pending(), None);

        thread::sleep(Duration::from_millis(40));
        advisor.poll(&mut ctrl);
        assert!(!advisor.is_busy());

        let decision = advisor.last_decision().unwrap();
        assert_eq!(
            decision.rationale,
            Rationale::Fallback(Some(AdvisoryError::Timeout(Duration::from_millis(20))))
        );
        // Demand 4.5 gives round(16.1)
        assert_eq!(decision.duration, 16.0);
        assert_eq!(ctrl.pending(), Some(ExtendedPhase::East));
    }

    #[test]
    fn cancelled_request_is_never_applied() {
        let config = SimConfig::default();
        let mut advisor =
            advisor_with(&config, |_: &AdvisoryRequest| Ok(r#"{"duration": 30}"#.to_owned()));
        let mut ctrl = SignalController::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &MotionEngine::new(&config), &mut ctrl, 0.0);
        advisor.cancel();
        thread::sleep(Duration::from_millis(20));
        advisor.poll(&mut ctrl);

        assert!(advisor.last_decision().is_none());
        assert_eq!(ctrl.pending(), None);
        assert_eq!(ctrl.green_duration(ExtendedPhase::East), 12.0);
    }

    #[test]
    fn accepts_suggestion_as_close_as_baseline() {
        let config = SimConfig::default();
        let mut advisor =
            advisor_with(&config, |_: &AdvisoryRequest| Ok(r#"{"duration": 36}"#.to_owned()));
        let mut ctrl = SignalController::new(&config);
        // Heuristic 24 lies halfway between the baseline 12 and the suggestion
        let engine = queued(Arm::East, 4);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.rationale, Rationale::Accepted);
        assert_eq!(decision.duration, 36.0);
    }

    #[test]
    fn accepts_suggestion_matching_heuristic_and_baseline() {
        let config = SimConfig::default();
        let mut advisor =
            advisor_with(&config, |_: &AdvisoryRequest| Ok(r#"{"duration": 12}"#.to_owned()));
        let mut ctrl = SignalController::new(&config);
        // Demand 2.25 gives a heuristic target of 12, equal to the baseline
        let engine = queued(Arm::East, 1);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.heuristic_target, 12.0);
        assert_eq!(decision.rationale, Rationale::Accepted);
        assert_eq!(decision.reason, "advisory service suggested 12s");
    }

    #[test]
    fn advice_for_served_phase_is_discarded() {
        let config = SimConfig::default();
        let (release, mut advisor) = gated(&config, r#"{"duration": 30, "improved": true}"#);
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);

        // East is served with its old green and south takes over before the answer
        ctrl.tick(4.0);
        assert_eq!(ctrl.phase(), ExtendedPhase::East);
        ctrl.tick(16.0);
        assert_eq!(ctrl.phase(), ExtendedPhase::South);
        advisor.poll(&mut ctrl);
        assert!(advisor.is_busy());

        drop(release);
        settle(&mut advisor, &mut ctrl);

        assert!(advisor.last_decision().is_none());
        assert_eq!(advisor.decisions(), 0);
        assert_eq!(ctrl.pending(), None);
        assert_eq!(ctrl.green_duration(ExtendedPhase::East), 12.0);

        // The rotation carries on from south
        assert_eq!(ctrl.tick(12.0).as_slice(), &[ExtendedPhase::South]);
        ctrl.tick(4.0);
        assert_eq!(ctrl.phase(), ExtendedPhase::West);
    }

    #[test]
    fn advice_arriving_during_its_green_extends_it() {
        let config = SimConfig::default();
        let (release, mut advisor) = gated(&config, r#"{"duration": 30, "improved": true}"#);
        let mut ctrl = SignalController::new(&config);
        let engine = MotionEngine::new(&config);

        ctrl.tick(12.0);
        advisor.on_phase_end(ExtendedPhase::North, &engine, &mut ctrl, 12.0);
        ctrl.tick(6.0);
        assert_eq!(ctrl.phase(), ExtendedPhase::East);
        assert_eq!(ctrl.sub_phase(), SubPhase::Green);

        drop(release);
        settle(&mut advisor, &mut ctrl);

        let decision = advisor.last_decision().unwrap();
        assert_eq!(decision.rationale, Rationale::Accepted);
        assert_eq!(decision.duration, 30.0);
        assert_eq!(ctrl.pending(), None);
        assert!(ctrl.tick(27.9).is_empty());
        assert_eq!(ctrl.tick(0.2).as_slice(), &[ExtendedPhase::East]);
    }
}
