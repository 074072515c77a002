use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::clock::{self, Clock};
use crate::confirm::ConfirmationSpec;
use crate::diagnostics::DiagnosticsSink;
use crate::input::InputFault;
use crate::logger;
use crate::strategy::ActionId;
use crate::types::{Capture, Region};
use crate::vision::{CaptureError, DifferenceEvaluator, DifferenceScore, RegionCapture};

/// Hard upper bound on attempts per action, whatever the configuration says.
pub const MAX_ATTEMPTS_CAP: u32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Pause shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, factor: f64, max: Duration },
}

impl Backoff {
    /// Pause before retry number `retry` (0 for the pause after the first attempt).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, factor, max } => {
                let secs = base.as_secs_f64() * factor.powi(retry.min(i32::MAX as u32) as i32);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    pub backoff: Backoff,
    /// Fractional +/- jitter applied to every backoff pause.
    pub jitter: f64,
    /// Pause between input and the after-capture so the UI can redraw.
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed(Duration::from_millis(500)),
            jitter: 0.0,
            settle: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped into 1..=MAX_ATTEMPTS_CAP.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            backoff,
            ..Self::default()
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// How a single attempt cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Confirmed,
    BelowThreshold,
    CaptureUnavailable(String),
    InputFault(String),
    ContractViolation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub action: ActionId,
    /// 1-based.
    pub attempt: u32,
    pub score: Option<DifferenceScore>,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Confirmed,
    Failed,
    /// Cancellation was observed before an attempt started.
    Cancelled,
    ContractViolation(String),
}

/// Sealed result of one action: terminal outcome plus its full attempt trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionReport {
    pub action: ActionId,
    pub label: String,
    pub outcome: ActionOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl ActionReport {
    pub fn best_score(&self) -> Option<DifferenceScore> {
        self.attempts
            .iter()
            .filter_map(|a| a.score)
            .fold(None, |best, s| Some(best.map_or(s, |b: DifferenceScore| if s > b { s } else { b })))
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }
}

/// Runs one (input, confirmation) pair under bounded retry.
///
/// Every cycle is PreCapture, Invoking, PostCapture, Evaluating. Transient
/// faults (capture unavailable, input fault, threshold not met) each consume
/// one attempt. A contract violation from the evaluator ends the action at
/// once. Cancellation is only observed at the start of PreCapture.
pub struct RetryOrchestrator<'a> {
    policy: &'a RetryPolicy,
    evaluator: DifferenceEvaluator,
    clock: &'a dyn Clock,
    cancel: &'a CancelToken,
}

impl<'a> RetryOrchestrator<'a> {
    pub fn new(
        policy: &'a RetryPolicy,
        evaluator: DifferenceEvaluator,
        clock: &'a dyn Clock,
        cancel: &'a CancelToken,
    ) -> Self {
        Self { policy, evaluator, clock, cancel }
    }

    pub fn run(
        &self,
        action: ActionId,
        label: &str,
        spec: &ConfirmationSpec,
        screen: &mut dyn RegionCapture,
        invoke: &mut dyn FnMut() -> Result<(), InputFault>,
        sink: &mut dyn DiagnosticsSink,
    ) -> ActionReport {
        let mut report = ActionReport {
            action,
            label: label.to_string(),
            outcome: ActionOutcome::Failed,
            attempts: Vec::new(),
        };

        if spec.regions.is_empty() {
            report.outcome = ActionOutcome::ContractViolation(format!("{} confirmation has no regions", spec.kind));
            return report;
        }
        if let Some(region) = spec.regions.iter().find(|r| r.is_empty()) {
            report.outcome =
                ActionOutcome::ContractViolation(format!("{} confirmation region {} is empty", spec.kind, region));
            return report;
        }

        let max = self.policy.max_attempts();
        for attempt in 1..=max {
            if self.cancel.is_cancelled() {
                logger::warn_p("retry", &format!("{}: cancelled before attempt {}", label, attempt));
                report.outcome = ActionOutcome::Cancelled;
                return report;
            }

            let (score, outcome) = self.cycle(spec, screen, invoke);
            let record = AttemptRecord { action, attempt, score, outcome, at: Local::now() };
            log_attempt(label, max, spec, &record);
            sink.attempt(&record);
            let outcome = record.outcome.clone();
            report.attempts.push(record);

            match outcome {
                AttemptOutcome::Confirmed => {
                    report.outcome = ActionOutcome::Confirmed;
                    return report;
                }
                AttemptOutcome::ContractViolation(detail) => {
                    report.outcome = ActionOutcome::ContractViolation(detail);
                    return report;
                }
                _ => {}
            }

            if attempt < max {
                let pause = clock::jittered(self.policy.backoff.delay_for(attempt - 1), self.policy.jitter);
                self.clock.sleep(pause);
            }
        }

        logger::error_p("retry", &format!("{}: not confirmed after {} attempts", label, max));
        report.outcome = ActionOutcome::Failed;
        report
    }

    fn cycle(
        &self,
        spec: &ConfirmationSpec,
        screen: &mut dyn RegionCapture,
        invoke: &mut dyn FnMut() -> Result<(), InputFault>,
    ) -> (Option<DifferenceScore>, AttemptOutcome) {
        let before = match capture_all(screen, &spec.regions) {
            Ok(caps) => caps,
            Err(e) => return (None, AttemptOutcome::CaptureUnavailable(e.to_string())),
        };

        if let Err(e) = invoke() {
            return (None, AttemptOutcome::InputFault(e.to_string()));
        }
        if !self.policy.settle.is_zero() {
            self.clock.sleep(self.policy.settle);
        }

        let after = match capture_all(screen, &spec.regions) {
            Ok(caps) => caps,
            Err(e) => return (None, AttemptOutcome::CaptureUnavailable(e.to_string())),
        };

        let mut scores = Vec::with_capacity(before.len());
        for (b, a) in before.iter().zip(after.iter()) {
            match self.evaluator.score(b, a) {
                Ok(s) => scores.push(s),
                Err(e) => return (None, AttemptOutcome::ContractViolation(e.to_string())),
            }
        }

        let verdict = spec.decide(&scores);
        let outcome = if verdict.confirmed {
            AttemptOutcome::Confirmed
        } else {
            AttemptOutcome::BelowThreshold
        };
        (Some(verdict.score), outcome)
    }
}

fn capture_all(screen: &mut dyn RegionCapture, regions: &[Region]) -> Result<Vec<Capture>, CaptureError> {
    regions.iter().map(|r| screen.capture(*r)).collect()
}

fn log_attempt(label: &str, max: u32, spec: &ConfirmationSpec, record: &AttemptRecord) {
    let score = record.score.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    let msg = format!(
        "{} attempt {}/{}: {:?} score={} need {} {:.0}%",
        label,
        record.attempt,
        max,
        record.outcome,
        score,
        spec.kind,
        spec.threshold * 100.0
    );
    match record.outcome {
        AttemptOutcome::Confirmed => logger::info_p("retry", &msg),
        AttemptOutcome::ContractViolation(_) => logger::error_p("retry", &msg),
        _ => logger::warn_p("retry", &msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::confirm::ConfirmationSpec;
    use crate::fakes::{RecordingSink, ScriptedScreen};
    use crate::types::Point;

    fn spec() -> ConfirmationSpec {
        ConfirmationSpec::selection(Point::new(50, 50), 10, 10, 0.40)
    }

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(n, Backoff::Fixed(Duration::from_millis(100))).with_settle(Duration::ZERO)
    }

    fn ok() -> Result<(), InputFault> {
        Ok(())
    }

    #[test]
    fn never_confirming_yields_exactly_n_records() {
        for n in 1..=MAX_ATTEMPTS_CAP {
            let clock = ManualClock::new();
            let cancel = CancelToken::new();
            let policy = policy(n);
            let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
            let mut screen = ScriptedScreen::unchanging();
            let mut sink = RecordingSink::default();
            let report = orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut sink);
            assert_eq!(report.outcome, ActionOutcome::Failed);
            assert_eq!(report.attempts.len(), n as usize);
            assert_eq!(sink.attempts.len(), n as usize);
            // n attempts, n - 1 pauses between them
            assert_eq!(clock.sleeps().len(), n as usize - 1);
        }
    }

    #[test]
    fn confirming_on_attempt_k_yields_k_records() {
        for k in 1..=3 {
            let clock = ManualClock::new();
            let cancel = CancelToken::new();
            let policy = policy(3);
            let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
            let mut screen = ScriptedScreen::succeeds_on(k);
            let report = orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
            assert_eq!(report.outcome, ActionOutcome::Confirmed);
            assert_eq!(report.attempts.len(), k);
            assert_eq!(report.attempts.last().unwrap().outcome, AttemptOutcome::Confirmed);
            let numbers: Vec<_> = report.attempts.iter().map(|a| a.attempt).collect();
            assert_eq!(numbers, (1..=k as u32).collect::<Vec<_>>());
        }
    }

    #[test]
    fn capture_unavailable_consumes_an_attempt() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = policy(3);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let black = [0, 0, 0, 255];
        let white = [255, 255, 255, 255];
        // attempt 1: before unavailable; attempt 2: before ok, after changed
        let mut screen = ScriptedScreen::new(vec![None, Some(black), Some(white)]);
        let report = orch.run(4, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
        assert_eq!(report.outcome, ActionOutcome::Confirmed);
        assert_eq!(report.attempts.len(), 2);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::CaptureUnavailable(_)));
        assert_eq!(report.attempts[0].score, None);
    }

    #[test]
    fn input_fault_consumes_an_attempt() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = policy(2);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging();
        let mut invoke = || -> Result<(), InputFault> { Err(InputFault::WindowLost) };
        let report = orch.run(1, "buy x", &spec(), &mut screen, &mut invoke, &mut RecordingSink::default());
        assert_eq!(report.outcome, ActionOutcome::Failed);
        assert_eq!(report.attempts.len(), 2);
        assert!(report.attempts.iter().all(|a| matches!(a.outcome, AttemptOutcome::InputFault(_))));
    }

    #[test]
    fn dimension_mismatch_is_not_retried() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = policy(5);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging().with_shrunk_after();
        let report = orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
        assert!(matches!(report.outcome, ActionOutcome::ContractViolation(_)));
        assert_eq!(report.attempts.len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn cancellation_before_first_attempt_records_nothing() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let policy = policy(3);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging();
        let report = orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
        assert_eq!(report.outcome, ActionOutcome::Cancelled);
        assert!(report.attempts.is_empty());
    }

    #[test]
    fn max_attempts_is_capped() {
        assert_eq!(RetryPolicy::new(50, Backoff::Fixed(Duration::ZERO)).max_attempts(), MAX_ATTEMPTS_CAP);
        assert_eq!(RetryPolicy::new(0, Backoff::Fixed(Duration::ZERO)).max_attempts(), 1);
    }

    #[test]
    fn exponential_backoff_grows_and_saturates() {
        let b = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_millis(500),
        };
        assert_eq!(b.delay_for(0), Duration::from_millis(100));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
        assert_eq!(b.delay_for(2), Duration::from_millis(400));
        assert_eq!(b.delay_for(3), Duration::from_millis(500));
        assert_eq!(b.delay_for(200), Duration::from_millis(500));
    }

    #[test]
    fn exponential_pauses_are_used_between_attempts() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = RetryPolicy::new(
            4,
            Backoff::Exponential {
                base: Duration::from_millis(100),
                factor: 3.0,
                max: Duration::from_secs(10),
            },
        )
        .with_settle(Duration::ZERO);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging();
        orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(300), Duration::from_millis(900)]
        );
    }

    #[test]
    fn best_score_tracks_closest_miss() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = policy(2);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging();
        let report = orch.run(1, "buy x", &spec(), &mut screen, &mut ok, &mut RecordingSink::default());
        assert_eq!(report.best_score(), Some(DifferenceScore::ZERO));
    }

    #[test]
    fn empty_region_is_a_contract_violation() {
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let policy = policy(3);
        let orch = RetryOrchestrator::new(&policy, DifferenceEvaluator::default(), &clock, &cancel);
        let mut screen = ScriptedScreen::unchanging();
        let mut invoked = 0;
        let mut invoke = || -> Result<(), InputFault> {
            invoked += 1;
            Ok(())
        };
        // a click far off the top-left corner clamps to a zero-size region
        let spec = ConfirmationSpec::selection(Point::new(-300, -300), 105, 75, 0.40);
        let report = orch.run(1, "buy x", &spec, &mut screen, &mut invoke, &mut RecordingSink::default());
        assert!(matches!(report.outcome, ActionOutcome::ContractViolation(_)));
        assert!(report.attempts.is_empty());
        assert_eq!(invoked, 0);
        assert!(clock.sleeps().is_empty());
    }
}
