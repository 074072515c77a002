use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::confirm::ConfirmCatalog;
use crate::diagnostics::DiagnosticsSink;
use crate::input::{HotkeyTable, InputSimulator, UpgradeLedger};
use crate::logger;
use crate::oracle::{EconomyOracle, RoundOracle};
use crate::retry::{ActionOutcome, ActionReport, AttemptRecord, RetryOrchestrator, RetryPolicy};
use crate::strategy::{Action, ActionId, Strategy, Trigger};
use crate::vision::{DifferenceEvaluator, DifferenceScore, RegionCapture};

/// What to do once one action exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run with `FailedAction` right away.
    #[default]
    Halt,
    /// Move on; the consecutive-failure breaker decides when to give up.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    pub money_wait_timeout: Duration,
    pub round_wait_timeout: Duration,
    pub consecutive_failure_limit: u32,
    pub on_action_failure: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            money_wait_timeout: Duration::from_secs(600),
            round_wait_timeout: Duration::from_secs(300),
            consecutive_failure_limit: 3,
            on_action_failure: FailurePolicy::Halt,
        }
    }
}

/// Validated, typed configuration for one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunConfig {
    pub executor: ExecutorConfig,
    pub retry: RetryPolicy,
    pub confirm: ConfirmCatalog,
    pub hotkeys: HotkeyTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    RetriesExhausted { attempts: u32, best_score: Option<DifferenceScore> },
    ContractViolation { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    MoneyWaitTimeout { action: ActionId, needed: u64, last_seen: Option<u64> },
    RoundWaitTimeout { action: ActionId },
    ConsecutiveFailures { count: u32 },
}

/// Terminal state of a run. Built once, at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    FailedAction { action: ActionId, reason: FailureReason },
    Aborted { reason: AbortReason },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetriesExhausted { attempts, best_score } => {
                write!(f, "not confirmed after {} attempts", attempts)?;
                if let Some(s) = best_score {
                    write!(f, " (best {})", s)?;
                }
                Ok(())
            }
            FailureReason::ContractViolation { detail } => write!(f, "contract violation: {}", detail),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::MoneyWaitTimeout { action, needed, last_seen } => match last_seen {
                Some(m) => write!(f, "step {}: timed out waiting for ${} (last ${})", action, needed, m),
                None => write!(f, "step {}: timed out waiting for ${} (no reading)", action, needed),
            },
            AbortReason::RoundWaitTimeout { action } => write!(f, "step {}: timed out waiting for next round", action),
            AbortReason::ConsecutiveFailures { count } => write!(f, "{} consecutive actions failed", count),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::FailedAction { action, reason } => write!(f, "step {} failed: {}", action, reason),
            RunOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

/// Outcome plus every sealed action's attempt trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub strategy: String,
    pub outcome: RunOutcome,
    pub history: Vec<ActionReport>,
}

impl RunReport {
    /// Attempt trail for one step; empty if the step never started.
    pub fn attempts_for(&self, action: ActionId) -> &[AttemptRecord] {
        self.history
            .iter()
            .find(|r| r.action == action)
            .map(|r| r.attempts.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_attempts(&self) -> usize {
        self.history.iter().map(|r| r.attempts.len()).sum()
    }
}

/// Everything the executor talks to during a run.
pub struct Collaborators<'a> {
    pub screen: &'a mut dyn RegionCapture,
    pub input: &'a mut dyn InputSimulator,
    pub economy: &'a mut dyn EconomyOracle,
    pub rounds: &'a mut dyn RoundOracle,
    pub sink: &'a mut dyn DiagnosticsSink,
    pub clock: &'a dyn Clock,
}

/// Walks a strategy in step order, gating each action on its trigger and
/// handing it to the retry orchestrator.
pub struct StrategyExecutor<'a> {
    config: &'a RunConfig,
    cancel: CancelToken,
}

impl<'a> StrategyExecutor<'a> {
    pub fn new(config: &'a RunConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    pub fn run(&self, strategy: &Strategy, io: Collaborators<'_>) -> RunReport {
        let Collaborators { screen, input, economy, rounds, sink, clock } = io;
        let evaluator = DifferenceEvaluator::new(self.config.confirm.noise_floor);
        let orchestrator = RetryOrchestrator::new(&self.config.retry, evaluator, clock, &self.cancel);

        let mut history: Vec<ActionReport> = Vec::new();
        let mut ledger = UpgradeLedger::new();
        let mut consecutive = 0u32;
        let mut first_failure: Option<(ActionId, FailureReason)> = None;

        logger::info_p("run", &format!("{}: {} actions", strategy.name, strategy.len()));

        for action in strategy.actions() {
            if self.cancel.is_cancelled() {
                return self.finish(strategy, RunOutcome::Aborted { reason: AbortReason::Cancelled }, history, sink);
            }

            sink.action_started(action);
            if let Err(reason) = self.wait_for_trigger(action, economy, rounds, sink, clock) {
                return self.finish(strategy, RunOutcome::Aborted { reason }, history, sink);
            }

            let label = action.label();
            let spec = match self.config.confirm.spec_for(action) {
                Ok(spec) => spec,
                Err(detail) => {
                    let report = ActionReport {
                        action: action.step,
                        label,
                        outcome: ActionOutcome::ContractViolation(detail.clone()),
                        attempts: Vec::new(),
                    };
                    sink.action_sealed(&report);
                    history.push(report);
                    let outcome = RunOutcome::FailedAction {
                        action: action.step,
                        reason: FailureReason::ContractViolation { detail },
                    };
                    return self.finish(strategy, outcome, history, sink);
                }
            };

            let request = ledger.request_for(action, &self.config.hotkeys);
            logger::info_p("run", &format!("step {}: {} {:?}", action.step, label, request.keys));
            let mut invoke = || input.invoke(&request);
            let report = orchestrator.run(action.step, &label, &spec, &mut *screen, &mut invoke, &mut *sink);
            sink.action_sealed(&report);

            let attempts = report.attempts.len() as u32;
            let best_score = report.best_score();
            let outcome = report.outcome.clone();
            history.push(report);

            match outcome {
                ActionOutcome::Confirmed => {
                    ledger.commit(action);
                    consecutive = 0;
                }
                ActionOutcome::Cancelled => {
                    return self.finish(strategy, RunOutcome::Aborted { reason: AbortReason::Cancelled }, history, sink);
                }
                ActionOutcome::ContractViolation(detail) => {
                    let outcome = RunOutcome::FailedAction {
                        action: action.step,
                        reason: FailureReason::ContractViolation { detail },
                    };
                    return self.finish(strategy, outcome, history, sink);
                }
                ActionOutcome::Failed => {
                    let reason = FailureReason::RetriesExhausted { attempts, best_score };
                    match self.config.executor.on_action_failure {
                        FailurePolicy::Halt => {
                            let outcome = RunOutcome::FailedAction { action: action.step, reason };
                            return self.finish(strategy, outcome, history, sink);
                        }
                        FailurePolicy::Continue => {
                            consecutive += 1;
                            if consecutive >= self.config.executor.consecutive_failure_limit {
                                let outcome = RunOutcome::Aborted {
                                    reason: AbortReason::ConsecutiveFailures { count: consecutive },
                                };
                                return self.finish(strategy, outcome, history, sink);
                            }
                            logger::warn_p("run", &format!("step {} failed, continuing", action.step));
                            first_failure.get_or_insert((action.step, reason));
                        }
                    }
                }
            }
        }

        let outcome = match first_failure {
            Some((action, reason)) => RunOutcome::FailedAction { action, reason },
            None => RunOutcome::Completed,
        };
        self.finish(strategy, outcome, history, sink)
    }

    fn wait_for_trigger(
        &self,
        action: &Action,
        economy: &mut dyn EconomyOracle,
        rounds: &mut dyn RoundOracle,
        sink: &mut dyn DiagnosticsSink,
        clock: &dyn Clock,
    ) -> Result<(), AbortReason> {
        let cfg = &self.config.executor;
        let start = clock.now();
        match action.trigger {
            Trigger::AtMoney(needed) => {
                let mut last_seen = None;
                loop {
                    if self.cancel.is_cancelled() {
                        return Err(AbortReason::Cancelled);
                    }
                    if let Some(money) = economy.current_money() {
                        sink.money_observed(money);
                        last_seen = Some(money);
                        if money >= needed {
                            return Ok(());
                        }
                    }
                    if clock.now().duration_since(start) >= cfg.money_wait_timeout {
                        return Err(AbortReason::MoneyWaitTimeout { action: action.step, needed, last_seen });
                    }
                    clock.sleep(cfg.poll_interval);
                }
            }
            Trigger::NextRound => loop {
                if self.cancel.is_cancelled() {
                    return Err(AbortReason::Cancelled);
                }
                if rounds.round_transition_ready() {
                    return Ok(());
                }
                if clock.now().duration_since(start) >= cfg.round_wait_timeout {
                    return Err(AbortReason::RoundWaitTimeout { action: action.step });
                }
                clock.sleep(cfg.poll_interval);
            },
        }
    }

    fn finish(
        &self,
        strategy: &Strategy,
        outcome: RunOutcome,
        history: Vec<ActionReport>,
        sink: &mut dyn DiagnosticsSink,
    ) -> RunReport {
        match &outcome {
            RunOutcome::Completed => logger::info_p("run", &format!("{}: completed", strategy.name)),
            RunOutcome::FailedAction { action, .. } => {
                logger::error_p("run", &format!("{}: {}", strategy.name, outcome));
                sink.screenshot_requested(&format!("step{}_failed", action));
            }
            RunOutcome::Aborted { .. } => {
                logger::warn_p("run", &format!("{}: {}", strategy.name, outcome));
                sink.screenshot_requested("aborted");
            }
        }
        let report = RunReport { strategy: strategy.name.clone(), outcome, history };
        sink.run_finished(&report);
        report
    }
}
