//! Deterministic stand-ins for the live collaborators.
//!
//! A run against these is fully scripted: screens replay pre-recorded frames
//! or follow the input generation, oracles replay readings, and the sink
//! keeps everything it was handed.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::cancel::CancelToken;
use crate::diagnostics::DiagnosticsSink;
use crate::executor::RunReport;
use crate::input::{InputFault, InputRequest, InputSimulator};
use crate::oracle::{EconomyOracle, RoundOracle};
use crate::retry::{ActionReport, AttemptRecord};
use crate::strategy::Action;
use crate::types::{Capture, Region};
use crate::vision::{CaptureError, RegionCapture};

/// Ordered event log shared between fakes.
pub type Timeline = Rc<RefCell<Vec<String>>>;

const BLACK: [u8; 4] = [0, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Replays one frame per capture call; `None` is an unavailable capture.
/// The last frame repeats once the script runs out.
pub struct ScriptedScreen {
    frames: VecDeque<Option<[u8; 4]>>,
    last: Option<[u8; 4]>,
    calls: usize,
    shrink_after: bool,
}

impl ScriptedScreen {
    pub fn new(frames: Vec<Option<[u8; 4]>>) -> Self {
        Self { frames: frames.into(), last: Some(BLACK), calls: 0, shrink_after: false }
    }

    /// Nothing ever changes.
    pub fn unchanging() -> Self {
        Self::new(vec![Some(BLACK)])
    }

    /// Before/after pairs that only differ on attempt `k` (1-based), for a
    /// single-region confirmation.
    pub fn succeeds_on(k: usize) -> Self {
        let mut frames = Vec::new();
        for _ in 1..k {
            frames.push(Some(BLACK));
            frames.push(Some(BLACK));
        }
        frames.push(Some(BLACK));
        frames.push(Some(WHITE));
        Self::new(frames)
    }

    /// Every second capture comes back one pixel narrower.
    pub fn with_shrunk_after(mut self) -> Self {
        self.shrink_after = true;
        self
    }
}

impl RegionCapture for ScriptedScreen {
    fn capture(&mut self, region: Region) -> Result<Capture, CaptureError> {
        self.calls += 1;
        let frame = match self.frames.pop_front() {
            Some(f) => {
                self.last = f;
                f
            }
            None => self.last,
        };
        let color = frame.ok_or_else(|| CaptureError::Unavailable {
            region,
            reason: "scripted".into(),
        })?;
        if self.shrink_after && self.calls % 2 == 0 {
            let shrunk = Region::new(region.l, region.t, region.r - 1, region.b);
            let mut cap = Capture::filled(shrunk, color);
            cap.region = region;
            return Ok(cap);
        }
        Ok(Capture::filled(region, color))
    }
}

/// Screen whose colour is a function of how many effective inputs landed.
pub struct ReactiveScreen {
    generation: Rc<Cell<u64>>,
}

impl ReactiveScreen {
    pub fn new(generation: Rc<Cell<u64>>) -> Self {
        Self { generation }
    }
}

/// Consecutive generations differ by far more than any noise floor.
pub fn generation_color(g: u64) -> [u8; 4] {
    [(g * 61 % 256) as u8, (g * 113 % 256) as u8, (g * 29 % 256) as u8, 255]
}

impl RegionCapture for ReactiveScreen {
    fn capture(&mut self, region: Region) -> Result<Capture, CaptureError> {
        Ok(Capture::filled(region, generation_color(self.generation.get())))
    }
}

/// Records every request. An invoke is effective (bumps the generation)
/// unless a rule says otherwise.
pub struct ScriptedInput {
    generation: Rc<Cell<u64>>,
    requests: Vec<InputRequest>,
    ineffective: HashMap<String, u32>,
    ineffective_calls: HashSet<usize>,
    faults: u32,
    cancel_after: Option<(usize, CancelToken)>,
    timeline: Option<Timeline>,
}

impl Default for ScriptedInput {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self {
            generation: Rc::new(Cell::new(0)),
            requests: Vec::new(),
            ineffective: HashMap::new(),
            ineffective_calls: HashSet::new(),
            faults: 0,
            cancel_after: None,
            timeline: None,
        }
    }

    pub fn generation(&self) -> Rc<Cell<u64>> {
        self.generation.clone()
    }

    /// The first `n` invokes against `target` change nothing.
    pub fn ineffective_for(mut self, target: &str, n: u32) -> Self {
        self.ineffective.insert(target.to_string(), n);
        self
    }

    pub fn never_effective(self, target: &str) -> Self {
        self.ineffective_for(target, u32::MAX)
    }

    /// Invokes with these 1-based call numbers change nothing.
    pub fn ineffective_calls(mut self, calls: &[usize]) -> Self {
        self.ineffective_calls.extend(calls.iter().copied());
        self
    }

    /// The first `n` invokes fail outright.
    pub fn faulting(mut self, n: u32) -> Self {
        self.faults = n;
        self
    }

    /// Raise `cancel` right after the `n`th invoke.
    pub fn cancel_after(mut self, n: usize, cancel: CancelToken) -> Self {
        self.cancel_after = Some((n, cancel));
        self
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn requests(&self) -> &[InputRequest] {
        &self.requests
    }
}

impl InputSimulator for ScriptedInput {
    fn invoke(&mut self, request: &InputRequest) -> Result<(), InputFault> {
        self.requests.push(request.clone());
        let call = self.requests.len();
        if let Some(t) = &self.timeline {
            t.borrow_mut().push(format!("invoke:{}", request.target));
        }
        if let Some((n, cancel)) = &self.cancel_after {
            if call == *n {
                cancel.cancel();
            }
        }

        if self.faults > 0 {
            self.faults -= 1;
            return Err(InputFault::Key("q".into(), "scripted fault".into()));
        }

        let mut effective = !self.ineffective_calls.contains(&call);
        if let Some(left) = self.ineffective.get_mut(&request.target) {
            if *left > 0 {
                *left -= 1;
                effective = false;
            }
        }
        if effective {
            self.generation.set(self.generation.get() + 1);
        }
        Ok(())
    }
}

/// Replays money readings; the last one repeats.
pub struct ScriptedEconomy {
    readings: VecDeque<u64>,
    last: Option<u64>,
    polls: usize,
    cancel_after: Option<(usize, CancelToken)>,
    timeline: Option<Timeline>,
}

impl ScriptedEconomy {
    pub fn new(readings: Vec<u64>) -> Self {
        Self { readings: readings.into(), last: None, polls: 0, cancel_after: None, timeline: None }
    }

    /// Raise `cancel` right after the `n`th poll.
    pub fn cancel_after(mut self, n: usize, cancel: CancelToken) -> Self {
        self.cancel_after = Some((n, cancel));
        self
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }
}

impl EconomyOracle for ScriptedEconomy {
    fn current_money(&mut self) -> Option<u64> {
        self.polls += 1;
        if let Some((n, cancel)) = &self.cancel_after {
            if self.polls == *n {
                cancel.cancel();
            }
        }
        if let Some(m) = self.readings.pop_front() {
            self.last = Some(m);
        }
        if let (Some(t), Some(m)) = (&self.timeline, self.last) {
            t.borrow_mut().push(format!("money:{}", m));
        }
        self.last
    }
}

/// Replays round readiness; the last reading repeats.
pub struct ScriptedRounds {
    readings: VecDeque<bool>,
    last: bool,
}

impl ScriptedRounds {
    pub fn new(readings: Vec<bool>) -> Self {
        Self { readings: readings.into(), last: false }
    }
}

impl RoundOracle for ScriptedRounds {
    fn round_transition_ready(&mut self) -> bool {
        if let Some(r) = self.readings.pop_front() {
            self.last = r;
        }
        self.last
    }
}

/// Keeps a copy of everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub started: Vec<Action>,
    pub money: Vec<u64>,
    pub attempts: Vec<AttemptRecord>,
    pub sealed: Vec<ActionReport>,
    pub screenshots: Vec<String>,
    pub finished: Option<RunReport>,
}

impl DiagnosticsSink for RecordingSink {
    fn action_started(&mut self, action: &Action) {
        self.started.push(action.clone());
    }

    fn money_observed(&mut self, money: u64) {
        self.money.push(money);
    }

    fn attempt(&mut self, record: &AttemptRecord) {
        self.attempts.push(record.clone());
    }

    fn action_sealed(&mut self, report: &ActionReport) {
        self.sealed.push(report.clone());
    }

    fn screenshot_requested(&mut self, reason: &str) {
        self.screenshots.push(reason.to_string());
    }

    fn run_finished(&mut self, report: &RunReport) {
        self.finished = Some(report.clone());
    }
}
