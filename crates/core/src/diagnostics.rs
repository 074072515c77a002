use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::Local;
use regex::Regex;
use serde_json::json;

use crate::executor::RunReport;
use crate::logger;
use crate::platform::SharedWindow;
use crate::retry::{ActionOutcome, ActionReport, AttemptRecord};
use crate::strategy::Action;

/// Receives the attempt trail and run result as they are produced.
///
/// Every hook defaults to a no-op. Sinks never fail the run: storage errors
/// are logged and swallowed.
pub trait DiagnosticsSink {
    fn action_started(&mut self, _action: &Action) {}
    fn money_observed(&mut self, _money: u64) {}
    fn attempt(&mut self, _record: &AttemptRecord) {}
    fn action_sealed(&mut self, _report: &ActionReport) {}
    /// The run ended badly; capture the screen now.
    fn screenshot_requested(&mut self, _reason: &str) {}
    fn run_finished(&mut self, _report: &RunReport) {}
}

#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {}

/// Writes money changes and sealed actions to the app log.
#[derive(Debug, Default)]
pub struct LogSink {
    last_money: Option<u64>,
}

impl DiagnosticsSink for LogSink {
    fn money_observed(&mut self, money: u64) {
        if self.last_money != Some(money) {
            logger::info_p("feed", &format!("money ${}", money));
            self.last_money = Some(money);
        }
    }

    fn action_sealed(&mut self, report: &ActionReport) {
        let best = report.best_score().map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        let msg = format!(
            "step {} {}: {:?} after {} attempt(s), best {}",
            report.action,
            report.label,
            report.outcome,
            report.attempts.len(),
            best
        );
        match report.outcome {
            ActionOutcome::Confirmed => logger::info_p("run", &msg),
            _ => logger::warn_p("run", &msg),
        }
    }
}

/// One JSON object per event, appended to `logs/run-<timestamp>.jsonl`.
pub struct JsonlSink {
    path: PathBuf,
    out: BufWriter<File>,
    failed: bool,
}

impl JsonlSink {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("run-{}.jsonl", Local::now().format("%Y%m%d-%H%M%S")));
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { path, out: BufWriter::new(file), failed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn emit(&mut self, event: serde_json::Value) {
        if self.failed {
            return;
        }
        let res = writeln!(self.out, "{}", event).and_then(|_| self.out.flush());
        if let Err(e) = res {
            logger::error(&format!("{}: {}, run log disabled", self.path.display(), e));
            self.failed = true;
        }
    }
}

impl DiagnosticsSink for JsonlSink {
    fn action_started(&mut self, action: &Action) {
        self.emit(json!({ "event": "action_started", "at": Local::now(), "action": action }));
    }

    fn attempt(&mut self, record: &AttemptRecord) {
        self.emit(json!({ "event": "attempt", "record": record }));
    }

    fn action_sealed(&mut self, report: &ActionReport) {
        self.emit(json!({
            "event": "action_sealed",
            "action": report.action,
            "label": report.label,
            "outcome": report.outcome,
            "attempts": report.attempts.len(),
        }));
    }

    fn screenshot_requested(&mut self, reason: &str) {
        self.emit(json!({ "event": "screenshot_requested", "at": Local::now(), "reason": reason }));
    }

    fn run_finished(&mut self, report: &RunReport) {
        self.emit(json!({ "event": "run_finished", "at": Local::now(), "report": report }));
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap())
}

/// `<timestamp>_<reason>.png`, reason reduced to filename-safe characters.
pub fn screenshot_name(reason: &str) -> String {
    let reason = unsafe_chars().replace_all(reason.trim(), "_");
    format!("{}_{}.png", Local::now().format("%Y%m%d-%H%M%S"), reason.trim_matches('_'))
}

/// Saves the whole game window when the executor asks for a screenshot.
pub struct ScreenshotSink {
    win: SharedWindow,
    dir: PathBuf,
}

impl ScreenshotSink {
    pub fn new(win: SharedWindow, dir: impl Into<PathBuf>) -> Self {
        Self { win, dir: dir.into() }
    }

    #[cfg(feature = "debug-capture")]
    fn save(&self, reason: &str) -> Result<PathBuf> {
        use crate::types::Region;

        let bounds = self
            .win
            .borrow()
            .bounds()
            .ok_or_else(|| anyhow::anyhow!("window has no bounds"))?;
        let cap = self.win.borrow_mut().capture(Region::from_size(0, 0, bounds.w, bounds.h))?;

        let mut img = image::RgbaImage::new(cap.width, cap.height);
        for y in 0..cap.height {
            for x in 0..cap.width {
                let (b, g, r) = cap.bgr(x, y);
                img.put_pixel(x, y, image::Rgba([r, g, b, 255]));
            }
        }
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(screenshot_name(reason));
        img.save(&path).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    #[cfg(not(feature = "debug-capture"))]
    fn save(&self, _reason: &str) -> Result<PathBuf> {
        anyhow::bail!("built without the debug-capture feature")
    }
}

impl DiagnosticsSink for ScreenshotSink {
    fn screenshot_requested(&mut self, reason: &str) {
        match self.save(reason) {
            Ok(path) => logger::info(&format!("screenshot saved to {}", path.display())),
            Err(e) => logger::warn(&format!("screenshot '{}' skipped: {:#}", reason, e)),
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn DiagnosticsSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn DiagnosticsSink>) {
        self.sinks.push(sink);
    }
}

impl DiagnosticsSink for Fanout {
    fn action_started(&mut self, action: &Action) {
        self.sinks.iter_mut().for_each(|s| s.action_started(action));
    }

    fn money_observed(&mut self, money: u64) {
        self.sinks.iter_mut().for_each(|s| s.money_observed(money));
    }

    fn attempt(&mut self, record: &AttemptRecord) {
        self.sinks.iter_mut().for_each(|s| s.attempt(record));
    }

    fn action_sealed(&mut self, report: &ActionReport) {
        self.sinks.iter_mut().for_each(|s| s.action_sealed(report));
    }

    fn screenshot_requested(&mut self, reason: &str) {
        self.sinks.iter_mut().for_each(|s| s.screenshot_requested(reason));
    }

    fn run_finished(&mut self, report: &RunReport) {
        self.sinks.iter_mut().for_each(|s| s.run_finished(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RunOutcome;
    use crate::fakes::RecordingSink;
    use crate::retry::AttemptOutcome;

    fn record() -> AttemptRecord {
        AttemptRecord {
            action: 2,
            attempt: 1,
            score: None,
            outcome: AttemptOutcome::CaptureUnavailable("window hidden".into()),
            at: Local::now(),
        }
    }

    #[test]
    fn screenshot_names_are_filename_safe() {
        let name = screenshot_name("step 3 failed: Dart Monkey/01");
        assert!(name.ends_with("_step_3_failed_Dart_Monkey_01.png"), "{}", name);
        assert!(!name.contains(' '));
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_event() {
        let dir = std::env::temp_dir().join(format!("autopop-jsonl-{}", std::process::id()));
        let mut sink = JsonlSink::create(&dir).unwrap();
        sink.attempt(&record());
        sink.screenshot_requested("aborted");
        sink.run_finished(&RunReport { strategy: "s".into(), outcome: RunOutcome::Completed, history: vec![] });
        let path = sink.path().to_path_buf();
        drop(sink);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "attempt");
        assert_eq!(lines[0]["record"]["outcome"]["kind"], "capture_unavailable");
        assert_eq!(lines[2]["report"]["outcome"]["status"], "completed");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn fanout_reaches_every_sink() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Shared(Rc<RefCell<RecordingSink>>);
        impl DiagnosticsSink for Shared {
            fn attempt(&mut self, r: &AttemptRecord) {
                self.0.borrow_mut().attempt(r);
            }
        }

        let a = Rc::new(RefCell::new(RecordingSink::default()));
        let b = Rc::new(RefCell::new(RecordingSink::default()));
        let mut fan = Fanout::new().with(Shared(a.clone())).with(Shared(b.clone())).with(NullSink);
        fan.attempt(&record());
        assert_eq!(a.borrow().attempts.len(), 1);
        assert_eq!(b.borrow().attempts.len(), 1);
    }
}
