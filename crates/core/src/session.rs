use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::cancel::CancelToken;
use crate::clock::SystemClock;
use crate::diagnostics::{DiagnosticsSink, Fanout, JsonlSink, LogSink, ScreenshotSink};
use crate::executor::{Collaborators, RunConfig, RunReport, StrategyExecutor};
use crate::logger;
use crate::lua_rt;
use crate::oracle::{EconomyOracle, FeedOracle, RoundOracle, SimulatedEconomy};
use crate::platform::hotkey::activate_terminal;
use crate::platform::{GameWindow, Platform};
use crate::retry::{ActionOutcome, ActionReport, AttemptRecord};
use crate::strategy::{Action, Strategy};
use crate::types::*;
use crate::vision::DifferenceScore;

/// One discovered `main.lua`, as listed in the TUI.
#[derive(Debug, Clone)]
pub struct StrategyEntry {
    pub name: String,
    pub title: String,
    pub description: String,
    pub map: Option<String>,
    pub actions: usize,
    pub path: PathBuf,
    /// Strategies directory the script was found under; shared modules resolve from here.
    pub root: PathBuf,
    /// Set when the script could not even be evaluated for its metadata.
    pub error: Option<String>,
}

/// Load every strategy under `dir`. Broken scripts stay in the list with
/// their error so the user can see why they won't start.
pub fn load_strategies(dir: &Path) -> Vec<StrategyEntry> {
    lua_rt::find_strategy_files(dir)
        .into_iter()
        .map(|path| {
            let name = lua_rt::derive_strategy_name(&path, dir);
            match lua_rt::load_meta(&path, dir) {
                Ok(meta) => StrategyEntry {
                    title: if meta.title.is_empty() { name.clone() } else { meta.title },
                    name,
                    description: meta.description,
                    map: meta.map,
                    actions: meta.actions,
                    path,
                    root: dir.to_path_buf(),
                    error: None,
                },
                Err(e) => {
                    logger::error(&format!("failed to load strategy {}: {}", name, e));
                    StrategyEntry {
                        title: name.clone(),
                        name,
                        description: String::new(),
                        map: None,
                        actions: 0,
                        path,
                        root: dir.to_path_buf(),
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect()
}

/// Live view of the current run for the status panel.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub strategy: Option<String>,
    pub total: usize,
    pub current: Option<String>,
    pub attempt: u32,
    pub last_score: Option<DifferenceScore>,
    pub money: Option<u64>,
    pub confirmed: usize,
    pub failed: usize,
    /// Final outcome of the last finished run.
    pub outcome: Option<String>,
}

/// State shared between the session thread and the TUI.
#[derive(Debug)]
pub struct Session {
    pub state: Mutex<SessionState>,
    pub progress: Mutex<Progress>,
    cancel: Mutex<Option<CancelToken>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            progress: Mutex::new(Progress::default()),
            cancel: Mutex::new(None),
        }
    }
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    /// Cancel the run in flight, if any. Safe to call from any thread; the
    /// session thread itself is blocked inside the executor while running.
    pub fn abort(&self) -> bool {
        let guard = self.cancel.lock().unwrap();
        let Some(token) = guard.as_ref() else { return false };
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        *self.state.lock().unwrap() = SessionState::Aborting;
        logger::warn_p("run", "abort requested");
        true
    }

    /// Reserve the session for a run about to be requested. Only one caller
    /// wins while the session is idle.
    pub fn claim(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != SessionState::Idle {
            return false;
        }
        *state = SessionState::Starting;
        true
    }

    /// Undo a `claim` whose run never began.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Starting {
            *state = SessionState::Idle;
        }
    }

    fn begin(&self, strategy: &Strategy) -> CancelToken {
        let token = CancelToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());
        *self.progress.lock().unwrap() = Progress {
            strategy: Some(strategy.name.clone()),
            total: strategy.len(),
            ..Progress::default()
        };
        *self.state.lock().unwrap() = SessionState::Running;
        token
    }

    fn end(&self, outcome: String) {
        *self.cancel.lock().unwrap() = None;
        let mut p = self.progress.lock().unwrap();
        p.current = None;
        p.outcome = Some(outcome);
        drop(p);
        *self.state.lock().unwrap() = SessionState::Idle;
    }
}

/// Mirrors executor events into the shared `Progress`.
pub struct ProgressSink {
    session: Arc<Session>,
}

impl ProgressSink {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl DiagnosticsSink for ProgressSink {
    fn action_started(&mut self, action: &Action) {
        let mut p = self.session.progress.lock().unwrap();
        p.current = Some(action.label());
        p.attempt = 0;
        p.last_score = None;
    }

    fn money_observed(&mut self, money: u64) {
        self.session.progress.lock().unwrap().money = Some(money);
    }

    fn attempt(&mut self, record: &AttemptRecord) {
        let mut p = self.session.progress.lock().unwrap();
        p.attempt = record.attempt;
        if record.score.is_some() {
            p.last_score = record.score;
        }
    }

    fn action_sealed(&mut self, report: &ActionReport) {
        let mut p = self.session.progress.lock().unwrap();
        match report.outcome {
            ActionOutcome::Confirmed => p.confirmed += 1,
            ActionOutcome::Cancelled => {}
            _ => p.failed += 1,
        }
    }
}

/// Everything a run needs besides the strategy itself.
#[derive(Debug, Clone)]
pub struct RunEnv {
    pub config: RunConfig,
    pub window_pattern: String,
    pub feed_path: PathBuf,
    pub log_dir: PathBuf,
    /// Drive the economy from a simulated clock instead of the feed file.
    pub simulate_economy: bool,
}

impl RunEnv {
    fn economy(&self) -> (Box<dyn EconomyOracle>, Box<dyn RoundOracle>) {
        if self.simulate_economy {
            let round = Duration::from_secs(20);
            (
                Box::new(SimulatedEconomy::new(SystemClock, 650, 40.0, round)),
                Box::new(SimulatedEconomy::new(SystemClock, 650, 40.0, round)),
            )
        } else {
            (Box::new(FeedOracle::new(&self.feed_path)), Box::new(FeedOracle::new(&self.feed_path)))
        }
    }
}

/// Find the game window and run one strategy against it to completion.
pub fn run_strategy(
    env: &RunEnv,
    platform: &dyn Platform,
    strategy: &Strategy,
    cancel: CancelToken,
    extra: Option<Box<dyn DiagnosticsSink>>,
) -> Result<RunReport> {
    let windows = platform.find_windows(&env.window_pattern);
    let Some((id, title)) = windows.into_iter().next() else {
        bail!("no window matches '{}'", env.window_pattern);
    };
    let game = GameWindow::new(platform.open_window(id));
    logger::info_p("run", &format!("running {} on \"{}\"", strategy.name, title));
    game.activate();

    let mut sink = Fanout::new()
        .with(LogSink::default())
        .with(ScreenshotSink::new(game.shared(), env.log_dir.join("screenshots")));
    match JsonlSink::create(&env.log_dir) {
        Ok(jsonl) => {
            logger::info_p("run", &format!("recording to {}", jsonl.path().display()));
            sink.push(Box::new(jsonl));
        }
        Err(e) => logger::warn_p("run", &format!("no run record: {:#}", e)),
    }
    if let Some(extra) = extra {
        sink.push(extra);
    }

    let (mut economy, mut rounds) = env.economy();
    let mut screen = game.clone();
    let mut input = game.clone();
    let clock = SystemClock;
    let executor = StrategyExecutor::new(&env.config, cancel);
    Ok(executor.run(
        strategy,
        Collaborators {
            screen: &mut screen,
            input: &mut input,
            economy: economy.as_mut(),
            rounds: rounds.as_mut(),
            sink: &mut sink,
            clock: &clock,
        },
    ))
}

fn start(
    session: &Arc<Session>,
    env: &RunEnv,
    platform: &dyn Platform,
    entry: &StrategyEntry,
) {
    if !matches!(session.state(), SessionState::Idle | SessionState::Starting) {
        logger::warn("a run is already in progress");
        return;
    }
    let strategy = match lua_rt::load_strategy(&entry.path, &entry.root, &entry.name) {
        Ok(s) => s,
        Err(e) => {
            logger::error(&format!("cannot start {}: {:#}", entry.name, e));
            session.release();
            return;
        }
    };

    let token = session.begin(&strategy);
    let progress = Box::new(ProgressSink::new(Arc::clone(session)));
    let outcome = match run_strategy(env, platform, &strategy, token, Some(progress)) {
        Ok(report) => {
            logger::info_p("run", &format!("{}: {}", strategy.name, report.outcome));
            report.outcome.to_string()
        }
        Err(e) => {
            logger::error(&format!("{}: {:#}", strategy.name, e));
            format!("not started: {}", e)
        }
    };
    session.end(outcome);
    activate_terminal();
}

/// Session loop. Runs on a background thread and owns the platform.
pub fn serve(
    session: Arc<Session>,
    env: RunEnv,
    platform: Box<dyn Platform>,
    entries: Vec<StrategyEntry>,
    cmd_rx: mpsc::Receiver<Command>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Command::Start(idx) => {
                let Some(entry) = entries.get(idx) else {
                    session.release();
                    continue;
                };
                start(&session, &env, platform.as_ref(), entry);
            }
            Command::Abort => {
                session.abort();
            }
            Command::Quit => {
                session.abort();
                logger::info("shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RunOutcome;
    use crate::platform::stub::StubPlatform;
    use crate::strategy::tests::buy;

    fn env() -> RunEnv {
        let mut config = RunConfig::default();
        config.retry = config.retry.with_settle(Duration::ZERO);
        RunEnv {
            config,
            window_pattern: "BloonsTD6".into(),
            feed_path: PathBuf::from("feed.json"),
            log_dir: std::env::temp_dir().join(format!("autopop-session-{}", std::process::id())),
            simulate_economy: true,
        }
    }

    #[test]
    fn runs_a_strategy_against_the_stub() {
        let strategy = Strategy::new("meadow", vec![buy(1, 0, "Dart Monkey 01", 400, 300)]).unwrap();
        let session = Session::new();
        let token = session.begin(&strategy);
        let progress = Box::new(ProgressSink::new(Arc::clone(&session)));

        let report =
            run_strategy(&env(), &StubPlatform::default(), &strategy, token, Some(progress)).unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        let p = session.progress();
        assert_eq!(p.confirmed, 1);
        assert_eq!(p.total, 1);
        assert!(p.last_score.is_some());
    }

    struct NoWindows;

    impl Platform for NoWindows {
        fn find_windows(&self, _pattern: &str) -> Vec<(WindowId, String)> {
            Vec::new()
        }

        fn open_window(&self, window_id: WindowId) -> Box<dyn crate::platform::WindowHandle> {
            StubPlatform::default().open_window(window_id)
        }
    }

    #[test]
    fn missing_window_is_an_error() {
        let strategy = Strategy::empty("x");
        let err = run_strategy(&env(), &NoWindows, &strategy, CancelToken::new(), None).unwrap_err();
        assert!(err.to_string().contains("no window matches"));
    }

    #[test]
    fn only_one_claim_wins_until_released() {
        let session = Session::new();
        assert!(session.claim());
        assert_eq!(session.state(), SessionState::Starting);
        assert!(!session.claim());

        session.release();
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.claim());
        session.begin(&Strategy::empty("x"));
        session.release();
        assert_eq!(session.state(), SessionState::Running);
        assert!(!session.claim());
    }

    #[test]
    fn abort_cancels_only_a_live_run() {
        let session = Session::new();
        assert!(!session.abort());

        let token = session.begin(&Strategy::empty("x"));
        assert!(session.abort());
        assert!(token.is_cancelled());
        assert_eq!(session.state(), SessionState::Aborting);
        assert!(!session.abort());

        session.end("aborted".into());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.progress().outcome.as_deref(), Some("aborted"));
    }

    #[test]
    fn broken_scripts_stay_listed_with_their_error() {
        let root = std::env::temp_dir().join(format!("autopop-strategies-{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(root.join("good")).unwrap();
        std::fs::create_dir_all(root.join("broken")).unwrap();
        std::fs::write(root.join("good/main.lua"), r#"return { name = "Good", actions = {} }"#).unwrap();
        std::fs::write(root.join("broken/main.lua"), "return {").unwrap();

        let entries = load_strategies(&root);
        assert_eq!(entries.len(), 2);
        let broken = entries.iter().find(|e| e.name == "broken").unwrap();
        assert!(broken.error.is_some());
        let good = entries.iter().find(|e| e.name == "good").unwrap();
        assert_eq!(good.title, "Good");
        std::fs::remove_dir_all(root).ok();
    }
}
