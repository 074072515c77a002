use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use autopop_core::cancel::CancelToken;
use autopop_core::executor::RunOutcome;
use autopop_core::platform::{create_platform, hotkey::Killswitch};
use autopop_core::session::{self, RunEnv, Session};
use autopop_core::settings::Settings;
use autopop_core::types::Command;
use autopop_core::{logger, lua_rt};

struct Args {
    stub: bool,
    headless: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args { stub: false, headless: None };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stub" => args.stub = true,
            "--headless" => {
                args.headless = Some(it.next().ok_or_else(|| anyhow!("--headless needs a strategy name"))?);
            }
            other => return Err(anyhow!("unknown argument '{}'", other)),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let strategies_dir = cwd.join("strategies");
    let logs_dir = cwd.join("logs");
    let settings_path = cwd.join("settings.json");

    logger::init(&logs_dir)?;
    let settings = Settings::load(&settings_path)?;
    let config = settings.validate().context("invalid settings.json")?;
    let env = RunEnv {
        config,
        window_pattern: settings.window_pattern.clone(),
        feed_path: cwd.join(&settings.feed_path),
        log_dir: logs_dir,
        simulate_economy: args.stub,
    };

    let killswitch = Killswitch::new();
    killswitch.listen();

    match args.headless {
        Some(name) => headless(&env, &strategies_dir, &name, args.stub, &killswitch),
        None => interactive(env, &strategies_dir, args.stub, killswitch, settings, settings_path),
    }
}

/// Run one strategy without the TUI and print its report as JSON.
fn headless(env: &RunEnv, strategies_dir: &Path, name: &str, stub: bool, killswitch: &Killswitch) -> Result<()> {
    let path = strategies_dir.join(name).join("main.lua");
    let strategy = lua_rt::load_strategy(&path, strategies_dir, name)?;
    let platform = create_platform(stub);
    let cancel = CancelToken::from_flag(killswitch.latch());

    let report = session::run_strategy(env, platform.as_ref(), &strategy, cancel, None)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.outcome {
        RunOutcome::Completed => Ok(()),
        other => Err(anyhow!("{}", other)),
    }
}

fn interactive(
    env: RunEnv,
    strategies_dir: &Path,
    stub: bool,
    killswitch: Killswitch,
    settings: Settings,
    settings_path: PathBuf,
) -> Result<()> {
    let entries = session::load_strategies(strategies_dir);
    logger::info(&format!("loaded {} strategy(s) from {}", entries.len(), strategies_dir.display()));

    let session = Session::new();
    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    logger::set_tui_sender(log_tx);
    logger::info("autopop started");

    let worker = {
        let session = Arc::clone(&session);
        let entries = entries.clone();
        let platform = create_platform(stub);
        thread::spawn(move || session::serve(session, env, platform, entries, cmd_rx))
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = autopop_tui::App::new(entries, session, log_rx, cmd_tx, killswitch, settings, settings_path);
    let result = autopop_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    logger::clear_tui_sender();

    if !app.should_quit {
        app.quit();
    }
    drop(app);
    // the worker stops at its next cancellation check
    worker.join().ok();
    result
}
