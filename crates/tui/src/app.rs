use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use autopop_core::logger;
use autopop_core::platform::hotkey::Killswitch;
use autopop_core::session::{Session, StrategyEntry};
use autopop_core::settings::Settings;
use autopop_core::types::{Command, SessionState};

use crate::confirm::ConfirmDialog;

pub struct App {
    pub entries: Vec<StrategyEntry>,
    pub session: Arc<Session>,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // offset from bottom, 0 = latest
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub confirm: Option<ConfirmDialog>,
    pub killswitch: Killswitch,
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        entries: Vec<StrategyEntry>,
        session: Arc<Session>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
        killswitch: Killswitch,
        settings: Settings,
        settings_path: PathBuf,
    ) -> Self {
        let selected = settings
            .last_strategy
            .as_ref()
            .and_then(|name| entries.iter().position(|e| &e.name == name))
            .unwrap_or(0);
        Self {
            entries,
            session,
            selected,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            killswitch,
            settings,
            settings_path,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    /// A killswitch press aborts without asking.
    pub fn poll_killswitch(&mut self) {
        if self.killswitch.take() && self.session.abort() {
            self.confirm = None;
            logger::warn("killswitch pressed");
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }

    pub fn start_selected(&mut self) {
        let Some(entry) = self.entries.get(self.selected) else { return };
        if let Some(err) = &entry.error {
            logger::error(&format!("{} failed to load: {}", entry.name, err));
            return;
        }
        if !self.session.claim() {
            logger::warn("a run is already in progress, abort it first");
            return;
        }
        if self.cmd_tx.send(Command::Start(self.selected)).is_err() {
            self.session.release();
            logger::error("session thread is gone");
            return;
        }

        self.settings.last_strategy = Some(entry.name.clone());
        if let Err(e) = self.settings.save(&self.settings_path) {
            logger::warn(&format!("could not save settings: {:#}", e));
        }
    }

    /// Ask before aborting a live run.
    pub fn request_abort(&mut self) {
        if self.session.state() == SessionState::Running {
            self.confirm = Some(ConfirmDialog::new("Abort the current run?"));
        }
    }

    /// Resolve the open dialog. `accept` is the user's final choice.
    pub fn close_confirm(&mut self, accept: bool) {
        if self.confirm.take().is_some() && accept {
            self.session.abort();
        }
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn quit(&mut self) {
        self.session.abort();
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}
