use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::clock::Clock;
use crate::logger;

/// Reports the in-game money counter. Polled, never pushed.
pub trait EconomyOracle {
    /// `None` when no reading is available right now.
    fn current_money(&mut self) -> Option<u64>;
}

/// Reports whether the game is ready to start the next round.
pub trait RoundOracle {
    fn round_transition_ready(&mut self) -> bool;
}

#[derive(Debug, Default, Deserialize)]
struct FeedDoc {
    money: Option<u64>,
    #[serde(default)]
    round_ready: bool,
}

/// Reads `{ "money": n, "round_ready": b }` written by an external OCR process.
pub struct FeedOracle {
    path: PathBuf,
    last_error: Option<String>,
}

impl FeedOracle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), last_error: None }
    }

    fn read(&mut self) -> Option<FeedDoc> {
        let parsed = fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<FeedDoc>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(doc) => {
                if self.last_error.take().is_some() {
                    logger::info_p("feed", &format!("{} readable again", self.path.display()));
                }
                Some(doc)
            }
            Err(e) => {
                // one warning per distinct failure, the executor polls often
                if self.last_error.as_deref() != Some(e.as_str()) {
                    logger::warn_p("feed", &format!("{}: {}", self.path.display(), e));
                    self.last_error = Some(e);
                }
                None
            }
        }
    }
}

impl EconomyOracle for FeedOracle {
    fn current_money(&mut self) -> Option<u64> {
        self.read().and_then(|d| d.money)
    }
}

impl RoundOracle for FeedOracle {
    fn round_transition_ready(&mut self) -> bool {
        self.read().map(|d| d.round_ready).unwrap_or(false)
    }
}

/// Stub-mode economy: money grows linearly and a round ends every `round_length`.
pub struct SimulatedEconomy<C: Clock> {
    clock: C,
    start: Instant,
    starting_money: u64,
    per_second: f64,
    round_length: Duration,
    last_round: Instant,
}

impl<C: Clock> SimulatedEconomy<C> {
    pub fn new(clock: C, starting_money: u64, per_second: f64, round_length: Duration) -> Self {
        let now = clock.now();
        Self {
            clock,
            start: now,
            starting_money,
            per_second,
            round_length,
            last_round: now,
        }
    }
}

impl<C: Clock> EconomyOracle for SimulatedEconomy<C> {
    fn current_money(&mut self) -> Option<u64> {
        let elapsed = self.clock.now().duration_since(self.start).as_secs_f64();
        Some(self.starting_money + (elapsed * self.per_second.max(0.0)) as u64)
    }
}

impl<C: Clock> RoundOracle for SimulatedEconomy<C> {
    fn round_transition_ready(&mut self) -> bool {
        let now = self.clock.now();
        if now.duration_since(self.last_round) >= self.round_length {
            self.last_round = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn temp_feed(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("autopop-feed-{}-{}.json", name, std::process::id()));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn feed_reports_money_and_round_state() {
        let path = temp_feed("ok", r#"{"money": 650, "round_ready": true}"#);
        let mut feed = FeedOracle::new(&path);
        assert_eq!(feed.current_money(), Some(650));
        assert!(feed.round_transition_ready());
        fs::remove_file(path).ok();
    }

    #[test]
    fn unreadable_feed_is_no_reading() {
        let mut feed = FeedOracle::new(std::env::temp_dir().join("autopop-feed-missing.json"));
        assert_eq!(feed.current_money(), None);
        assert!(!feed.round_transition_ready());

        let path = temp_feed("garbage", "not json");
        let mut feed = FeedOracle::new(&path);
        assert_eq!(feed.current_money(), None);
        fs::remove_file(path).ok();
    }

    #[test]
    fn simulated_money_grows_with_time() {
        let clock = ManualClock::new();
        let mut eco = SimulatedEconomy::new(&clock, 650, 100.0, Duration::from_secs(30));
        assert_eq!(eco.current_money(), Some(650));
        clock.advance(Duration::from_secs(2));
        assert_eq!(eco.current_money(), Some(850));
    }

    #[test]
    fn simulated_rounds_fire_once_per_length() {
        let clock = ManualClock::new();
        let mut eco = SimulatedEconomy::new(&clock, 0, 0.0, Duration::from_secs(10));
        assert!(!eco.round_transition_ready());
        clock.advance(Duration::from_secs(10));
        assert!(eco.round_transition_ready());
        assert!(!eco.round_transition_ready());
    }
}
