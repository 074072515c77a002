use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Time source for every wait the engine performs.
///
/// The executor never calls `thread::sleep` directly so runs can be replayed
/// on virtual time.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d)
    }
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Virtual clock: `sleep` advances time instantly and records the pause.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
    }

    /// Every pause requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().unwrap().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap().push(d);
        self.advance(d);
    }
}

/// `d` with +/-`fraction` random jitter. A zero fraction returns `d` unchanged.
pub fn jittered(d: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || d.is_zero() {
        return d;
    }
    let secs = d.as_secs_f64();
    let jitter = secs * fraction;
    let actual = secs + rand::thread_rng().gen_range(-jitter..jitter);
    Duration::from_secs_f64(actual.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250));
        clock.sleep(Duration::from_millis(750));
        assert_eq!(clock.now() - start, Duration::from_secs(1));
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(clock.total_slept(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base, 0.1);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100), "{:?}", d);
        }
        assert_eq!(jittered(base, 0.0), base);
    }
}
