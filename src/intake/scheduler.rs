use crate::intake::config::WatcherConfig;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub error_backoff: Duration,
}

impl PollSchedule {
    pub fn from_config(cfg: &WatcherConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.poll_interval_secs),
            error_backoff: Duration::from_secs(cfg.error_backoff_secs),
        }
    }

    pub fn delay_after(&self, health: TickHealth) -> Duration {
        match health {
            TickHealth::Healthy => self.interval,
            TickHealth::Degraded => self.error_backoff,
        }
    }
}

/// Decides how the scheduler waits between ticks.
pub trait Pacer {
    /// Wait up to `delay`. Returns `false` once shutdown has been requested.
    fn wait(&self, delay: Duration) -> bool;

    fn stopped(&self) -> bool;
}

/// Shutdown flag that interrupts a pending wait as soon as it is raised.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, cvar) = &*self.inner;
        let mut stop = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *stop = true;
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Pacer for ShutdownSignal {
    fn wait(&self, delay: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, delay, |stop| !*stop)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !*guard
    }

    fn stopped(&self) -> bool {
        self.is_requested()
    }
}

/// Run `tick` until the pacer stops, waiting the normal interval after a
/// healthy tick and the error backoff after a degraded one. Returns the number
/// of ticks run.
pub fn run_periodic<F>(schedule: &PollSchedule, pacer: &dyn Pacer, mut tick: F) -> usize
where
    F: FnMut() -> TickHealth,
{
    let mut ticks = 0usize;
    while !pacer.stopped() {
        let health = tick();
        ticks += 1;
        if !pacer.wait(schedule.delay_after(health)) {
            break;
        }
    }
    ticks
}

#[cfg(test)]
pub mod testing {
    use super::Pacer;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Pacer that never sleeps; records each requested delay and stops after
    /// `budget` waits.
    pub struct RecordingPacer {
        delays: RefCell<Vec<Duration>>,
        budget: usize,
    }

    impl RecordingPacer {
        pub fn with_budget(budget: usize) -> Self {
            Self {
                delays: RefCell::new(Vec::new()),
                budget,
            }
        }

        pub fn delays(&self) -> Vec<Duration> {
            self.delays.borrow().clone()
        }
    }

    impl Pacer for RecordingPacer {
        fn wait(&self, delay: Duration) -> bool {
            let mut delays = self.delays.borrow_mut();
            delays.push(delay);
            delays.len() < self.budget
        }

        fn stopped(&self) -> bool {
            self.delays.borrow().len() >= self.budget
        }
    }
}
