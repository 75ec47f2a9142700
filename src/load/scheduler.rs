use std::thread;
use std::time::Duration;

use rand_core::RngCore;

use crate::config::SyncloadConfig;

use super::epoch::EpochSlot;
use super::jitter::{self, Mwc};
use super::spin::{self, SpinCursor, SpinRegistry};

/// Lifecycle state reported upward to whoever runs the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Terminating,
}

/// What the scheduler needs from its surroundings.
pub trait Harness {
    /// Timestamp in seconds on a clock shared by all workers.
    fn now(&self) -> f64;

    /// Cooperative cancellation check.
    fn keep_running(&self) -> bool;

    /// True for exactly one worker: the one that publishes the epoch.
    fn is_initializer(&self) -> bool;

    fn on_cycle_complete(&mut self);

    fn set_run_state(&mut self, state: RunState);

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Busy,
    Sleeping,
    Terminated,
}

/// Per-worker deadline bookkeeping.
///
/// `timeout` only ever moves forward: each step adds the nominal duration plus
/// a jitter of at most a tenth of it.
#[derive(Debug, Clone)]
pub struct WorkerPhaseState<R = Mwc> {
    timeout: f64,
    busy: f64,
    sleep: f64,
    cursor: SpinCursor,
    rng: R,
}

impl WorkerPhaseState<Mwc> {
    pub fn new(origin: f64, busy: f64, sleep: f64, registry: &SpinRegistry) -> Self {
        Self::with_rng(origin, busy, sleep, registry, Mwc::new(jitter::SEED_W, jitter::SEED_Z))
    }
}

impl<R: RngCore> WorkerPhaseState<R> {
    pub fn with_rng(origin: f64, busy: f64, sleep: f64, registry: &SpinRegistry, rng: R) -> Self {
        Self {
            timeout: origin,
            busy,
            sleep,
            cursor: registry.cursor(),
            rng,
        }
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    pub fn cursor(&mut self) -> &mut SpinCursor {
        &mut self.cursor
    }

    /// Pushes the deadline out by one jittered busy phase.
    pub fn advance_busy(&mut self) -> f64 {
        self.timeout += self.busy + jitter::jitter(&mut self.rng, self.busy);
        self.timeout
    }

    /// Pushes the deadline out by one jittered sleep phase.
    pub fn advance_sleep(&mut self) -> f64 {
        self.timeout += self.sleep + jitter::jitter(&mut self.rng, self.sleep);
        self.timeout
    }
}

/// Summary of one worker's run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    /// Epoch the worker phased against; `None` if it was cancelled first.
    pub origin: Option<f64>,
    /// Clock reading when the first busy phase began.
    pub started_at: Option<f64>,
    pub cycles: u64,
    pub spins: u64,
    pub final_timeout: f64,
}

/// Runs one worker until the harness stops it.
///
/// The initializer publishes the current time as the shared epoch, then every
/// worker waits for the epoch and alternates busy and sleep phases whose
/// deadlines are derived from it. The busy phase spins on one primitive until
/// its deadline; the sleep phase sleeps once for the nominal sleep duration
/// if its jittered deadline is still ahead.
pub fn run_worker<H, E>(harness: &mut H, epoch: &E, config: &SyncloadConfig) -> WorkerReport
where
    H: Harness,
    E: EpochSlot,
{
    let registry = SpinRegistry::new();
    let mut report = WorkerReport::default();

    if harness.is_initializer() {
        epoch.publish(harness.now());
    }

    let origin = match epoch.read(|| harness.keep_running()) {
        Some(t) => t,
        None => {
            harness.set_run_state(RunState::Terminating);
            return report;
        }
    };
    report.origin = Some(origin);
    report.started_at = Some(harness.now());
    harness.set_run_state(RunState::Running);

    let nominal_sleep = config.sleep_duration();
    let mut state =
        WorkerPhaseState::new(origin, config.busy_secs(), config.sleep_secs(), &registry);
    let mut phase = Phase::Busy;

    while phase != Phase::Terminated {
        phase = match phase {
            Phase::Busy => {
                let op = state.cursor().advance();
                let deadline = state.advance_busy();
                report.spins += spin::spin_until(op, deadline, || harness.now());
                if harness.keep_running() {
                    Phase::Sleeping
                } else {
                    Phase::Terminated
                }
            }
            Phase::Sleeping => {
                let deadline = state.advance_sleep();
                if harness.now() < deadline {
                    harness.sleep(nominal_sleep);
                }
                harness.on_cycle_complete();
                report.cycles += 1;
                if harness.keep_running() {
                    Phase::Busy
                } else {
                    Phase::Terminated
                }
            }
            Phase::Terminated => Phase::Terminated,
        };
    }

    report.final_timeout = state.timeout();
    harness.set_run_state(RunState::Terminating);
    report
}
