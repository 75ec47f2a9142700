use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock;
use crate::config::SyncloadConfig;
use crate::error::Error;
use crate::load::{self, DefaultEpoch, EpochSlot, Harness, RunState, SpinRegistry};
use crate::shared::SharedRegion;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Installs SIGINT/SIGTERM handlers. No SA_RESTART, so a parent blocked in
/// waitpid wakes up and can forward the signal. Children inherit the handlers.
fn install_signal_handlers() {
    // SAFETY: sa is fully initialized before use, and the handler only stores
    // to an atomic, which is async-signal-safe.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as *const () as usize;
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgs("empty duration".into()));
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else {
        (s, 1) // bare number = seconds
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid duration: {}", s)))?;

    if num == 0 {
        return Err(Error::InvalidArgs("duration must be > 0".into()));
    }

    let secs = num
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidArgs(format!("duration too large: {}", s)))?;

    Ok(Duration::from_secs(secs))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.2}s", d.as_secs_f64())
    } else if secs < 3600 {
        let m = secs / 60;
        let s = secs % 60;
        if s == 0 {
            format!("{}m", m)
        } else {
            format!("{}m {}s", m, s)
        }
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Resolves a worker count of 0 to the number of online CPUs.
pub fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    // SAFETY: sysconf has no memory-safety preconditions.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online < 1 {
        1
    } else {
        online as usize
    }
}

/// Harness for a forked worker process.
struct WorkerHarness {
    instance: usize,
    deadline: f64,
    max_ops: u64,
    cycles: u64,
}

impl Harness for WorkerHarness {
    fn now(&self) -> f64 {
        clock::now()
    }

    fn keep_running(&self) -> bool {
        !SHUTDOWN.load(Ordering::Relaxed)
            && clock::now() < self.deadline
            && (self.max_ops == 0 || self.cycles < self.max_ops)
    }

    fn is_initializer(&self) -> bool {
        self.instance == 0
    }

    fn on_cycle_complete(&mut self) {
        self.cycles += 1;
    }

    fn set_run_state(&mut self, state: RunState) {
        log::debug!(
            target: "syncload::worker",
            "instance {} (pid {}): {:?}",
            self.instance, std::process::id(), state,
        );
    }
}

/// Body of a forked child. Returns the process exit code.
fn worker_main(instance: usize, epoch: &DefaultEpoch, cfg: &SyncloadConfig, deadline: f64) -> i32 {
    let mut harness = WorkerHarness {
        instance,
        deadline,
        max_ops: cfg.max_ops,
        cycles: 0,
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        load::run_worker(&mut harness, epoch, cfg)
    }));

    let code = match result {
        Ok(report) => {
            match report.origin {
                Some(origin) => {
                    log::info!(
                        target: "syncload::worker",
                        "instance {}: {} cycles, {} spin invocations",
                        instance, report.cycles, report.spins,
                    );
                    log::debug!(
                        target: "syncload::worker",
                        "instance {}: origin {:.6}, first busy phase {:.6}, last deadline {:.6}",
                        instance,
                        origin,
                        report.started_at.unwrap_or(origin),
                        report.final_timeout,
                    );
                }
                None => log::info!(
                    target: "syncload::worker",
                    "instance {}: stopped before the epoch was published",
                    instance,
                ),
            }
            0
        }
        Err(_) => {
            log::error!(target: "syncload::worker", "instance {}: worker panicked", instance);
            1
        }
    };
    log::logger().flush();
    code
}

fn signal_children(pids: &[(usize, libc::pid_t)], sig: libc::c_int) {
    for &(_, pid) in pids {
        // SAFETY: kill takes plain integers; a stale pid only yields ESRCH.
        unsafe {
            libc::kill(pid, sig);
        }
    }
}

/// Waits for every child. Returns how many exited abnormally.
fn reap(mut live: Vec<(usize, libc::pid_t)>) -> usize {
    let mut failed = 0;
    let mut forwarded = false;

    while !live.is_empty() {
        let mut status: libc::c_int = 0;
        // SAFETY: status is a valid, writable c_int.
        let pid = unsafe { libc::waitpid(-1, &mut status, 0) };
        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                if SHUTDOWN.load(Ordering::Relaxed) && !forwarded {
                    log::info!("stop requested, signalling {} workers", live.len());
                    signal_children(&live, libc::SIGTERM);
                    forwarded = true;
                }
                continue;
            }
            log::error!("waitpid failed: {}", err);
            failed += live.len();
            break;
        }

        let Some(pos) = live.iter().position(|&(_, p)| p == pid) else {
            continue;
        };
        let (instance, _) = live.swap_remove(pos);

        if libc::WIFEXITED(status) {
            let code = libc::WEXITSTATUS(status);
            if code != 0 {
                log::warn!("instance {} (pid {}) exited with status {}", instance, pid, code);
                failed += 1;
            }
        } else if libc::WIFSIGNALED(status) {
            log::warn!(
                "instance {} (pid {}) killed by signal {}",
                instance, pid, libc::WTERMSIG(status),
            );
            failed += 1;
        }
    }

    failed
}

pub fn run(cfg: &SyncloadConfig, timeout: Duration) -> Result<(), Error> {
    let workers = resolve_workers(cfg.workers);
    let region = SharedRegion::<DefaultEpoch>::new()?;
    log::debug!("shared epoch region: {} bytes", region.mapped_bytes());

    install_signal_handlers();

    let registry = SpinRegistry::new();
    log::info!(
        "started: workers={} busy={}ms sleep={}ms timeout={} tier={} spin-ops={}",
        workers,
        cfg.busy_ms,
        cfg.sleep_ms,
        format_duration(timeout),
        DefaultEpoch::TIER.name(),
        registry.count(),
    );
    let names: Vec<&str> = registry.iter().map(|op| op.name()).collect();
    log::debug!("spin primitives in round-robin order: {}", names.join(", "));

    let start = clock::now();
    let deadline = start + timeout.as_secs_f64();
    let mut pids: Vec<(usize, libc::pid_t)> = Vec::with_capacity(workers);
    let mut spawn_error = None;

    for instance in 0..workers {
        if SHUTDOWN.load(Ordering::Relaxed) {
            break;
        }
        // SAFETY: the child only runs the worker loop on memory it inherited
        // and leaves through _exit, never returning into the parent's stack.
        match unsafe { libc::fork() } {
            -1 => {
                spawn_error = Some(io::Error::last_os_error());
                break;
            }
            0 => {
                let code = worker_main(instance, &region, cfg, deadline);
                // SAFETY: _exit never returns. It skips atexit handlers and the
                // destructors of state inherited from the parent.
                unsafe { libc::_exit(code) };
            }
            pid => pids.push((instance, pid)),
        }
    }

    if let Some(ref e) = spawn_error {
        log::error!("fork failed after {} of {} workers: {}", pids.len(), workers, e);
        signal_children(&pids, libc::SIGTERM);
    }

    let started = pids.len();
    let failed = reap(pids);
    let elapsed = Duration::from_secs_f64((clock::now() - start).max(0.0));

    if SHUTDOWN.load(Ordering::Relaxed) {
        log::info!("interrupted after {}", format_duration(elapsed));
    } else {
        log::info!("completed after {}", format_duration(elapsed));
    }

    if let Some(e) = spawn_error {
        return Err(Error::Io(e));
    }
    if failed > 0 {
        return Err(Error::Worker(format!(
            "{} of {} workers failed",
            failed, started
        )));
    }
    Ok(())
}
