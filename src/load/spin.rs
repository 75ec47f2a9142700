use core::sync::atomic::{fence, Ordering};

use super::cpu;

/// Iterations burned by [`SpinOp::Loop`].
const LOOP_ITERATIONS: u32 = 1000;

/// One way of burning a tiny, bounded slice of CPU time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOp {
    /// Returns immediately; the deadline poll itself is the load.
    None,
    Nop,
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    Pause,
    #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
    Yield,
    SchedYield,
    /// RDRAND when the CPU has it, otherwise the `nop` burst.
    #[cfg(target_arch = "x86_64")]
    Rdrand,
    Fence,
    Loop,
}

/// Registration order, which is also the round-robin order.
const OPS: &[SpinOp] = &[
    SpinOp::None,
    SpinOp::Nop,
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    SpinOp::Pause,
    #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
    SpinOp::Yield,
    SpinOp::SchedYield,
    #[cfg(target_arch = "x86_64")]
    SpinOp::Rdrand,
    SpinOp::Fence,
    SpinOp::Loop,
];

impl SpinOp {
    pub fn name(&self) -> &'static str {
        match self {
            SpinOp::None => "none",
            SpinOp::Nop => "nop",
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            SpinOp::Pause => "pause",
            #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
            SpinOp::Yield => "yield",
            SpinOp::SchedYield => "sched-yield",
            #[cfg(target_arch = "x86_64")]
            SpinOp::Rdrand => "rdrand",
            SpinOp::Fence => "fence",
            SpinOp::Loop => "loop",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SpinOp::None => "empty call",
            SpinOp::Nop => "burst of nine nop instructions",
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            SpinOp::Pause => "x86 pause instruction",
            #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
            SpinOp::Yield => "arm yield instruction",
            SpinOp::SchedYield => "sched_yield(2)",
            #[cfg(target_arch = "x86_64")]
            SpinOp::Rdrand => {
                if cpu::has_rdrand() {
                    "x86 rdrand instruction"
                } else {
                    "nop burst (no rdrand on this CPU)"
                }
            }
            SpinOp::Fence => "full memory fence",
            SpinOp::Loop => "1000-iteration empty loop",
        }
    }

    #[inline]
    pub fn invoke(&self) {
        match self {
            SpinOp::None => {}
            SpinOp::Nop => cpu::nop_burst(),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            SpinOp::Pause => cpu::pause(),
            #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
            SpinOp::Yield => cpu::yield_hint(),
            SpinOp::SchedYield => {
                // SAFETY: sched_yield takes no arguments and cannot fail on Linux.
                unsafe {
                    libc::sched_yield();
                }
            }
            #[cfg(target_arch = "x86_64")]
            SpinOp::Rdrand => {
                if cpu::x86::has_rdrand() {
                    let _ = core::hint::black_box(cpu::x86::rdrand64(cpu::x86::RDRAND_RETRIES));
                } else {
                    cpu::nop_burst();
                }
            }
            SpinOp::Fence => fence(Ordering::SeqCst),
            SpinOp::Loop => {
                let mut i = LOOP_ITERATIONS;
                while core::hint::black_box(i) > 0 {
                    i -= 1;
                }
            }
        }
    }
}

/// The fixed, build-filtered set of spin primitives.
#[derive(Debug, Clone, Copy)]
pub struct SpinRegistry {
    ops: &'static [SpinOp],
}

impl SpinRegistry {
    pub fn new() -> Self {
        Self { ops: OPS }
    }

    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn get(&self, index: usize) -> Option<SpinOp> {
        self.ops.get(index).copied()
    }

    /// Executes the primitive at `index`; out-of-range indices wrap.
    #[inline]
    pub fn invoke(&self, index: usize) {
        self.ops[index % self.ops.len()].invoke();
    }

    pub fn iter(&self) -> impl Iterator<Item = SpinOp> + '_ {
        self.ops.iter().copied()
    }

    pub fn cursor(&self) -> SpinCursor {
        SpinCursor {
            registry: *self,
            index: 0,
        }
    }
}

impl Default for SpinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Round-robin position in a [`SpinRegistry`].
#[derive(Debug, Clone)]
pub struct SpinCursor {
    registry: SpinRegistry,
    index: usize,
}

impl SpinCursor {
    /// Returns the primitive under the cursor and steps past it, wrapping at
    /// the registry length.
    pub fn advance(&mut self) -> SpinOp {
        let op = self.registry.ops[self.index];
        self.index += 1;
        if self.index >= self.registry.count() {
            self.index = 0;
        }
        op
    }
}

/// Invokes `op` until `now()` reaches `deadline` and returns the number of
/// invocations. A deadline at or behind the first clock read ends immediately.
#[inline]
pub fn spin_until<F: FnMut() -> f64>(op: SpinOp, deadline: f64, mut now: F) -> u64 {
    let mut spins = 0u64;
    while now() < deadline {
        op.invoke();
        spins += 1;
    }
    spins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_portable_core() {
        let reg = SpinRegistry::new();
        let names: Vec<&str> = reg.iter().map(|op| op.name()).collect();
        for expected in ["none", "nop", "sched-yield", "fence", "loop"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert_eq!(names.first(), Some(&"none"));
        assert_eq!(names.last(), Some(&"loop"));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_registry_x86_64_order() {
        let names: Vec<&str> = SpinRegistry::new().iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            ["none", "nop", "pause", "sched-yield", "rdrand", "fence", "loop"]
        );
    }

    #[test]
    fn test_names_unique() {
        let reg = SpinRegistry::new();
        let mut names: Vec<&str> = reg.iter().map(|op| op.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), reg.count());
    }

    #[test]
    fn test_every_primitive_returns() {
        let reg = SpinRegistry::new();
        for i in 0..reg.count() {
            for _ in 0..50 {
                reg.invoke(i);
            }
            assert!(!reg.get(i).unwrap().description().is_empty());
        }
    }

    #[test]
    fn test_invoke_wraps_index() {
        let reg = SpinRegistry::new();
        reg.invoke(reg.count() * 3 + 1);
        assert!(reg.get(reg.count()).is_none());
    }

    #[test]
    fn test_cursor_visits_in_order_then_wraps() {
        let reg = SpinRegistry::new();
        let mut cursor = reg.cursor();
        let n = reg.count();
        let visited: Vec<SpinOp> = (0..3 * n).map(|_| cursor.advance()).collect();
        for (step, op) in visited.iter().enumerate() {
            assert_eq!(*op, reg.get(step % n).unwrap(), "step {}", step);
        }
        // Every primitive appears once before any repeats.
        let mut first_lap: Vec<&str> = visited[..n].iter().map(|op| op.name()).collect();
        first_lap.sort_unstable();
        first_lap.dedup();
        assert_eq!(first_lap.len(), n);
    }

    #[test]
    fn test_spin_until_past_deadline_is_immediate() {
        let mut calls = 0;
        let spins = spin_until(SpinOp::Loop, 1.0, || {
            calls += 1;
            2.0
        });
        assert_eq!(spins, 0);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_spin_until_counts_invocations() {
        let mut t = 0.0;
        let spins = spin_until(SpinOp::Nop, 1.0, || {
            let now = t;
            t += 0.25;
            now
        });
        // reads 0.0, 0.25, 0.5, 0.75 are before the deadline, 1.0 is not
        assert_eq!(spins, 4);
    }
}
