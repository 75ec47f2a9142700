use std::io::Write;

use crate::cli::ProbeArgs;
use crate::clock;
use crate::error::Error;
use crate::load::cpu;
use crate::load::epoch::{EpochSlot, RacyEpoch};
#[cfg(target_has_atomic = "64")]
use crate::load::epoch::AtomicEpoch;
#[cfg(target_has_atomic = "8")]
use crate::load::epoch::LockedEpoch;
use crate::load::{DefaultEpoch, SpinRegistry, SyncTier};

/// Mean cost of one call in nanoseconds.
struct Timing {
    label: &'static str,
    detail: &'static str,
    ns_per_call: f64,
}

fn time_calls<F: FnMut()>(samples: u32, mut f: F) -> f64 {
    let start = clock::now();
    for _ in 0..samples {
        f();
    }
    let elapsed = clock::now() - start;
    elapsed * 1e9 / samples as f64
}

fn time_spin_ops(registry: &SpinRegistry, samples: u32) -> Vec<Timing> {
    (0..registry.count())
        .filter_map(|i| {
            registry.get(i).map(|op| Timing {
                label: op.name(),
                detail: op.description(),
                ns_per_call: time_calls(samples, || registry.invoke(i)),
            })
        })
        .collect()
}

/// Times one publish plus one read of a freshly created slot.
fn time_tier<E: EpochSlot>(samples: u32) -> Timing {
    let slot = E::default();
    let mut t = 1.0;
    let ns = time_calls(samples, || {
        slot.publish(t);
        t = slot.read(|| false).unwrap_or(t) + 1.0;
    });
    Timing {
        label: E::TIER.name(),
        detail: tier_description(E::TIER),
        ns_per_call: ns,
    }
}

fn tier_description(tier: SyncTier) -> &'static str {
    match tier {
        SyncTier::Atomic => "release store / acquire load",
        SyncTier::Lock => "spin lock with fenced critical section",
        SyncTier::Racy => "fenced volatile access, no exclusion",
    }
}

fn time_tiers(samples: u32) -> Vec<Timing> {
    let rows = [
        #[cfg(target_has_atomic = "64")]
        time_tier::<AtomicEpoch>(samples),
        #[cfg(target_has_atomic = "8")]
        time_tier::<LockedEpoch>(samples),
        time_tier::<RacyEpoch>(samples),
    ];
    Vec::from(rows)
}

fn format_ns(ns: f64) -> String {
    if ns >= 1_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else if ns >= 1_000.0 {
        format!("{:.2} us", ns / 1_000.0)
    } else {
        format!("{:.1} ns", ns)
    }
}

fn print_table(out: &mut impl Write, title: &str, rows: &[Timing]) -> Result<(), Error> {
    writeln!(out, "{}", title)?;
    for row in rows {
        writeln!(
            out,
            "  {:12} {:>12}  {}",
            row.label,
            format_ns(row.ns_per_call),
            row.detail
        )?;
    }
    writeln!(out)?;
    Ok(())
}

pub fn run(args: &ProbeArgs) -> Result<(), Error> {
    let registry = SpinRegistry::new();
    let mut out = std::io::stdout().lock();

    writeln!(out, "synchronization tier: {}", DefaultEpoch::TIER.name())?;
    writeln!(
        out,
        "rdrand: {}",
        if cpu::has_rdrand() { "present" } else { "absent" }
    )?;
    writeln!(out, "spin primitives: {}", registry.count())?;
    writeln!(out)?;

    log::debug!("timing {} invocations per primitive", args.samples);
    print_table(&mut out, "Spin primitive cost per call:", &time_spin_ops(&registry, args.samples))?;
    print_table(
        &mut out,
        "Epoch publish+read cost per pair:",
        &time_tiers(args.samples),
    )?;

    Ok(())
}
