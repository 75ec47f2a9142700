//! The shared time origin every worker phases itself against.
//!
//! One `f64` timestamp lives in memory shared by all worker processes. Instance
//! 0 publishes it once; every worker (the publisher included) reads it once
//! before scheduling its first busy phase. Three implementations exist, from
//! strongest to weakest ordering guarantee:
//!
//! | Tier | Type | Mechanism |
//! |------|------|-----------|
//! | atomic | [`AtomicEpoch`] | `AtomicU64` bit pattern, release store / acquire load |
//! | lock | [`LockedEpoch`] | byte spin lock around a plain cell, fenced |
//! | racy | [`RacyEpoch`] | volatile access between full fences, no exclusion |
//!
//! [`DefaultEpoch`] picks the strongest tier the target supports at compile
//! time, so no call pays for a runtime branch.

use core::cell::UnsafeCell;
use core::hint;
#[cfg(target_has_atomic = "8")]
use core::sync::atomic::AtomicBool;
#[cfg(target_has_atomic = "64")]
use core::sync::atomic::AtomicU64;
use core::sync::atomic::{fence, Ordering};

use crate::shared::ForkShared;

/// Consistency tier of an [`EpochSlot`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTier {
    Atomic,
    Lock,
    Racy,
}

impl SyncTier {
    pub fn name(&self) -> &'static str {
        match self {
            SyncTier::Atomic => "atomic",
            SyncTier::Lock => "lock",
            SyncTier::Racy => "racy",
        }
    }
}

/// A timestamp written by one worker and read by all of them.
///
/// The default value is the unpublished state (`0.0`).
pub trait EpochSlot: Default + Send + Sync {
    const TIER: SyncTier;

    /// Stores `now` for every reader. Publishing again overwrites the value.
    fn publish(&self, now: f64);

    /// One observation of the slot, which may still be unpublished.
    fn load(&self) -> f64;

    /// Re-reads the slot until a strictly positive value shows up, or returns
    /// `None` once `keep_running` reports stop.
    fn read<F: FnMut() -> bool>(&self, mut keep_running: F) -> Option<f64> {
        loop {
            let t = self.load();
            if t > 0.0 {
                return Some(t);
            }
            if !keep_running() {
                return None;
            }
            hint::spin_loop();
        }
    }
}

#[cfg(target_has_atomic = "64")]
#[repr(C)]
#[derive(Debug, Default)]
pub struct AtomicEpoch {
    bits: AtomicU64,
}

#[cfg(target_has_atomic = "64")]
impl EpochSlot for AtomicEpoch {
    const TIER: SyncTier = SyncTier::Atomic;

    fn publish(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::Release);
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[cfg(target_has_atomic = "8")]
#[repr(C)]
#[derive(Debug, Default)]
pub struct LockedEpoch {
    locked: AtomicBool,
    value: UnsafeCell<f64>,
}

// SAFETY: every access to `value` happens with `locked` held.
#[cfg(target_has_atomic = "8")]
unsafe impl Sync for LockedEpoch {}

#[cfg(target_has_atomic = "8")]
impl LockedEpoch {
    fn with_lock<R>(&self, f: impl FnOnce(*mut f64) -> R) -> R {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        fence(Ordering::SeqCst);
        let out = f(self.value.get());
        fence(Ordering::SeqCst);
        self.locked.store(false, Ordering::Release);
        out
    }
}

#[cfg(target_has_atomic = "8")]
impl EpochSlot for LockedEpoch {
    const TIER: SyncTier = SyncTier::Lock;

    fn publish(&self, now: f64) {
        // SAFETY: the lock gives exclusive access to the cell.
        self.with_lock(|cell| unsafe { cell.write(now) });
    }

    fn load(&self) -> f64 {
        // SAFETY: the lock gives exclusive access to the cell.
        self.with_lock(|cell| unsafe { cell.read() })
    }
}

/// Barrier-only slot for targets without atomics.
///
/// Concurrent publish and load can observe a torn value. That is accepted:
/// the timestamp is only an approximate phase origin, and a torn read is
/// either rejected by the positivity check or yields a slightly wrong origin.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RacyEpoch {
    value: UnsafeCell<f64>,
}

// SAFETY: not data-race free; see the type documentation.
unsafe impl Sync for RacyEpoch {}

impl EpochSlot for RacyEpoch {
    const TIER: SyncTier = SyncTier::Racy;

    fn publish(&self, now: f64) {
        fence(Ordering::SeqCst);
        // SAFETY: the pointer comes from a live cell and is aligned.
        unsafe { core::ptr::write_volatile(self.value.get(), now) };
        fence(Ordering::SeqCst);
    }

    fn load(&self) -> f64 {
        fence(Ordering::SeqCst);
        // SAFETY: the pointer comes from a live cell and is aligned.
        let t = unsafe { core::ptr::read_volatile(self.value.get()) };
        fence(Ordering::SeqCst);
        t
    }
}

#[cfg(target_has_atomic = "64")]
pub type DefaultEpoch = AtomicEpoch;

#[cfg(all(not(target_has_atomic = "64"), target_has_atomic = "8"))]
pub type DefaultEpoch = LockedEpoch;

#[cfg(not(target_has_atomic = "8"))]
pub type DefaultEpoch = RacyEpoch;

// SAFETY: all three are #[repr(C)], pointer-free and valid when zeroed.
#[cfg(target_has_atomic = "64")]
unsafe impl ForkShared for AtomicEpoch {}
#[cfg(target_has_atomic = "8")]
unsafe impl ForkShared for LockedEpoch {}
unsafe impl ForkShared for RacyEpoch {}
