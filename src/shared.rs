//! Anonymous shared memory that survives `fork(2)`.
//!
//! The parent maps the region before forking; every child inherits the same
//! physical pages at the same virtual address, so plain references into the
//! region are valid in all of them.

use std::io;
use std::mem::size_of;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::error::Error;

/// Types that may live in a [`SharedRegion`] and be touched by several
/// processes at once.
///
/// # Safety
///
/// Implementers must be `#[repr(C)]`, contain no pointers or references, stay
/// sound if `Drop` never runs in a child, and synchronize their own interior
/// mutability.
pub unsafe trait ForkShared: Send + Sync {}

/// Owner of a `MAP_SHARED | MAP_ANONYMOUS` mapping holding one `T`.
///
/// Unmapped on drop. The contents are never dropped.
pub struct SharedRegion<T: ForkShared> {
    ptr: NonNull<T>,
    len: usize,
}

// SAFETY: T: ForkShared already requires Send + Sync, and the mapping is not
// tied to a thread.
unsafe impl<T: ForkShared> Send for SharedRegion<T> {}
unsafe impl<T: ForkShared> Sync for SharedRegion<T> {}

impl<T: ForkShared + Default> SharedRegion<T> {
    /// Maps a fresh region and initializes it with `T::default()`.
    pub fn new() -> Result<Self, Error> {
        let len = size_of::<T>().max(1);

        // SAFETY: anonymous mapping with no fixed address; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            return Err(Error::Io(io::Error::new(
                e.kind(),
                format!("mmap of {} shared bytes failed: {}", len, e),
            )));
        }

        // mmap returns page-aligned memory, which satisfies any T alignment.
        let ptr = addr.cast::<T>();
        // SAFETY: ptr is valid for writes of `len >= size_of::<T>()` bytes.
        unsafe { ptr.write(T::default()) };

        Ok(Self {
            // SAFETY: mmap never returns null on success.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            len,
        })
    }
}

impl<T: ForkShared> SharedRegion<T> {
    pub fn mapped_bytes(&self) -> usize {
        self.len
    }
}

impl<T: ForkShared> Deref for SharedRegion<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mapping stays live and initialized until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ForkShared> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in new().
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

/// Helpers for tests that fork.
#[cfg(test)]
pub(crate) mod fork_support {
    use std::io;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Mutex, MutexGuard};

    static FORK_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes forking tests so a `waitpid(-1)` in one never reaps the
    /// children of another.
    pub fn fork_guard() -> MutexGuard<'static, ()> {
        FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forks a child that runs `body` and exits with its return value, or
    /// with 101 if it panics.
    pub fn fork_child<F: FnOnce() -> i32>(body: F) -> libc::pid_t {
        // SAFETY: the child runs `body` and leaves through _exit without
        // returning into the test harness.
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed: {}", io::Error::last_os_error()),
            0 => {
                let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(101);
                // SAFETY: _exit never returns.
                unsafe { libc::_exit(code) }
            }
            pid => pid,
        }
    }

    /// Waits for `pid`. Returns its exit code, or `None` if it was killed.
    pub fn wait_child(pid: libc::pid_t) -> Option<i32> {
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: status is a valid, writable c_int.
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret == pid {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                panic!("waitpid({}) failed: {}", pid, err);
            }
        }
        if libc::WIFEXITED(status) {
            Some(libc::WEXITSTATUS(status))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fork_support::{fork_child, fork_guard, wait_child};
    use super::*;
    use crate::clock;
    use crate::load::epoch::{DefaultEpoch, EpochSlot, RacyEpoch};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// What each forked reader saw, as `f64` bits.
    #[repr(C)]
    #[derive(Default)]
    struct Sightings {
        seen: [AtomicU64; 3],
    }

    // SAFETY: repr(C) atomics, valid when zeroed.
    unsafe impl ForkShared for Sightings {}

    #[test]
    fn test_region_starts_unpublished() {
        let region = SharedRegion::<DefaultEpoch>::new().unwrap();
        assert_eq!(region.load(), 0.0);
        assert!(region.mapped_bytes() >= size_of::<DefaultEpoch>());
    }

    #[test]
    fn test_region_publish_visible_through_deref() {
        let region = SharedRegion::<RacyEpoch>::new().unwrap();
        region.publish(3.5);
        let slot: &RacyEpoch = &region;
        assert_eq!(slot.load(), 3.5);
    }

    #[test]
    fn test_region_shared_across_threads() {
        let region = SharedRegion::<DefaultEpoch>::new().unwrap();
        std::thread::scope(|s| {
            s.spawn(|| region.publish(7.0));
        });
        assert_eq!(region.read(|| false), Some(7.0));
    }

    #[test]
    fn test_epoch_shared_across_forked_workers() {
        let _guard = fork_guard();
        let epoch = SharedRegion::<DefaultEpoch>::new().unwrap();
        let sightings = SharedRegion::<Sightings>::new().unwrap();
        let give_up = clock::now() + 5.0;

        // Readers start first so they have to wait for instance 0.
        let pids: Vec<_> = [1usize, 2, 0]
            .into_iter()
            .map(|instance| {
                let epoch = &epoch;
                let sightings = &sightings;
                fork_child(move || {
                    if instance == 0 {
                        epoch.publish(clock::now());
                    }
                    match epoch.read(|| clock::now() < give_up) {
                        Some(t) if t > 0.0 => {
                            sightings.seen[instance].store(t.to_bits(), Ordering::SeqCst);
                            0
                        }
                        _ => 1,
                    }
                })
            })
            .collect();

        for pid in pids {
            assert_eq!(wait_child(pid), Some(0));
        }

        let published = epoch.load();
        assert!(published > 0.0);
        for slot in &sightings.seen {
            assert_eq!(f64::from_bits(slot.load(Ordering::SeqCst)), published);
        }
    }
}
