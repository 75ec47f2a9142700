/// Seconds on `CLOCK_MONOTONIC`.
///
/// The clock is system-wide, so timestamps taken in different worker
/// processes compare directly, and it counts from boot, so it is always
/// strictly positive.
pub fn now() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec and CLOCK_MONOTONIC always exists.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 / 1_000_000_000.0
}
