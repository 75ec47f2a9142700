//! Architecture-specific delay instructions.
//!
//! Everything here is a single instruction (or a short fixed burst) so a
//! caller polling a deadline between invocations stays responsive.

#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm"))]
use core::arch::asm;

/// Nine back-to-back `nop`s.
#[inline]
pub fn nop_burst() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm"))]
    {
        // SAFETY: nop has no operands and no side effects.
        unsafe {
            asm!(
                "nop", "nop", "nop", "nop", "nop", "nop", "nop", "nop", "nop",
                options(nomem, nostack, preserves_flags),
            );
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
    {
        for _ in 0..9 {
            core::hint::black_box(());
        }
    }
}

/// x86 `pause`: spin-wait hint, delays the pipeline for a few dozen cycles.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
pub fn pause() {
    // SAFETY: pause has no operands and no architectural side effects.
    unsafe { asm!("pause", options(nomem, nostack, preserves_flags)) };
}

/// Arm `yield`: hints that another hardware thread may run.
#[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
#[inline]
pub fn yield_hint() {
    // SAFETY: yield has no operands and no architectural side effects.
    unsafe { asm!("yield", options(nomem, nostack, preserves_flags)) };
}

#[cfg(target_arch = "x86_64")]
pub mod x86 {
    use core::arch::asm;
    use core::sync::atomic::{AtomicU8, Ordering};

    /// Upper bound on RDRAND retries so a starved DRNG cannot wedge the caller.
    pub const RDRAND_RETRIES: u32 = 10;

    // 0 = unchecked, 1 = absent, 2 = present
    static RDRAND_SUPPORT: AtomicU8 = AtomicU8::new(0);

    /// Checks CPUID leaf 1, ECX bit 30 for RDRAND support.
    pub fn has_rdrand() -> bool {
        let cached = RDRAND_SUPPORT.load(Ordering::Relaxed);
        if cached != 0 {
            return cached == 2;
        }

        // SAFETY: CPUID is always available on x86_64.
        let ecx: u32;
        unsafe {
            asm!(
                "push rbx",       // rbx is callee-saved
                "mov eax, 1",
                "cpuid",
                "mov {ecx:e}, ecx",
                "pop rbx",
                ecx = out(reg) ecx,
                out("eax") _,
                out("ecx") _,
                out("edx") _,
            );
        }

        let present = (ecx >> 30) & 1 == 1;
        RDRAND_SUPPORT.store(if present { 2 } else { 1 }, Ordering::Relaxed);
        present
    }

    /// Executes RDRAND and returns the 64-bit result, retrying up to `retries` times.
    pub fn rdrand64(retries: u32) -> Option<u64> {
        for _ in 0..retries {
            let value: u64;
            let success: u8;
            // SAFETY: only reached once CPUID reported RDRAND; the asm touches
            // no memory and both outputs are declared.
            unsafe {
                asm!(
                    "rdrand {val}",
                    "setc {ok}",
                    val = out(reg) value,
                    ok = out(reg_byte) success,
                    options(nomem, nostack),
                );
            }
            if success != 0 {
                return Some(value);
            }
        }
        None
    }
}

/// Reports whether the RDRAND primitive really executes RDRAND on this CPU.
pub fn has_rdrand() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        x86::has_rdrand()
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}
