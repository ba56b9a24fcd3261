//! Time-domain conversions.
//!
//! Two clocks exist: the coarse 1 kHz scheduler tick counting delays and
//! timeslices, and the free-running 1 MHz hardware counter for sub-tick
//! timestamps. All conversions are integer-only and truncate toward zero.

/// Coarse tick frequency. The tick alarm period in `arch` must agree.
pub const TICKS_PER_SEC: u64 = 1_000;

/// High-resolution counter frequency (the RP2040 TIMER peripheral runs off
/// the 1 MHz watchdog tick).
pub const HP_TICKS_PER_SEC: u64 = 1_000_000;

/// A count of coarse scheduler ticks.
pub type Ticks = u64;

/// A count of high-resolution hardware ticks.
pub type HpTicks = u64;

pub const fn ms_to_ticks(ms: u64) -> Ticks {
    ms * TICKS_PER_SEC / 1_000
}

pub const fn ticks_to_ms(ticks: Ticks) -> u64 {
    ticks * 1_000 / TICKS_PER_SEC
}

pub const fn us_to_ticks(us: u64) -> Ticks {
    us * TICKS_PER_SEC / 1_000_000
}

pub const fn ticks_to_us(ticks: Ticks) -> u64 {
    ticks * 1_000_000 / TICKS_PER_SEC
}

pub const fn us_to_hpticks(us: u64) -> HpTicks {
    us * HP_TICKS_PER_SEC / 1_000_000
}

pub const fn hpticks_to_us(hp: HpTicks) -> u64 {
    hp * 1_000_000 / HP_TICKS_PER_SEC
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hp {
    use core::ptr;

    // The hardware counter handle outlives the kernel: board bring-up keeps
    // it alive in the boot frame, which is never torn down.
    static mut HP_COUNTER: *const rp2040_hal::Timer = ptr::null();

    /// Register the free-running hardware counter used for sub-tick
    /// timestamps.
    ///
    /// # Safety
    ///
    /// The referenced timer must stay valid for the rest of the kernel's
    /// lifetime.
    pub unsafe fn register_hp_counter(timer: &rp2040_hal::Timer) {
        unsafe {
            HP_COUNTER = timer as *const _;
        }
    }

    /// Current value of the free-running 1 MHz counter, in microseconds.
    /// Reads the peripheral directly; no tick interrupt involved.
    pub fn hp_now_us() -> u64 {
        unsafe {
            debug_assert!(!HP_COUNTER.is_null(), "hp counter not registered");
            if HP_COUNTER.is_null() {
                return 0;
            }
            (*HP_COUNTER).get_counter().ticks()
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod hp {
    use core::sync::atomic::{AtomicU64, Ordering};

    static HP_NOW: AtomicU64 = AtomicU64::new(0);

    /// Current value of the high-resolution counter, in microseconds.
    pub fn hp_now_us() -> u64 {
        HP_NOW.load(Ordering::Relaxed)
    }

    /// Host-side stand-in for the hardware counter, settable by tests.
    pub fn set_hp_now_us(us: u64) {
        HP_NOW.store(us, Ordering::Relaxed);
    }
}

pub use hp::*;
