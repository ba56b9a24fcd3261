//! Tick-driven process delays, built on the timer subsystem.

use crate::arch;
use crate::process::Pid;
use crate::scheduler::KERNEL;
use crate::timer::{clock, Ticks, Timer};

/// Put the current process to sleep for at least `delay` ticks. Wakes within
/// one tick period after the delay elapses.
///
/// The waking timer lives on the sleeping process's own stack; it stays put
/// until it fires, because the process does not run again before then.
pub fn sleep_ticks(delay: Ticks) {
    let pid = match crate::scheduler::current() {
        Some(pid) => pid,
        None => return,
    };
    let mut waker = Timer::new();
    critical_section::with(|cs| {
        unsafe {
            crate::timer::timer_add(&mut waker, delay, Some(wake_hook), pid.index() as *mut ());
        }
        KERNEL.borrow_ref_mut(cs).block_current();
    });
    arch::trigger_dispatch();
    // Execution resumes here once the timer fired and a dispatch picked the
    // process again.
    debug_assert!(!waker.is_pending());
}

/// Sleep for at least `ms` milliseconds.
pub fn sleep_ms(ms: u64) {
    sleep_ticks(clock::ms_to_ticks(ms));
}

/// Softirq side of a sleep: runs from the tick interrupt when the delay
/// elapses and moves the process back onto the ready list.
fn wake_hook(arg: *mut ()) {
    let pid = Pid(arg as usize as u8);
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).wake(pid));
}
