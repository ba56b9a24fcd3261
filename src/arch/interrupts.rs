//! The periodic tick interrupt.
//!
//! Alarm 0 of the RP2040 timer block fires every tick period. The handler
//! re-arms the alarm, advances the software timer subsystem, and in
//! preemptive builds pends a dispatch when the timer service made a
//! higher-priority process ready or the running process's timeslice is up.

use core::cell::RefCell;

use critical_section::Mutex;
use rp2040_hal::fugit::MicrosDurationU32;
use rp2040_hal::timer::{Alarm, Alarm0};

/// Tick period. `clock::TICKS_PER_SEC` counts these.
pub const TICK_PERIOD: MicrosDurationU32 = MicrosDurationU32::micros(1_000);

static ALARM: Mutex<RefCell<Option<Alarm0>>> = Mutex::new(RefCell::new(None));

/// Hand the kernel the alarm that drives the tick. Board bring-up schedules
/// the first shot and enables the alarm interrupt before calling this.
pub fn set_tick_alarm(alarm: Alarm0) {
    critical_section::with(|cs| {
        ALARM.borrow(cs).replace(Some(alarm));
    });
}

#[unsafe(no_mangle)]
extern "C" fn TIMER_IRQ_0() {
    critical_section::with(|cs| {
        if let Some(alarm) = ALARM.borrow(cs).borrow_mut().as_mut() {
            alarm.clear_interrupt();
            let _ = alarm.schedule(TICK_PERIOD);
        }

        crate::timer::service_tick(cs);

        #[cfg(feature = "preempt")]
        if crate::scheduler::preempt_check(cs) {
            cortex_m::peripheral::SCB::set_pendsv();
        }
    });
}
