//! Software timers driven by the periodic tick interrupt.
//!
//! Callers own the storage of every [`Timer`]; the subsystem only links them
//! into a pending list kept sorted ascending by expiry tick, so the tick
//! handler never looks past the head. Each timer fires exactly once and is
//! unlinked before its hook runs; periodic behavior is re-adding from the
//! hook (through the global [`timer_add`], which re-borrows the queue
//! safely).

pub mod clock;

use core::cell::RefCell;
use core::ptr;

use critical_section::{CriticalSection, Mutex};

pub use clock::{Ticks, TICKS_PER_SEC};

/// Interrupt-context callback paired with an opaque argument ("softirq
/// hook"). It runs with the tick interrupt's critical section held: keep it
/// short, never block, never touch the allocator. Typical bodies wake a
/// process or set a flag.
pub type TimerHook = fn(*mut ());

/// One scheduled future event.
///
/// Stack- or statically-allocated by the caller; the subsystem never
/// allocates or frees one. A timer must not be re-added while pending.
#[repr(C)]
pub struct Timer {
    expiry: Ticks,
    hook: Option<TimerHook>,
    arg: *mut (),
    next: *mut Timer,
    pending: bool,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            expiry: 0,
            hook: None,
            arg: ptr::null_mut(),
            next: ptr::null_mut(),
            pending: false,
        }
    }

    /// Whether the timer is linked into a pending list right now.
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// The pending-timer list plus the tick counter it is measured against.
pub struct TimerQueue {
    head: *mut Timer,
    ticks: Ticks,
}

// Raw links into caller-owned timers; single-core, serialized by the
// caller's critical sections.
unsafe impl Send for TimerQueue {}

impl TimerQueue {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            ticks: 0,
        }
    }

    /// Current value of the coarse tick counter.
    pub fn now(&self) -> Ticks {
        self.ticks
    }

    /// Arm `timer` to fire `delay` ticks from now.
    ///
    /// Inserts at the position preserving ascending expiry order, behind
    /// existing entries with the same expiry so ties fire in registration
    /// order. The list is also walked by the tick handler, so calls must run
    /// with interrupts disabled.
    ///
    /// # Safety
    ///
    /// `timer` must stay alive and at a stable address until it fires or is
    /// cancelled. It must not already be pending.
    pub unsafe fn add(&mut self, timer: *mut Timer, delay: Ticks, hook: Option<TimerHook>, arg: *mut ()) {
        debug_assert!(!(*timer).pending, "timer re-added while pending");

        (*timer).expiry = self.ticks + delay;
        (*timer).hook = hook;
        (*timer).arg = arg;
        (*timer).pending = true;

        let mut prev: *mut Timer = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() && (*cur).expiry <= (*timer).expiry {
            prev = cur;
            cur = (*cur).next;
        }
        (*timer).next = cur;
        if prev.is_null() {
            self.head = timer;
        } else {
            (*prev).next = timer;
        }
    }

    /// Disarm `timer`: unlink it from the pending list if present. A no-op
    /// if it already fired. Interrupt-safe under the same discipline as
    /// [`TimerQueue::add`].
    ///
    /// # Safety
    ///
    /// `timer` must point to a live `Timer`.
    pub unsafe fn cancel(&mut self, timer: *mut Timer) {
        let mut prev: *mut Timer = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() {
            if cur == timer {
                if prev.is_null() {
                    self.head = (*cur).next;
                } else {
                    (*prev).next = (*cur).next;
                }
                (*cur).next = ptr::null_mut();
                (*cur).pending = false;
                return;
            }
            prev = cur;
            cur = (*cur).next;
        }
    }

    /// Advance the tick counter by one.
    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    /// Unlink and return the head timer's hook if its expiry has been
    /// reached.
    pub fn pop_due(&mut self) -> Option<(Option<TimerHook>, *mut ())> {
        unsafe {
            if self.head.is_null() || (*self.head).expiry > self.ticks {
                return None;
            }
            let timer = self.head;
            self.head = (*timer).next;
            (*timer).next = ptr::null_mut();
            (*timer).pending = false;
            Some(((*timer).hook, (*timer).arg))
        }
    }

    /// One full tick: advance time, then fire every due timer in expiry
    /// order. Hooks run in interrupt context and must not touch this queue
    /// directly (re-arm through the global API instead).
    pub fn service(&mut self) {
        self.tick();
        while let Some((hook, arg)) = self.pop_due() {
            if let Some(hook) = hook {
                hook(arg);
            }
        }
    }
}

/// The one timer queue driven by the hardware tick.
static TIMERS: Mutex<RefCell<TimerQueue>> = Mutex::new(RefCell::new(TimerQueue::new()));

/// Ticks elapsed since the kernel started.
pub fn ticks() -> Ticks {
    critical_section::with(|cs| TIMERS.borrow_ref(cs).now())
}

/// Arm `timer` to fire `delay` ticks from now, invoking `hook(arg)` from the
/// tick interrupt.
///
/// # Safety
///
/// `timer` must stay alive and at a stable address until it fires or is
/// cancelled, and must not already be pending.
pub unsafe fn timer_add(timer: *mut Timer, delay: Ticks, hook: Option<TimerHook>, arg: *mut ()) {
    critical_section::with(|cs| {
        ktrace!("timer add: delay={}", delay);
        TIMERS.borrow_ref_mut(cs).add(timer, delay, hook, arg)
    })
}

/// Disarm `timer`; a no-op if it already fired.
///
/// # Safety
///
/// `timer` must point to a live `Timer`.
pub unsafe fn timer_cancel(timer: *mut Timer) {
    critical_section::with(|cs| TIMERS.borrow_ref_mut(cs).cancel(timer))
}

/// The tick interrupt body: advance time and fire due timers. The queue
/// borrow is dropped around each hook so hooks may re-arm timers through
/// [`timer_add`].
pub(crate) fn service_tick(cs: CriticalSection<'_>) {
    TIMERS.borrow_ref_mut(cs).tick();
    loop {
        let due = TIMERS.borrow_ref_mut(cs).pop_due();
        match due {
            Some((Some(hook), arg)) => hook(arg),
            Some((None, _)) => {}
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Seq {
        fired: [u64; 8],
        n: usize,
    }

    struct Tag {
        seq: *mut Seq,
        delay: u64,
    }

    fn record(arg: *mut ()) {
        unsafe {
            let tag = &*(arg as *const Tag);
            let seq = &mut *tag.seq;
            seq.fired[seq.n] = tag.delay;
            seq.n += 1;
        }
    }

    #[test]
    fn timers_fire_in_expiry_order() {
        let mut q = TimerQueue::new();
        let mut seq = Seq { fired: [0; 8], n: 0 };
        let seq_ptr: *mut Seq = &mut seq;
        let delays = [170u64, 50, 310, 1500, 310];
        let mut timers = [
            Timer::new(),
            Timer::new(),
            Timer::new(),
            Timer::new(),
            Timer::new(),
        ];
        let mut tags = [
            Tag { seq: seq_ptr, delay: delays[0] },
            Tag { seq: seq_ptr, delay: delays[1] },
            Tag { seq: seq_ptr, delay: delays[2] },
            Tag { seq: seq_ptr, delay: delays[3] },
            Tag { seq: seq_ptr, delay: delays[4] },
        ];

        for i in 0..5 {
            unsafe {
                q.add(
                    &mut timers[i],
                    delays[i],
                    Some(record),
                    &mut tags[i] as *mut Tag as *mut (),
                );
            }
        }
        for _ in 0..1_500 {
            q.service();
        }

        assert_eq!(seq.n, 5);
        assert_eq!(seq.fired[..5], [50, 170, 310, 310, 1500]);
    }

    #[test]
    fn timer_fires_within_one_tick_of_its_delay() {
        let mut q = TimerQueue::new();
        let mut seq = Seq { fired: [0; 8], n: 0 };
        let seq_ptr: *mut Seq = &mut seq;
        let mut tag = Tag { seq: seq_ptr, delay: 5 };
        let mut timer = Timer::new();
        unsafe { q.add(&mut timer, 5, Some(record), &mut tag as *mut Tag as *mut ()) };

        for _ in 0..4 {
            q.service();
        }
        assert_eq!(seq.n, 0, "fired early");
        q.service();
        assert_eq!(seq.n, 1);
        assert_eq!(q.now(), 5);
        assert!(!timer.is_pending());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut q = TimerQueue::new();
        let mut seq = Seq { fired: [0; 8], n: 0 };
        let seq_ptr: *mut Seq = &mut seq;
        let mut tag = Tag { seq: seq_ptr, delay: 3 };
        let mut timer = Timer::new();
        unsafe {
            q.add(&mut timer, 3, Some(record), &mut tag as *mut Tag as *mut ());
            assert!(timer.is_pending());
            q.cancel(&mut timer);
        }
        assert!(!timer.is_pending());
        for _ in 0..10 {
            q.service();
        }
        assert_eq!(seq.n, 0);
    }

    #[test]
    fn cancel_after_firing_is_a_no_op() {
        let mut q = TimerQueue::new();
        let mut timer = Timer::new();
        unsafe { q.add(&mut timer, 1, None, ptr::null_mut()) };
        q.service();
        assert!(!timer.is_pending());
        unsafe { q.cancel(&mut timer) };
        assert!(!timer.is_pending());
    }

    #[test]
    fn fired_timer_can_be_armed_again() {
        let mut q = TimerQueue::new();
        let mut seq = Seq { fired: [0; 8], n: 0 };
        let seq_ptr: *mut Seq = &mut seq;
        let mut tag = Tag { seq: seq_ptr, delay: 2 };
        let mut timer = Timer::new();
        unsafe { q.add(&mut timer, 2, Some(record), &mut tag as *mut Tag as *mut ()) };
        q.service();
        q.service();
        assert_eq!(seq.n, 1);

        unsafe { q.add(&mut timer, 2, Some(record), &mut tag as *mut Tag as *mut ()) };
        q.service();
        q.service();
        assert_eq!(seq.n, 2);
    }

    #[test]
    fn cancel_keeps_the_rest_of_the_list_intact() {
        let mut q = TimerQueue::new();
        let mut seq = Seq { fired: [0; 8], n: 0 };
        let seq_ptr: *mut Seq = &mut seq;
        let mut tags = [
            Tag { seq: seq_ptr, delay: 1 },
            Tag { seq: seq_ptr, delay: 2 },
            Tag { seq: seq_ptr, delay: 3 },
        ];
        let mut timers = [Timer::new(), Timer::new(), Timer::new()];
        unsafe {
            for i in 0..3 {
                q.add(
                    &mut timers[i],
                    (i + 1) as Ticks,
                    Some(record),
                    &mut tags[i] as *mut Tag as *mut (),
                );
            }
            q.cancel(&mut timers[1]);
        }
        for _ in 0..5 {
            q.service();
        }
        assert_eq!(seq.n, 2);
        assert_eq!(seq.fired[..2], [1, 3]);
    }
}
