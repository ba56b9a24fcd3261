//! The scheduler: one kernel instance, its critical-section discipline, and
//! the free-function API the rest of the firmware calls.

pub mod kernel;
pub mod ready;
pub mod sleep;

pub use kernel::{Kernel, ProcessError, MIN_STACK_SIZE, QUANTUM_TICKS};
pub use ready::ReadyQueue;
pub use sleep::{sleep_ms, sleep_ticks};

use core::cell::{Cell, RefCell};
use core::ptr;

use critical_section::Mutex;

use crate::arch;
use crate::process::{Pid, Priority, ProcEntry, IDLE_PRI};

/// Upper bound on live processes (control-block slots).
pub const MAX_PROCS: usize = 32;

/// Bytes of RAM handed to the stack allocator by [`kernel_init`].
pub const KERN_HEAP_SIZE: usize = 16 * 1024;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    NoSpace,
    Empty,
}

/// The one kernel instance behind the free-function API. Every access runs
/// inside a critical section: the tick interrupt touches the same state.
static KERNEL: Mutex<RefCell<Kernel>> = Mutex::new(RefCell::new(Kernel::new()));

/// Arena carved up into kernel-allocated process stacks.
static mut KERN_ARENA: [u8; KERN_HEAP_SIZE] = [0; KERN_HEAP_SIZE];

/// Invoked by the idle process each round; boards typically hang their
/// watchdog feed here.
static IDLE_HOOK: Mutex<Cell<Option<fn()>>> = Mutex::new(Cell::new(None));

/// One-time kernel bring-up: arms the stack allocator with the static arena.
/// Call before the first [`create_process`].
pub fn kernel_init() {
    critical_section::with(|cs| {
        let mut k = KERNEL.borrow_ref_mut(cs);
        unsafe { k.init(ptr::addr_of_mut!(KERN_ARENA) as *mut u8, KERN_HEAP_SIZE) };
    });
}

/// Create a process on a kernel-allocated stack. Fails with
/// [`ProcessError::NoMemory`] when the arena cannot supply `stack_size`
/// bytes; nothing is created or enqueued in that case.
pub fn create_process(
    entry: ProcEntry,
    arg: *mut (),
    stack_size: usize,
    pri: Priority,
    name: &str,
) -> Result<Pid, ProcessError> {
    critical_section::with(|cs| unsafe {
        KERNEL
            .borrow_ref_mut(cs)
            .spawn(entry, arg, ptr::null_mut(), stack_size, pri, name)
    })
}

/// Create a process on a caller-supplied stack. The kernel never frees it.
///
/// # Safety
///
/// `stack` must point to `stack_size` writable bytes reserved for this
/// process until it exits.
pub unsafe fn create_process_with_stack(
    entry: ProcEntry,
    arg: *mut (),
    stack: *mut u8,
    stack_size: usize,
    pri: Priority,
    name: &str,
) -> Result<Pid, ProcessError> {
    critical_section::with(|cs| {
        KERNEL
            .borrow_ref_mut(cs)
            .spawn(entry, arg, stack, stack_size, pri, name)
    })
}

/// Voluntarily hand the CPU to the next ready process. With nothing else
/// ready the caller simply resumes.
pub fn yield_now() {
    arch::trigger_dispatch();
}

/// Handle of the currently running process.
pub fn current() -> Option<Pid> {
    critical_section::with(|cs| KERNEL.borrow_ref(cs).current())
}

/// The opaque word the current process was created with.
pub fn proc_user_data() -> *mut () {
    critical_section::with(|cs| {
        let k = KERNEL.borrow_ref(cs);
        k.current()
            .and_then(|pid| k.user_data(pid))
            .unwrap_or(ptr::null_mut())
    })
}

/// Change a process's scheduling priority, effective at the next dispatch.
pub fn set_priority(pid: Pid, pri: Priority) {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).set_priority(pid, pri));
}

/// Make a sleeping process ready again. Safe from interrupt context; the
/// seam that signal/semaphore layers build on.
pub fn wake(pid: Pid) {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).wake(pid));
}

/// Terminate the calling process. Its control block and stack are reclaimed
/// inside the dispatch this triggers; it never runs again.
pub fn proc_exit() -> ! {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).exit_current());
    arch::trigger_dispatch();
    // The pended dispatch fires as soon as interrupts come back; nothing
    // below ever executes on hardware.
    loop {
        arch::wait_for_interrupt();
    }
}

/// Register a hook the idle process invokes between waits, typically the
/// board's watchdog feed.
pub fn set_idle_hook(hook: fn()) {
    critical_section::with(|cs| IDLE_HOOK.borrow(cs).set(Some(hook)));
}

/// Start multitasking: bring up the idle process and dispatch the first
/// ready one. Never returns; the boot context is abandoned.
pub fn kernel_start() -> ! {
    // The idle process must exist even with the heap exhausted, so its stack
    // is static.
    static mut IDLE_STACK: [u8; MIN_STACK_SIZE] = [0; MIN_STACK_SIZE];

    // No dispatch may fire between picking the first process and loading its
    // context; the first process re-enables interrupts.
    arch::irq_disable();
    let sp = critical_section::with(|cs| {
        let mut k = KERNEL.borrow_ref_mut(cs);
        let idle = unsafe {
            k.spawn(
                idle_main,
                ptr::null_mut(),
                ptr::addr_of_mut!(IDLE_STACK) as *mut u8,
                MIN_STACK_SIZE,
                IDLE_PRI,
                "idle",
            )
        };
        debug_assert!(idle.is_ok());
        k.dispatch_first()
    });
    match sp {
        Some(sp) => unsafe { arch::start_first(sp) },
        None => loop {
            arch::wait_for_interrupt();
        },
    }
}

/// The always-ready lowest-priority process: services the board hook, waits
/// for the next interrupt, then offers the CPU back. Never blocks, so the
/// ready list is never empty. The yield after every wait is what hands the
/// CPU to a process a timer just woke in cooperative builds, where the tick
/// interrupt itself never forces a dispatch.
fn idle_main(_arg: *mut ()) {
    loop {
        let hook = critical_section::with(|cs| IDLE_HOOK.borrow(cs).get());
        if let Some(hook) = hook {
            hook();
        }
        arch::wait_for_interrupt();
        yield_now();
    }
}

/// Dispatch body for the context-switch path: saves the outgoing stack
/// pointer, returns the incoming one.
pub(crate) fn switch_sp(saved_sp: *mut u32) -> *mut u32 {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).reschedule(saved_sp))
}

/// Tick-side preemption test: true when the running process's timeslice is
/// up or something with strictly higher priority is waiting.
#[cfg(feature = "preempt")]
pub(crate) fn preempt_check(cs: critical_section::CriticalSection<'_>) -> bool {
    let mut k = KERNEL.borrow_ref_mut(cs);
    // Nothing is running before the first dispatch; switching then would
    // load a context that does not exist yet.
    if k.current().is_none() {
        return false;
    }
    let expired = k.tick_slice();
    expired || k.preempt_pending()
}
