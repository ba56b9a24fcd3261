//! picokern: a small-footprint real-time kernel for Cortex-M0+ class
//! microcontrollers.
//!
//! Cooperative multitasking with optional tick-driven preemption (`preempt`
//! feature), software timers, and a first-fit block allocator backing
//! process stacks. Shared kernel state (ready list, pending-timer list, the
//! stack heap) is only ever touched inside critical sections, because the
//! tick interrupt walks the same structures.
//!
//! The architecture-specific surface (context switching, the tick interrupt)
//! is confined to [`arch`]; everything else is portable and unit-tests on
//! the host.

#![no_std]

#[macro_use]
mod macros;

pub mod arch;
pub mod heap;
pub mod process;
pub mod scheduler;
pub mod timer;

pub use heap::Heap;
pub use process::{Pcb, Pid, Priority, ProcEntry, ProcState, DEFAULT_PRI, IDLE_PRI};
pub use scheduler::{
    create_process, create_process_with_stack, current, kernel_init, kernel_start, proc_exit,
    proc_user_data, set_idle_hook, set_priority, sleep_ms, sleep_ticks, wake, yield_now, Kernel,
    ProcessError, SchedulerError, KERN_HEAP_SIZE, MAX_PROCS, MIN_STACK_SIZE,
};
pub use timer::{clock, ticks, timer_add, timer_cancel, Timer, TimerHook, TimerQueue};
