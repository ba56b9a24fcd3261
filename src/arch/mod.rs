//! The architecture-dependent surface: execution contexts, the dispatch
//! trigger and the tick interrupt. Everything outside this module is
//! portable; host builds get inert stand-ins so the core unit-tests on the
//! build machine.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod context;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod interrupts;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use context::{irq_disable, trigger_dispatch, wait_for_interrupt};
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use context::{init_stack, start_first};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::{irq_disable, trigger_dispatch, wait_for_interrupt};
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) use host::{init_stack, start_first};
