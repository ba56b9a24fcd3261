//! Host-side stand-ins. The portable core unit-tests on the build machine,
//! where no context switch ever happens: frames are laid out but never
//! loaded, and dispatch triggers are inert.

use core::ptr;

use crate::process::ProcEntry;

const FRAME_WORDS: usize = 16;

/// Reserve and zero the area a real frame would occupy, so stack accounting
/// behaves like the target's.
pub(crate) unsafe fn init_stack(
    stack_base: *mut u8,
    stack_size: usize,
    _entry: ProcEntry,
    _arg: *mut (),
) -> *mut u32 {
    let top = (stack_base as usize + stack_size) & !7;
    let sp = (top - FRAME_WORDS * 4) as *mut u32;
    unsafe {
        ptr::write_bytes(sp, 0, FRAME_WORDS);
    }
    sp
}

pub fn trigger_dispatch() {}

pub fn wait_for_interrupt() {}

pub fn irq_disable() {}

pub(crate) unsafe fn start_first(_sp: *const u32) -> ! {
    unreachable!("no execution contexts on the host")
}
