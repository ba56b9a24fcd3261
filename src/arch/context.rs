//! Cortex-M0+ execution contexts.
//!
//! A saved context is nothing but the process stack pointer: exception entry
//! pushes r0-r3/r12/lr/pc/xPSR onto the process stack, the PendSV handler
//! saves r4-r11 below that, and the resulting PSP goes into the control
//! block. Every dispatch path (yield, block, exit, tick preemption) pends
//! PendSV, so this is the single switch mechanism in the kernel.

use crate::process::ProcEntry;

/// Request a dispatch. PendSV runs at the lowest exception slot, so a switch
/// pended from an interrupt tail-chains after the handler finishes.
pub fn trigger_dispatch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Sleep the core until the next interrupt.
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Mask interrupts. [`start_first`] re-enables them as it launches the first
/// process.
pub fn irq_disable() {
    cortex_m::interrupt::disable();
}

/// Build the initial frame on a fresh process stack so the first dispatch
/// lands in `entry(arg)`, with the link register aimed at the exit
/// trampoline in case the entry function returns.
pub(crate) unsafe fn init_stack(
    stack_base: *mut u8,
    stack_size: usize,
    entry: ProcEntry,
    arg: *mut (),
) -> *mut u32 {
    // Exception frames must be 8-byte aligned.
    let top = (stack_base as usize + stack_size) & !7;
    let mut sp = top as *mut u32;

    unsafe {
        // Hardware-restored frame, written top down: xPSR, PC, LR, R12,
        // R3-R1, then R0 carrying the entry argument.
        sp = sp.offset(-1);
        *sp = 1 << 24; // xPSR: Thumb state
        sp = sp.offset(-1);
        *sp = entry as usize as u32 | 1; // PC
        sp = sp.offset(-1);
        *sp = proc_return as usize as u32 | 1; // LR
        for _ in 0..4 {
            sp = sp.offset(-1);
            *sp = 0; // R12, R3, R2, R1
        }
        sp = sp.offset(-1);
        *sp = arg as usize as u32; // R0

        // Software-saved block PendSV restores: R11 down to R4.
        for _ in 0..8 {
            sp = sp.offset(-1);
            *sp = 0;
        }
    }
    sp
}

/// Where a process lands if its entry function returns: tear it down as if
/// it had exited explicitly.
extern "C" fn proc_return() {
    crate::scheduler::proc_exit();
}

/// Rust side of the PendSV handler: the PSP already points at the saved
/// R4-R11 block; run the scheduler and hand back the stack pointer to load.
#[unsafe(no_mangle)]
extern "C" fn kern_switch_sp() -> *const u32 {
    let psp = cortex_m::register::psp::read() as *mut u32;
    crate::scheduler::switch_sp(psp) as *const u32
}

/// Launch the very first process: adopt its stack pointer, switch thread
/// mode onto the PSP, unmask interrupts and unwind the initial frame as if
/// returning from an exception.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn start_first(sp: *const u32) -> ! {
    core::arch::naked_asm!(
        // Restore R4-R7 straight from the frame (r0 = sp argument).
        "ldr r4, [r0, #0]",
        "ldr r5, [r0, #4]",
        "ldr r6, [r0, #8]",
        "ldr r7, [r0, #12]",
        // R8-R11 only via a low register on Thumb-1.
        "ldr r1, [r0, #16]",
        "mov r8, r1",
        "ldr r1, [r0, #20]",
        "mov r9, r1",
        "ldr r1, [r0, #24]",
        "mov r10, r1",
        "ldr r1, [r0, #28]",
        "mov r11, r1",
        // Hardware frame starts above the software-saved block.
        "adds r0, r0, #32",
        "msr psp, r0",
        // CONTROL.SPSEL = 1: thread mode runs on the PSP from here on.
        "movs r1, #2",
        "msr CONTROL, r1",
        "isb",
        "cpsie i",
        // Unwind the hardware frame by hand; we are not in an exception.
        "pop {{r0-r3}}",
        "pop {{r4}}",
        "mov r12, r4",
        "pop {{r4}}", // LR
        "mov lr, r4",
        "pop {{r4, r5}}", // PC into r4, discard xPSR
        "bx r4",
    );
}

/// Load a saved context and return to thread mode through the exception
/// return sequence.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kern_resume(sp: *const u32) -> ! {
    core::arch::naked_asm!(
        "ldr r4, [r0, #0]",
        "ldr r5, [r0, #4]",
        "ldr r6, [r0, #8]",
        "ldr r7, [r0, #12]",
        "ldr r1, [r0, #16]",
        "mov r8, r1",
        "ldr r1, [r0, #20]",
        "mov r9, r1",
        "ldr r1, [r0, #24]",
        "mov r10, r1",
        "ldr r1, [r0, #28]",
        "mov r11, r1",
        "adds r0, r0, #32",
        "msr psp, r0",
        // EXC_RETURN: thread mode, PSP.
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
    );
}

/// The context switch itself. Saves R4-R11 below the hardware frame on the
/// outgoing process stack, asks the scheduler for the next stack pointer and
/// resumes whatever it picked (possibly the same process).
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(
        "mrs r0, psp",
        "subs r0, r0, #32",
        "str r4, [r0, #0]",
        "str r5, [r0, #4]",
        "str r6, [r0, #8]",
        "str r7, [r0, #12]",
        "mov r1, r8",
        "str r1, [r0, #16]",
        "mov r1, r9",
        "str r1, [r0, #20]",
        "mov r1, r10",
        "str r1, [r0, #24]",
        "mov r1, r11",
        "str r1, [r0, #28]",
        "msr psp, r0",
        // Scheduler picks the next process; its sp comes back in r0.
        "bl kern_switch_sp",
        "bl kern_resume",
    );
}
