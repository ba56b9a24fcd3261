//! The process table and dispatch policy.
//!
//! All process-wide mutable scheduler state lives in one [`Kernel`] value
//! with an explicit lifecycle: `new()` (const), `init()` once, then
//! operations under the caller's critical sections. The target wraps a single
//! instance in `scheduler::mod`; host tests instantiate as many independent
//! kernels as they need.

use crate::arch;
use crate::heap::Heap;
use crate::process::{pack_name, Pcb, Pid, Priority, ProcEntry, ProcState};
use crate::scheduler::ready::ReadyQueue;
use crate::scheduler::MAX_PROCS;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcessError {
    /// The stack allocator could not satisfy the request.
    NoMemory,
    /// Requested stack below the platform minimum.
    InvalidSize,
    /// Every control-block slot is occupied.
    TooManyProcs,
}

/// Smallest stack the kernel accepts: the initial exception frame plus a
/// little call depth.
pub const MIN_STACK_SIZE: usize = 256;

/// Ticks a process may run before the tick interrupt forces a round-robin
/// dispatch (preemptive builds only).
pub const QUANTUM_TICKS: u32 = 10;

/// Process-wide scheduler state: control blocks, the ready list, the current
/// process and the heap backing kernel-owned stacks.
pub struct Kernel {
    procs: [Option<Pcb>; MAX_PROCS],
    ready: ReadyQueue,
    current: Option<Pid>,
    heap: Heap,
    slice_left: u32,
}

// Raw pointers (stack regions, saved sp) only; single-core, serialized by
// the caller's critical sections.
unsafe impl Send for Kernel {}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            procs: [None; MAX_PROCS],
            ready: ReadyQueue::new(),
            current: None,
            heap: Heap::new(),
            slice_left: QUANTUM_TICKS,
        }
    }

    /// Hand the kernel the arena backing kernel-allocated stacks. Must run
    /// once, before the first `spawn` without a caller-supplied stack.
    ///
    /// # Safety
    ///
    /// `arena..arena + len` must be memory reserved for this kernel for its
    /// whole lifetime.
    pub unsafe fn init(&mut self, arena: *mut u8, len: usize) {
        self.heap.init(arena, len);
    }

    /// Create a new process, ready to run, beginning at `entry(arg)`.
    ///
    /// With a null `stack` the region comes from the kernel heap and is
    /// freed again on exit; a caller-supplied stack is never freed by the
    /// kernel. Runs under the caller's critical section so the enqueue is
    /// atomic with respect to the tick interrupt.
    ///
    /// # Safety
    ///
    /// A non-null `stack` must point to `stack_size` writable bytes reserved
    /// for this process until it exits.
    pub unsafe fn spawn(
        &mut self,
        entry: ProcEntry,
        arg: *mut (),
        stack: *mut u8,
        stack_size: usize,
        pri: Priority,
        name: &str,
    ) -> Result<Pid, ProcessError> {
        if stack_size < MIN_STACK_SIZE {
            return Err(ProcessError::InvalidSize);
        }
        let slot = self
            .procs
            .iter()
            .position(|p| p.is_none())
            .ok_or(ProcessError::TooManyProcs)?;

        let owns_stack = stack.is_null();
        let stack_base = if owns_stack {
            self.heap.allocmem(stack_size).ok_or(ProcessError::NoMemory)?
        } else {
            stack
        };

        let sp = arch::init_stack(stack_base, stack_size, entry, arg);
        let pid = Pid(slot as u8);
        self.procs[slot] = Some(Pcb {
            sp,
            pid,
            state: ProcState::Ready,
            pri,
            stack_base,
            stack_size,
            owns_stack,
            user_data: arg,
            name: pack_name(name),
        });
        let queued = self.ready.enqueue(pid, pri);
        debug_assert!(queued.is_ok());
        ktrace!("spawn pid={} pri={}", slot as u8, pri);
        Ok(pid)
    }

    /// The dispatch primitive, shared by yield, block, exit and preemption.
    ///
    /// Stores `saved_sp` into the outgoing process, reaps it if it exited,
    /// re-enqueues it at the tail of its priority class if it was still
    /// running, then picks the highest-priority earliest-enqueued ready
    /// process and returns its saved stack pointer. With nothing else ready
    /// the caller's own sp comes straight back. Runs with interrupts
    /// disabled.
    pub fn reschedule(&mut self, saved_sp: *mut u32) -> *mut u32 {
        if let Some(pid) = self.current.take() {
            let slot = pid.index();
            let mut requeue = None;
            let mut reap = false;
            if let Some(p) = self.procs[slot].as_mut() {
                p.sp = saved_sp;
                match p.state {
                    ProcState::Running => {
                        p.state = ProcState::Ready;
                        requeue = Some(p.pri);
                    }
                    ProcState::Zombie => reap = true,
                    // Sleeping: stays off the queue until woken. Ready: a
                    // wake raced ahead of this dispatch and queued it
                    // already.
                    ProcState::Sleeping | ProcState::Ready => {}
                }
            }
            if let Some(pri) = requeue {
                let queued = self.ready.enqueue(pid, pri);
                debug_assert!(queued.is_ok());
            }
            if reap {
                self.release(pid);
            }
        }

        match self.ready.dequeue() {
            Ok(next) => {
                self.current = Some(next);
                self.slice_left = QUANTUM_TICKS;
                match self.procs[next.index()].as_mut() {
                    Some(p) => {
                        p.state = ProcState::Running;
                        p.sp
                    }
                    None => saved_sp,
                }
            }
            // Nothing ready at all: resume the caller in place. Once the
            // idle process exists this only happens in stripped-down tests.
            Err(_) => saved_sp,
        }
    }

    /// Pick and mark the first process to run. Called once at startup,
    /// before any context exists.
    pub fn dispatch_first(&mut self) -> Option<*mut u32> {
        let next = self.ready.dequeue().ok()?;
        self.current = Some(next);
        self.slice_left = QUANTUM_TICKS;
        self.procs[next.index()].as_mut().map(|p| {
            p.state = ProcState::Running;
            p.sp
        })
    }

    /// Mark the current process terminated. Its control block and stack are
    /// released inside the next dispatch, which runs on the exception stack,
    /// and it is never resumed.
    pub fn exit_current(&mut self) {
        if let Some(pid) = self.current {
            if let Some(p) = self.procs[pid.index()].as_mut() {
                ktrace!("exit pid={}", pid.0);
                p.state = ProcState::Zombie;
            }
        }
    }

    /// Move the current process out of the running set until woken. The
    /// caller must force a dispatch afterwards.
    pub fn block_current(&mut self) {
        if let Some(pid) = self.current {
            if let Some(p) = self.procs[pid.index()].as_mut() {
                debug_assert!(p.state == ProcState::Running);
                p.state = ProcState::Sleeping;
            }
        }
    }

    /// Make a sleeping process eligible to run again. Callable from
    /// interrupt context (timer hooks); a no-op for a process that is not
    /// sleeping.
    pub fn wake(&mut self, pid: Pid) {
        let pri = match self.procs[pid.index()].as_mut() {
            Some(p) if p.state == ProcState::Sleeping => {
                p.state = ProcState::Ready;
                p.pri
            }
            Some(_) => return,
            None => {
                debug_assert!(false, "wake on a destroyed process");
                return;
            }
        };
        let queued = self.ready.enqueue(pid, pri);
        debug_assert!(queued.is_ok());
        ktrace!("wake pid={}", pid.0);
    }

    /// Change a process's priority. A queued process is re-inserted so the
    /// new priority takes effect at the very next dispatch.
    pub fn set_priority(&mut self, pid: Pid, pri: Priority) {
        match self.procs[pid.index()].as_mut() {
            Some(p) => {
                if p.pri == pri {
                    return;
                }
                p.pri = pri;
            }
            None => {
                debug_assert!(false, "set_priority on a destroyed process");
                return;
            }
        }
        if self.ready.remove(pid) {
            let queued = self.ready.enqueue(pid, pri);
            debug_assert!(queued.is_ok());
        }
    }

    /// Whether a strictly higher-priority process than the current one is
    /// waiting.
    pub fn preempt_pending(&self) -> bool {
        let head = match self.ready.head_pri() {
            Some(pri) => pri,
            None => return false,
        };
        match self.current.and_then(|pid| self.procs[pid.index()].as_ref()) {
            Some(p) => head > p.pri,
            None => true,
        }
    }

    /// Burn one tick of the current timeslice; true once it has expired.
    pub fn tick_slice(&mut self) -> bool {
        if self.slice_left > 0 {
            self.slice_left -= 1;
        }
        self.slice_left == 0
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Scheduling state of `pid`, or `None` for a free slot.
    pub fn stat(&self, pid: Pid) -> Option<ProcState> {
        self.procs[pid.index()].as_ref().map(|p| p.state)
    }

    /// The opaque word the process was created with.
    pub fn user_data(&self, pid: Pid) -> Option<*mut ()> {
        self.procs[pid.index()].as_ref().map(|p| p.user_data)
    }

    pub fn name_of(&self, pid: Pid) -> Option<&str> {
        self.procs[pid.index()].as_ref().map(|p| p.name())
    }

    pub fn priority_of(&self, pid: Pid) -> Option<Priority> {
        self.procs[pid.index()].as_ref().map(|p| p.pri)
    }

    /// Live control blocks.
    pub fn proc_count(&self) -> usize {
        self.procs.iter().filter(|p| p.is_some()).count()
    }

    /// The heap backing kernel-owned stacks.
    pub fn stack_heap(&self) -> &Heap {
        &self.heap
    }

    fn release(&mut self, pid: Pid) {
        if let Some(p) = self.procs[pid.index()].take() {
            if p.owns_stack {
                unsafe { self.heap.freemem(p.stack_base, p.stack_size) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    const STACK: usize = 512;

    fn nop(_arg: *mut ()) {}

    // Each test process gets a slice of this scratch block; tests never
    // dispatch for real, the frames just have to exist.
    #[repr(align(16))]
    struct Stacks([u8; STACK * 8]);

    fn spawn_n(kernel: &mut Kernel, stacks: &mut Stacks, n: usize, pri: Priority) -> [Pid; 8] {
        let mut pids = [Pid(0); 8];
        for i in 0..n {
            let base = unsafe { stacks.0.as_mut_ptr().add(i * STACK) };
            pids[i] = unsafe {
                kernel
                    .spawn(nop, ptr::null_mut(), base, STACK, pri, "worker")
                    .unwrap()
            };
        }
        pids
    }

    fn running_count(kernel: &Kernel) -> usize {
        (0..MAX_PROCS as u8)
            .filter(|&i| kernel.stat(Pid(i)) == Some(ProcState::Running))
            .count()
    }

    fn fake_sp() -> *mut u32 {
        ptr::null_mut()
    }

    #[test]
    fn spawned_process_is_ready() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 1, 0);
        assert_eq!(kernel.stat(pids[0]), Some(ProcState::Ready));
        assert_eq!(kernel.proc_count(), 1);
        assert_eq!(kernel.name_of(pids[0]), Some("worker"));
    }

    #[test]
    fn round_robin_is_fair_and_fifo() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 3, 0);

        let first = kernel.dispatch_first().map(|_| kernel.current().unwrap());
        assert_eq!(first, Some(pids[0]));

        // Three rounds of yields: every process runs exactly once per round,
        // in creation order.
        let mut order = [Pid(0); 9];
        for slot in order.iter_mut() {
            kernel.reschedule(fake_sp());
            *slot = kernel.current().unwrap();
        }
        assert_eq!(
            order,
            [
                pids[1], pids[2], pids[0], pids[1], pids[2], pids[0], pids[1], pids[2], pids[0],
            ]
        );
    }

    #[test]
    fn exactly_one_process_runs_at_a_time() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        spawn_n(&mut kernel, &mut stacks, 4, 0);
        assert_eq!(running_count(&kernel), 0);

        kernel.dispatch_first().unwrap();
        assert_eq!(running_count(&kernel), 1);
        for _ in 0..10 {
            kernel.reschedule(fake_sp());
            assert_eq!(running_count(&kernel), 1);
        }
    }

    #[test]
    fn higher_priority_runs_at_next_dispatch() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let low = spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();
        assert!(!kernel.preempt_pending());

        let base = unsafe { stacks.0.as_mut_ptr().add(2 * STACK) };
        let high = unsafe {
            kernel
                .spawn(nop, ptr::null_mut(), base, STACK, 1, "urgent")
                .unwrap()
        };
        assert!(kernel.preempt_pending());

        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(high));
        // The preempted process is still ready, behind its peer.
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(high));
        let _ = low;
    }

    #[test]
    fn yield_with_nothing_else_ready_resumes_self() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 1, 0);
        kernel.dispatch_first().unwrap();

        let sp = kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(pids[0]));
        assert_eq!(kernel.stat(pids[0]), Some(ProcState::Running));
        let _ = sp;
    }

    #[test]
    fn exit_releases_kernel_owned_stack() {
        let mut kernel = Kernel::new();
        #[repr(align(16))]
        struct Arena([u8; 4096]);
        let mut arena = Arena([0; 4096]);
        unsafe { kernel.init(arena.0.as_mut_ptr(), 4096) };
        let free_before = kernel.stack_heap().free_bytes();

        let pid = unsafe {
            kernel
                .spawn(nop, ptr::null_mut(), ptr::null_mut(), STACK, 0, "short")
                .unwrap()
        };
        assert!(kernel.stack_heap().free_bytes() < free_before);

        kernel.dispatch_first().unwrap();
        kernel.exit_current();
        assert_eq!(kernel.stat(pid), Some(ProcState::Zombie));

        kernel.reschedule(fake_sp());
        assert_eq!(kernel.stat(pid), None);
        assert_eq!(kernel.stack_heap().free_bytes(), free_before);
        assert_ne!(kernel.current(), Some(pid));
    }

    #[test]
    fn exit_leaves_caller_stack_alone() {
        let mut kernel = Kernel::new();
        #[repr(align(16))]
        struct Arena([u8; 4096]);
        let mut arena = Arena([0; 4096]);
        unsafe { kernel.init(arena.0.as_mut_ptr(), 4096) };
        let free_before = kernel.stack_heap().free_bytes();

        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 1, 0);
        kernel.dispatch_first().unwrap();
        kernel.exit_current();
        kernel.reschedule(fake_sp());

        assert_eq!(kernel.stat(pids[0]), None);
        assert_eq!(kernel.stack_heap().free_bytes(), free_before);
    }

    #[test]
    fn spawn_fails_cleanly_when_the_arena_is_exhausted() {
        let mut kernel = Kernel::new();
        #[repr(align(16))]
        struct Arena([u8; 512]);
        let mut arena = Arena([0; 512]);
        unsafe { kernel.init(arena.0.as_mut_ptr(), 512) };

        let err = unsafe { kernel.spawn(nop, ptr::null_mut(), ptr::null_mut(), 4096, 0, "big") };
        assert!(matches!(err, Err(ProcessError::NoMemory)));
        assert_eq!(kernel.proc_count(), 0);
    }

    #[test]
    fn undersized_stack_is_rejected() {
        let mut kernel = Kernel::new();
        let mut stack = [0u8; 64];
        let err = unsafe {
            kernel.spawn(nop, ptr::null_mut(), stack.as_mut_ptr(), 64, 0, "tiny")
        };
        assert!(matches!(err, Err(ProcessError::InvalidSize)));
    }

    #[test]
    fn blocked_process_skips_dispatch_until_woken() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();

        kernel.block_current();
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(pids[1]));

        // Only the second process cycles while the first sleeps.
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(pids[1]));
        assert_eq!(kernel.stat(pids[0]), Some(ProcState::Sleeping));

        kernel.wake(pids[0]);
        assert_eq!(kernel.stat(pids[0]), Some(ProcState::Ready));
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(pids[0]));
    }

    #[test]
    fn wake_racing_the_dispatch_does_not_double_queue() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();

        // The process blocks, but the wake arrives before the dispatch does
        // (a timer firing between the block and the context switch).
        kernel.block_current();
        kernel.wake(pids[0]);
        kernel.reschedule(fake_sp());

        // pids[0] must be queued exactly once: the next two dispatches
        // alternate between the two processes.
        kernel.reschedule(fake_sp());
        let a = kernel.current().unwrap();
        kernel.reschedule(fake_sp());
        let b = kernel.current().unwrap();
        assert_ne!(a, b);
        assert!([a, b].contains(&pids[0]) && [a, b].contains(&pids[1]));
    }

    #[test]
    fn wake_of_a_ready_process_is_a_no_op() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();

        kernel.wake(pids[1]);
        kernel.reschedule(fake_sp());
        kernel.reschedule(fake_sp());
        kernel.reschedule(fake_sp());
        // Strict alternation: pids[1] was never queued twice.
        assert_eq!(kernel.current(), Some(pids[1]));
    }

    #[test]
    fn priority_change_requeues_a_ready_process() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 3, 0);
        kernel.dispatch_first().unwrap();

        kernel.set_priority(pids[2], 4);
        assert_eq!(kernel.priority_of(pids[2]), Some(4));
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.current(), Some(pids[2]));
    }

    #[test]
    fn exited_slot_is_reused_by_the_next_spawn() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let pids = spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();
        kernel.exit_current();
        kernel.reschedule(fake_sp());
        assert_eq!(kernel.stat(pids[0]), None);

        let base = unsafe { stacks.0.as_mut_ptr().add(2 * STACK) };
        let fresh = unsafe {
            kernel
                .spawn(nop, ptr::null_mut(), base, STACK, 0, "again")
                .unwrap()
        };
        assert_eq!(fresh, pids[0]);
        assert_eq!(kernel.name_of(fresh), Some("again"));
    }

    #[test]
    fn quantum_expires_after_its_tick_allowance() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        spawn_n(&mut kernel, &mut stacks, 2, 0);
        kernel.dispatch_first().unwrap();

        for _ in 0..QUANTUM_TICKS - 1 {
            assert!(!kernel.tick_slice());
        }
        assert!(kernel.tick_slice());

        // A dispatch recharges the slice.
        kernel.reschedule(fake_sp());
        assert!(!kernel.tick_slice());
    }

    #[test]
    fn user_data_reaches_the_control_block() {
        let mut kernel = Kernel::new();
        let mut stacks = Stacks([0; STACK * 8]);
        let mut word = 0xA5u32;
        let base = stacks.0.as_mut_ptr();
        let pid = unsafe {
            kernel
                .spawn(
                    nop,
                    &mut word as *mut u32 as *mut (),
                    base,
                    STACK,
                    0,
                    "payload",
                )
                .unwrap()
        };
        assert_eq!(kernel.user_data(pid), Some(&mut word as *mut u32 as *mut ()));
    }
}
