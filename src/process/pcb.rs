//! Process control blocks.

/// Opaque process handle: the index of a control-block slot. Slots are reused
/// after a process exits, so a stored `Pid` is only meaningful while its
/// process is alive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pid(pub(crate) u8);

impl Pid {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduling priority. A strictly higher value always runs before a lower
/// one; equal values share the CPU round-robin. As a rule of thumb, keep
/// application processes within -10..=10: compute-bound work below zero,
/// tight interactive loops above.
pub type Priority = i8;

/// Priority assigned when the caller has no preference.
pub const DEFAULT_PRI: Priority = 0;

/// The idle process runs at the lowest representable priority so it never
/// displaces real work.
pub const IDLE_PRI: Priority = Priority::MIN;

/// Process entry point: one opaque word in, and if it ever returns the
/// process is torn down automatically.
pub type ProcEntry = fn(*mut ());

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcState {
    Ready,
    Running,
    Sleeping,
    /// Exited; the control block and stack are reclaimed at the next
    /// dispatch and the process is never resumed.
    Zombie,
}

/// Per-process control block.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Pcb {
    /// Saved process stack pointer; only valid while the process is not
    /// running.
    pub(crate) sp: *mut u32,
    pub(crate) pid: Pid,
    pub(crate) state: ProcState,
    pub(crate) pri: Priority,
    /// Where the stack region starts.
    pub(crate) stack_base: *mut u8,
    pub(crate) stack_size: usize,
    /// The stack came from the kernel heap and is freed again on exit.
    /// Caller-supplied stacks are never freed.
    pub(crate) owns_stack: bool,
    /// Opaque word handed to the entry point, retrievable while running.
    pub(crate) user_data: *mut (),
    /// Debug name, for humans only.
    pub(crate) name: [u8; 8],
}

impl Pcb {
    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.pri
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }
}

pub(crate) fn pack_name(name: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_truncates_to_eight_bytes() {
        let packed = pack_name("background");
        assert_eq!(&packed, b"backgrou");
    }

    #[test]
    fn short_name_round_trips() {
        let pcb = Pcb {
            sp: core::ptr::null_mut(),
            pid: Pid(0),
            state: ProcState::Ready,
            pri: DEFAULT_PRI,
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            owns_stack: false,
            user_data: core::ptr::null_mut(),
            name: pack_name("idle"),
        };
        assert_eq!(pcb.name(), "idle");
    }
}
