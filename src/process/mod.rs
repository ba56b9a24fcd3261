pub mod pcb;

pub use pcb::*;
