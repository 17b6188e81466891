//! kdlink - Remote Kernel Debugger Link
//!
//! Protocol engine between a debugger and a hypervisor-assisted debuggee,
//! plus the trap-flag bookkeeping used while the debugger hides itself.

pub mod config;
pub mod disasm;
pub mod kd;
pub mod protocol;
pub mod signals;
pub mod transparency;
pub mod transport;
pub mod ui;
