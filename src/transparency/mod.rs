//! Transparent-Mode
//!
//! Hides the debugger from the guest: intercepts #DB/#BP on every core,
//! re-traps threads right after selected system calls return and scrubs
//! hypervisor CPUID leaves.

pub mod broadcast;
pub mod coordinator;
pub mod cpuid;
pub mod registry;


use thiserror::Error;

use crate::protocol::KernelStatus;

pub use broadcast::{BroadcastError, BroadcastOperation, CoreBroadcaster, InterceptionCores};
pub use coordinator::{LoggingSyscallHandler, SyscallReturnHandler, TransparencyCoordinator};
pub use cpuid::CpuidRegisters;
pub use registry::{
    RegistryError, TrapEntry, TrapKey, TrapParams, TrapRegistry,
    MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS,
};

/// RFLAGS.TF
pub const X86_FLAGS_TF: u64 = 1 << 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransparencyError {
    #[error("The debugger is already in transparent-mode")]
    AlreadyHidden,

    #[error("The debugger is not in transparent-mode")]
    AlreadyVisible,

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl TransparencyError {
    /// Status code reported back to the requester
    pub fn status(&self) -> KernelStatus {
        match self {
            Self::AlreadyHidden => KernelStatus::DEBUGGER_ALREADY_HIDE,
            Self::AlreadyVisible => KernelStatus::DEBUGGER_ALREADY_UNHIDE,
            Self::Broadcast(_) => KernelStatus::NOT_ALL_CORES_ARE_LOCKED,
        }
    }
}

/// Register view of the trapped guest on the current core
pub trait GuestContext {
    fn core_id(&self) -> u32;

    /// Live RFLAGS of the guest
    fn rflags(&self) -> u64;

    fn set_rflags(&mut self, rflags: u64);

    /// RFLAGS image restored when the syscall returns (R11 after SYSCALL)
    fn syscall_return_rflags(&self) -> u64;

    fn set_syscall_return_rflags(&mut self, rflags: u64);

    /// RIP of the last VM exit on this core
    fn last_exit_rip(&self) -> u64;
}

/// Plain register snapshot of one core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestRegisters {
    pub core_id: u32,
    pub rflags: u64,
    pub r11: u64,
    pub last_exit_rip: u64,
}

impl GuestContext for GuestRegisters {
    fn core_id(&self) -> u32 {
        self.core_id
    }

    fn rflags(&self) -> u64 {
        self.rflags
    }

    fn set_rflags(&mut self, rflags: u64) {
        self.rflags = rflags;
    }

    fn syscall_return_rflags(&self) -> u64 {
        self.r11
    }

    fn set_syscall_return_rflags(&mut self, rflags: u64) {
        self.r11 = rflags;
    }

    fn last_exit_rip(&self) -> u64 {
        self.last_exit_rip
    }
}
