//! Kernel status codes carried in result packets.

use std::fmt;

/// Status word reported by the debuggee for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelStatus(pub u32);

impl KernelStatus {
    pub const SUCCESS: KernelStatus = KernelStatus(0xFFFF_FFFF);

    pub const INVALID_CORE_ID: KernelStatus = KernelStatus(0xC000_0001);
    pub const TAG_NOT_EXISTS: KernelStatus = KernelStatus(0xC000_0003);
    pub const INVALID_ADDRESS: KernelStatus = KernelStatus(0xC000_000D);
    pub const INVALID_PROCESS_ID: KernelStatus = KernelStatus(0xC000_0012);
    pub const INVALID_THREAD_ID: KernelStatus = KernelStatus(0xC000_0014);
    pub const BREAKPOINT_ALREADY_EXISTS: KernelStatus = KernelStatus(0xC000_0027);
    pub const BREAKPOINT_ID_NOT_FOUND: KernelStatus = KernelStatus(0xC000_0028);
    pub const UNABLE_TO_GET_CALLSTACK: KernelStatus = KernelStatus(0xC000_0031);
    pub const DEBUGGER_ALREADY_HIDE: KernelStatus = KernelStatus(0xC000_003E);
    pub const DEBUGGER_ALREADY_UNHIDE: KernelStatus = KernelStatus(0xC000_003F);
    pub const INVALID_REGISTER_NUMBER: KernelStatus = KernelStatus(0xC000_0041);
    pub const NOT_ALL_CORES_ARE_LOCKED: KernelStatus = KernelStatus(0xC000_004A);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Human readable message for the error message the debugger shows
    pub fn describe(self) -> String {
        let text = match self {
            Self::SUCCESS => "operation was successful",
            Self::INVALID_CORE_ID => "invalid core id",
            Self::TAG_NOT_EXISTS => "the event tag does not exist",
            Self::INVALID_ADDRESS => "invalid address specified",
            Self::INVALID_PROCESS_ID => "invalid process id",
            Self::INVALID_THREAD_ID => "invalid thread id",
            Self::BREAKPOINT_ALREADY_EXISTS => "breakpoint already exists on the target address",
            Self::BREAKPOINT_ID_NOT_FOUND => "breakpoint id not found",
            Self::UNABLE_TO_GET_CALLSTACK => "unable to get the callstack",
            Self::DEBUGGER_ALREADY_HIDE => "the debugger is already in transparent-mode",
            Self::DEBUGGER_ALREADY_UNHIDE => "the debugger is not in transparent-mode",
            Self::INVALID_REGISTER_NUMBER => "invalid register number",
            Self::NOT_ALL_CORES_ARE_LOCKED => "not all cores are locked",
            _ => return format!("unknown error (0x{:x})", self.0),
        };
        format!("{} (0x{:x})", text, self.0)
    }
}

impl From<u32> for KernelStatus {
    fn from(value: u32) -> Self {
        KernelStatus(value)
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
