//! Synchronization Signals
//!
//! One-shot rendezvous slots between requester threads and the dispatcher.
//! A requester arms the slot for its response kind, sends the request and
//! waits; the dispatcher signals exactly that slot when the response lands.

pub mod table;

pub use table::{SignalTable, SyncError};

/// One slot per asynchronous response kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncObject {
    IsDebuggerRunning,
    StartedPacketReceived,
    PausedDebuggeeDetails,
    CoreSwitchingResult,
    ProcessSwitchingResult,
    ThreadSwitchingResult,
    ScriptRunningResult,
    ScriptFormatsResult,
    DebuggeeFinishedCommandExecution,
    FlushResult,
    RegisterEvent,
    AddActionToEvent,
    ModifyAndQueryEvent,
    ReadRegisters,
    WriteRegister,
    ReadMemory,
    EditMemory,
    Bp,
    ListOrModifyBreakpoints,
    SymbolReload,
    TestQuery,
    CallstackResult,
    SearchQueryResult,
    Va2paAndPa2vaResult,
    PteResult,
    ShortCircuitingEventState,
    PageInState,
    ApicActions,
    IdtEntries,
    PcitreeResult,
    PcidevinfoResult,
}

impl SyncObject {
    pub const ALL: [SyncObject; 31] = [
        SyncObject::IsDebuggerRunning,
        SyncObject::StartedPacketReceived,
        SyncObject::PausedDebuggeeDetails,
        SyncObject::CoreSwitchingResult,
        SyncObject::ProcessSwitchingResult,
        SyncObject::ThreadSwitchingResult,
        SyncObject::ScriptRunningResult,
        SyncObject::ScriptFormatsResult,
        SyncObject::DebuggeeFinishedCommandExecution,
        SyncObject::FlushResult,
        SyncObject::RegisterEvent,
        SyncObject::AddActionToEvent,
        SyncObject::ModifyAndQueryEvent,
        SyncObject::ReadRegisters,
        SyncObject::WriteRegister,
        SyncObject::ReadMemory,
        SyncObject::EditMemory,
        SyncObject::Bp,
        SyncObject::ListOrModifyBreakpoints,
        SyncObject::SymbolReload,
        SyncObject::TestQuery,
        SyncObject::CallstackResult,
        SyncObject::SearchQueryResult,
        SyncObject::Va2paAndPa2vaResult,
        SyncObject::PteResult,
        SyncObject::ShortCircuitingEventState,
        SyncObject::PageInState,
        SyncObject::ApicActions,
        SyncObject::IdtEntries,
        SyncObject::PcitreeResult,
        SyncObject::PcidevinfoResult,
    ];

    /// Position of the slot in the table
    pub fn index(self) -> usize {
        self as usize
    }
}
