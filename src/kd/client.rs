//! Requester API of the debugger
//!
//! Every request follows the same rendezvous: arm the response slot, send
//! the packet, block until the dispatcher signals the slot. The slot is armed
//! before sending so a fast response can never be missed.

use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

use crate::protocol::payload::{
    CallstackResult, ChangeCoreResult, DetailsAction, EventAndActionResult, FlushResult,
    ModifyEventAction, ModifyEventRequest, ModifyEventsResult, PciDeviceEntry, PcidevinfoResult,
    PcitreeResult, ProcessDetailsResult, PteResult, ReadMemoryRequest, RunScriptRequest,
    ScriptResult, SearchResult, StatusResult, StepType, TestQueryRequest, TestQueryResult,
    ThreadDetailsResult, TranslationResult,
};
use crate::protocol::{
    packet::MIN_PACKET_SIZE, ByteWriter, DebuggeeMessage, DecodeError, KernelStatus, PacketType,
    PausedPacket, RemotePacket, RequestedAction, WirePayload, MAX_SERIAL_PACKET_SIZE,
};
use crate::signals::{SyncError, SyncObject};
use crate::transport::TransportError;

use super::handlers::{response_slot, status_of};
use super::listener::{spawn_listener, ListenerError};
use super::KdContext;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Malformed response: {0}")]
    Decode(#[from] DecodeError),

    #[error("err, {}", .0.describe())]
    Kernel(KernelStatus),

    #[error("No response is defined for {0:?}")]
    NoResponse(RequestedAction),

    #[error("Unexpected response {0:?}")]
    UnexpectedResponse(RequestedAction),

    #[error("Not connected to a debuggee")]
    NotConnected,

    #[error("Request of {size:#x} bytes exceeds the largest response ({max:#x} bytes)")]
    RequestTooLarge { size: usize, max: usize },
}

/// Action the debuggee answers a kernel-mode request with
pub fn response_for(request: RequestedAction) -> Option<RequestedAction> {
    use RequestedAction as A;

    let response = match request {
        A::ModeChangeCore => A::DebuggeeResultOfChangingCore,
        A::ModeChangeProcess => A::DebuggeeResultOfChangingProcess,
        A::ModeChangeThread => A::DebuggeeResultOfChangingThread,
        A::ModeFlushBuffers => A::DebuggeeResultOfFlush,
        A::ModeCallstack => A::DebuggeeResultOfCallstack,
        A::ModeTestQuery => A::DebuggeeResultTestQuery,
        A::ModeRunScript => A::DebuggeeResultOfRunningScript,
        A::ModeSearchQuery => A::DebuggeeReloadSearchQuery,
        A::ModeRegisterEvent => A::DebuggeeResultOfRegisteringEvent,
        A::ModeAddActionToEvent => A::DebuggeeResultOfAddingActionToEvent,
        A::ModeQueryAndModifyEvent => A::DebuggeeResultOfQueryAndModifyEvent,
        A::ModeReadRegisters => A::DebuggeeResultOfReadingRegisters,
        A::ModeWriteRegister => A::DebuggeeResultOfWriteRegister,
        A::ModeReadMemory => A::DebuggeeResultOfReadingMemory,
        A::ModeEditMemory => A::DebuggeeResultOfEditingMemory,
        A::ModeBp => A::DebuggeeResultOfBp,
        A::ModeListOrModifyBreakpoints => A::DebuggeeResultOfListOrModifyBreakpoints,
        A::ModeSymbolReload => A::DebuggeeReloadSymbolFinished,
        A::ModeQueryPa2vaAndVa2pa => A::DebuggeeResultOfVa2paAndPa2va,
        A::ModeQueryPte => A::DebuggeeResultOfPte,
        A::ModeSetShortCircuitingState => A::DebuggeeResultOfShortCircuitingState,
        A::ModeInjectPageFault => A::DebuggeeResultOfBringingPagesIn,
        A::ModeApicRequest => A::DebuggeeResultOfApicRequests,
        A::ModeQueryIdtEntries => A::DebuggeeResultOfQueryIdtEntries,
        A::ModeQueryPcitree => A::DebuggeeResultOfPcitree,
        A::ModeQueryPcidevinfo => A::DebuggeeResultOfPcidevinfo,
        _ => return None,
    };
    Some(response)
}

/// Unwrap the expected response variant
macro_rules! expect_response {
    ($msg:expr, $variant:ident) => {
        match $msg {
            DebuggeeMessage::$variant(inner) => Ok(inner),
            other => Err(ClientError::UnexpectedResponse(other.action())),
        }
    };
}

/// Handle of a connected debugging session
pub struct KernelDebugger {
    ctx: Arc<KdContext>,
    listener: Option<JoinHandle<Result<(), ListenerError>>>,
}

impl KernelDebugger {
    /// Start the dispatcher and wait for the debuggee's "started" packet
    pub fn connect(ctx: Arc<KdContext>) -> Result<Self, ClientError> {
        ctx.signals.arm(SyncObject::StartedPacketReceived, 0)?;

        let listener = match spawn_listener(ctx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                ctx.signals.disarm(SyncObject::StartedPacketReceived);
                return Err(TransportError::Io(e).into());
            }
        };

        log::info!("Waiting for the debuggee to start...");
        ctx.signals.wait_for(SyncObject::StartedPacketReceived)?;

        Ok(Self {
            ctx,
            listener: Some(listener),
        })
    }

    pub fn context(&self) -> &Arc<KdContext> {
        &self.ctx
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.state.is_connected()
    }

    fn kernel_packet(action: RequestedAction, payload: Vec<u8>) -> RemotePacket {
        RemotePacket::new(PacketType::DebuggerToDebuggeeExecuteOnVmxRoot, action, payload)
    }

    /// Arm `slot`, send the request and wait for the response bytes
    pub fn round_trip(
        &self,
        packet: &RemotePacket,
        slot: SyncObject,
        capacity: usize,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        self.ctx.signals.arm(slot, capacity)?;

        // the dispatcher releases armed slots on close; check after arming
        if !self.ctx.state.is_connected() {
            self.ctx.signals.disarm(slot);
            return Err(ClientError::NotConnected);
        }

        if let Err(e) = self.ctx.send(packet) {
            self.ctx.signals.disarm(slot);
            return Err(e.into());
        }

        Ok(self.ctx.signals.wait_for(slot)?)
    }

    /// Send a kernel-mode request and decode its response
    ///
    /// A failing kernel status in the response becomes [`ClientError::Kernel`].
    pub fn request(
        &self,
        action: RequestedAction,
        payload: Vec<u8>,
    ) -> Result<DebuggeeMessage, ClientError> {
        self.request_with_capacity(action, payload, MAX_SERIAL_PACKET_SIZE)
    }

    pub fn request_with_capacity(
        &self,
        action: RequestedAction,
        payload: Vec<u8>,
        capacity: usize,
    ) -> Result<DebuggeeMessage, ClientError> {
        let response = response_for(action).ok_or(ClientError::NoResponse(action))?;
        let slot = response_slot(response).ok_or(ClientError::NoResponse(action))?;

        let bytes = self
            .round_trip(&Self::kernel_packet(action, payload), slot, capacity)?
            .unwrap_or_default();

        let message =
            DebuggeeMessage::decode(response, &bytes)?.ok_or(ClientError::NoResponse(action))?;

        match status_of(&message) {
            Some(status) if !status.is_success() => Err(ClientError::Kernel(status)),
            _ => Ok(message),
        }
    }

    /// Send without waiting for anything
    fn send_kernel(&self, action: RequestedAction, payload: Vec<u8>) -> Result<(), ClientError> {
        self.ctx.send(&Self::kernel_packet(action, payload))?;
        Ok(())
    }

    /// Resume the debuggee (`g`)
    pub fn continue_debuggee(&self) -> Result<(), ClientError> {
        self.ctx.state.set_running(true);
        self.ctx.state.set_ignore_new_logging_messages(false);
        self.send_kernel(RequestedAction::ModeContinue, Vec::new())
    }

    /// Resume and block until the debuggee halts again
    pub fn continue_until_paused(&self) -> Result<Option<PausedPacket>, ClientError> {
        self.ctx.state.set_running(true);
        self.ctx.state.set_ignore_new_logging_messages(false);
        let packet = Self::kernel_packet(RequestedAction::ModeContinue, Vec::new());
        self.round_trip(&packet, SyncObject::IsDebuggerRunning, 0)?;
        Ok(self.ctx.state.last_pause())
    }

    /// Ask the user-mode listener on the debuggee to break in
    pub fn pause(&self) -> Result<(), ClientError> {
        let packet = RemotePacket::new(
            PacketType::DebuggerToDebuggeeExecuteOnUserMode,
            RequestedAction::UserModePause,
            Vec::new(),
        );
        self.ctx.send(&packet)?;
        Ok(())
    }

    /// Execute one step and return the pause it produced
    pub fn step(&self, step_type: StepType) -> Result<Option<PausedPacket>, ClientError> {
        self.ctx.state.set_running(true);
        let mut writer = ByteWriter::new();
        writer.u32(step_type.code());
        let packet = Self::kernel_packet(RequestedAction::ModeStep, writer.finish());

        self.round_trip(&packet, SyncObject::IsDebuggerRunning, 0)?;
        Ok(self.ctx.state.last_pause())
    }

    /// Switch the operating core (`~ n`)
    pub fn change_core(&self, core: u32) -> Result<(), ClientError> {
        let mut writer = ByteWriter::new();
        writer.u32(core).u32(KernelStatus::SUCCESS.0);
        let packet = Self::kernel_packet(RequestedAction::ModeChangeCore, writer.finish());

        // success arrives as a CoreSwitched pause, failure as a result packet
        let response =
            self.round_trip(&packet, SyncObject::CoreSwitchingResult, MAX_SERIAL_PACKET_SIZE)?;
        match response {
            Some(bytes) if !bytes.is_empty() => {
                let result = ChangeCoreResult::from_bytes(&bytes)?;
                if result.result.is_success() {
                    Ok(())
                } else {
                    Err(ClientError::Kernel(result.result))
                }
            }
            _ => Ok(()),
        }
    }

    pub fn change_process(
        &self,
        action: DetailsAction,
        process_id: u32,
        process: u64,
    ) -> Result<ProcessDetailsResult, ClientError> {
        let request = ProcessDetailsResult {
            action_type: action.code(),
            process_id,
            process,
            process_name: String::new(),
            result: KernelStatus::SUCCESS,
        };
        let message = self.request(RequestedAction::ModeChangeProcess, request.to_bytes())?;
        expect_response!(message, ChangeProcess)
    }

    pub fn change_thread(
        &self,
        action: DetailsAction,
        thread_id: u32,
        thread: u64,
    ) -> Result<ThreadDetailsResult, ClientError> {
        let request = ThreadDetailsResult {
            action_type: action.code(),
            thread_id,
            process_id: 0,
            thread,
            process: 0,
            process_name: String::new(),
            result: KernelStatus::SUCCESS,
        };
        let message = self.request(RequestedAction::ModeChangeThread, request.to_bytes())?;
        expect_response!(message, ChangeThread)
    }

    pub fn flush(&self) -> Result<FlushResult, ClientError> {
        let message = self.request(RequestedAction::ModeFlushBuffers, Vec::new())?;
        expect_response!(message, Flush)
    }

    pub fn callstack(
        &self,
        base_address: u64,
        size: u32,
        is_32bit: bool,
    ) -> Result<CallstackResult, ClientError> {
        let mut writer = ByteWriter::new();
        writer.u64(base_address).u32(size).bool(is_32bit);
        let message = self.request(RequestedAction::ModeCallstack, writer.finish())?;
        expect_response!(message, Callstack)
    }

    pub fn test_query(&self, request: TestQueryRequest) -> Result<TestQueryResult, ClientError> {
        let payload = TestQueryResult {
            request_type: request.code(),
            kernel_status: KernelStatus::SUCCESS,
        }
        .to_bytes();
        let message = self.request(RequestedAction::ModeTestQuery, payload)?;
        expect_response!(message, TestQuery)
    }

    pub fn run_script(&self, script: &str) -> Result<ScriptResult, ClientError> {
        let request = RunScriptRequest {
            script: script.to_string(),
            is_format: false,
        };
        let message = self.request(RequestedAction::ModeRunScript, request.to_bytes())?;
        expect_response!(message, RunScript)
    }

    /// Evaluate an expression on the debuggee (`.formats`)
    pub fn evaluate_formats(&self, expression: &str) -> Result<u64, ClientError> {
        let request = RunScriptRequest {
            script: expression.to_string(),
            is_format: true,
        };
        let packet = Self::kernel_packet(RequestedAction::ModeRunScript, request.to_bytes());
        self.round_trip(&packet, SyncObject::ScriptFormatsResult, 0)?;

        let evaluated = self.ctx.state.evaluated_expression();
        if evaluated.status.is_success() {
            Ok(evaluated.value)
        } else {
            Err(ClientError::Kernel(evaluated.status))
        }
    }

    /// Register an event; the tag is allocated locally and prefixed to `body`
    pub fn register_event(&self, description: &str, body: &[u8]) -> Result<u64, ClientError> {
        let tag = self.ctx.events().register(description);

        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(body);

        let result = self
            .request(RequestedAction::ModeRegisterEvent, payload)
            .and_then(|message| expect_response!(message, RegisterEvent))
            .and_then(event_result);

        if let Err(e) = result {
            self.ctx.events().forget(tag);
            return Err(e);
        }
        Ok(tag)
    }

    pub fn add_action(&self, tag: u64, body: &[u8]) -> Result<(), ClientError> {
        let mut payload = tag.to_le_bytes().to_vec();
        payload.extend_from_slice(body);

        let message = self.request(RequestedAction::ModeAddActionToEvent, payload)?;
        event_result(expect_response!(message, AddActionToEvent)?)
    }

    pub fn modify_event(
        &self,
        tag: u64,
        action: ModifyEventAction,
    ) -> Result<ModifyEventsResult, ClientError> {
        let request = ModifyEventRequest { tag, action };
        let message = self.request(RequestedAction::ModeQueryAndModifyEvent, request.to_bytes())?;
        expect_response!(message, QueryAndModifyEvent)
    }

    /// Whether the event is enabled on the debuggee
    pub fn query_event_state(&self, tag: u64) -> Result<bool, ClientError> {
        self.modify_event(tag, ModifyEventAction::QueryState)?;
        Ok(self.ctx.state.shared_event_status())
    }

    /// Rebuild the debuggee's module list (`.sym reload`)
    pub fn reload_symbols(&self, process_id: u32) -> Result<(), ClientError> {
        let mut writer = ByteWriter::new();
        writer.u32(process_id);
        let message = self.request(RequestedAction::ModeSymbolReload, writer.finish())?;
        expect_response!(message, SymbolReloadFinished).map(|_| ())
    }

    /// Largest memory read whose response fits in one packet
    pub fn max_read_size(&self) -> usize {
        self.ctx
            .config
            .max_packet_size
            .min(MAX_SERIAL_PACKET_SIZE)
            .saturating_sub(MIN_PACKET_SIZE)
    }

    pub fn read_memory(&self, request: &ReadMemoryRequest) -> Result<Vec<u8>, ClientError> {
        // the answer could never arrive, so nothing is armed
        let max = self.max_read_size();
        if request.size as usize > max {
            return Err(ClientError::RequestTooLarge {
                size: request.size as usize,
                max,
            });
        }

        let message = self.request_with_capacity(
            RequestedAction::ModeReadMemory,
            request.to_bytes(),
            request.size as usize,
        )?;
        expect_response!(message, ReadMemory)
    }

    /// Raw register file of the current core
    pub fn read_registers(&self) -> Result<Vec<u8>, ClientError> {
        let message = self.request(RequestedAction::ModeReadRegisters, Vec::new())?;
        expect_response!(message, ReadRegisters)
    }

    pub fn set_breakpoint(&self, body: &[u8]) -> Result<StatusResult, ClientError> {
        let message = self.request(RequestedAction::ModeBp, body.to_vec())?;
        expect_response!(message, Bp)
    }

    pub fn list_or_modify_breakpoints(&self, body: &[u8]) -> Result<StatusResult, ClientError> {
        let message = self.request(RequestedAction::ModeListOrModifyBreakpoints, body.to_vec())?;
        expect_response!(message, ListOrModifyBreakpoints)
    }

    pub fn search(&self, body: &[u8]) -> Result<SearchResult, ClientError> {
        let message = self.request(RequestedAction::ModeSearchQuery, body.to_vec())?;
        expect_response!(message, SearchQuery)
    }

    pub fn pte(&self, virtual_address: u64) -> Result<PteResult, ClientError> {
        let mut writer = ByteWriter::new();
        writer.u64(virtual_address);
        let message = self.request(RequestedAction::ModeQueryPte, writer.finish())?;
        expect_response!(message, Pte)
    }

    /// Translate in either direction (`!va2pa`, `!pa2va`)
    pub fn translate(
        &self,
        address: u64,
        process_id: u32,
        is_virtual_to_physical: bool,
    ) -> Result<TranslationResult, ClientError> {
        let (virtual_address, physical_address) = if is_virtual_to_physical {
            (address, 0)
        } else {
            (0, address)
        };
        let request = TranslationResult {
            virtual_address,
            physical_address,
            process_id,
            is_virtual_to_physical,
            kernel_status: KernelStatus::SUCCESS,
        };
        let message = self.request(RequestedAction::ModeQueryPa2vaAndVa2pa, request.to_bytes())?;
        expect_response!(message, Va2paAndPa2va)
    }

    pub fn set_short_circuiting(&self, enabled: bool) -> Result<(), ClientError> {
        let mut writer = ByteWriter::new();
        writer.u32(0).bool(enabled);
        let message = self.request(RequestedAction::ModeSetShortCircuitingState, writer.finish())?;
        expect_response!(message, ShortCircuiting).map(|_| ())
    }

    /// Bring a range of pages in by injecting a page fault (`.pagein`)
    pub fn page_in(&self, from: u64, to: u64, error_code: u32) -> Result<(), ClientError> {
        let mut writer = ByteWriter::new();
        writer.u64(from).u64(to).u32(error_code);
        let message = self.request(RequestedAction::ModeInjectPageFault, writer.finish())?;
        expect_response!(message, PageIn).map(|_| ())
    }

    pub fn pcitree(&self) -> Result<PcitreeResult, ClientError> {
        let message = self.request(RequestedAction::ModeQueryPcitree, Vec::new())?;
        expect_response!(message, Pcitree)
    }

    pub fn pcidevinfo(
        &self,
        device: PciDeviceEntry,
        print_raw: bool,
    ) -> Result<PcidevinfoResult, ClientError> {
        let request = PcidevinfoResult {
            kernel_status: KernelStatus::SUCCESS,
            device,
            print_raw,
            config_space: Vec::new(),
        };
        let message = self.request(RequestedAction::ModeQueryPcidevinfo, request.to_bytes())?;
        expect_response!(message, Pcidevinfo)
    }

    /// Tell the debuggee to unload and wait for the dispatcher to exit
    pub fn close_and_unload(mut self) -> Result<(), ClientError> {
        self.send_kernel(RequestedAction::ModeCloseAndUnloadDebuggee, Vec::new())?;
        self.join();
        Ok(())
    }

    /// Wait for the dispatcher thread to finish
    pub fn join(&mut self) {
        if let Some(handle) = self.listener.take() {
            match handle.join() {
                Ok(Ok(())) => log::debug!("Listener exited"),
                Ok(Err(e)) => log::warn!("Listener exited with error: {}", e),
                Err(_) => log::error!("Listener thread panicked"),
            }
        }
    }
}

fn event_result(result: EventAndActionResult) -> Result<(), ClientError> {
    if result.is_successful {
        Ok(())
    } else {
        Err(ClientError::Kernel(KernelStatus(result.error)))
    }
}
