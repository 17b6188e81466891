//! Payload schemas
//!
//! Every debuggee-to-debugger action carries one of the structures below.
//! They are decoded once at the framing boundary into [`DebuggeeMessage`],
//! so handlers never touch raw bytes except for the caller-buffer results.

use super::codec::{ByteReader, ByteWriter, DecodeError};
use super::packet::{wire_enum, PacketType, RemotePacket, RequestedAction};
use super::status::KernelStatus;

/// Size of the instruction window sent with a pause
pub const MAXIMUM_INSTR_SIZE: usize = 16;

/// Cap on the PCI devices listed by a PCI tree result
pub const DEV_MAX_NUM: usize = 255;

/// Size of a PCI configuration space (CAM)
pub const CAM_CONFIG_SPACE_LENGTH: usize = 256;

/// Cap on callstack frames in one result
pub const MAX_CALLSTACK_FRAMES: usize = 0x1000;

/// Encoding and decoding of a payload schema
pub trait WirePayload: Sized {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError>;

    fn encode(&self, writer: &mut ByteWriter);

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(&mut ByteReader::new(bytes))
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

fn status(reader: &mut ByteReader<'_>) -> Result<KernelStatus, DecodeError> {
    Ok(KernelStatus(reader.u32()?))
}

wire_enum! {
    /// Why the debuggee halted
    pub enum PausingReason: u32 {
        Pause = 1,
        SoftwareBreakpointHit = 2,
        HardwareDebugRegisterHit = 3,
        Stepped = 4,
        TrackingStepped = 5,
        EventTriggered = 6,
        ProcessSwitched = 7,
        ThreadSwitched = 8,
        StartingModuleLoaded = 9,
        CoreSwitched = 10,
        CommandExecutionFinished = 11,
        RequestFromDebugger = 12,
    }
}

wire_enum! {
    /// Stage of an event callback relative to the emulated instruction
    pub enum CallingStage: u32 {
        PreEventEmulation = 1,
        PostEventEmulation = 2,
        All = 3,
    }
}

wire_enum! {
    /// Sub-action of the process and thread switching packets
    pub enum DetailsAction: u32 {
        GetDetails = 1,
        PerformSwitch = 2,
        GetList = 3,
    }
}

wire_enum! {
    /// Test query selecting which interceptions to toggle
    pub enum TestQueryRequest: u32 {
        TurnOffBps = 1,
        TurnOnBps = 2,
        TurnOffDbs = 3,
        TurnOnDbs = 4,
    }
}

wire_enum! {
    /// Query or modification applied to a registered event
    pub enum ModifyEventAction: u32 {
        QueryState = 1,
        Enable = 2,
        Disable = 3,
        Clear = 4,
    }
}

wire_enum! {
    /// Kind of stepping requested from the debuggee
    pub enum StepType: u32 {
        StepIn = 1,
        StepOver = 2,
        InstrumentationStepIn = 3,
        InstrumentationStepInForTracking = 4,
    }
}

/// Handshake: the debuggee announces its protocol version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    pub version: u32,
}

impl WirePayload for PingPacket {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: reader.u32()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.version);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggeeStarted {
    pub kernel_base_address: u64,
    pub os_name: String,
}

impl WirePayload for DebuggeeStarted {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kernel_base_address: reader.u64()?,
            os_name: reader.string()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u64(self.kernel_base_address).string(&self.os_name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub operation_code: u32,
    pub message: String,
}

impl WirePayload for LogMessage {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            operation_code: reader.u32()?,
            message: reader.string()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.operation_code).string(&self.message);
    }
}

/// Debuggee halted; carries the instruction window at RIP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedPacket {
    pub rip: u64,
    pub is_processor_on_32bit_mode: bool,
    pub ignore_disassembling: bool,
    /// Raw reason code, see [`PausedPacket::reason`]
    pub pausing_reason: u32,
    pub current_core: u32,
    pub event_tag: u64,
    pub event_calling_stage: u32,
    pub rflags: u64,
    pub instruction_bytes: [u8; MAXIMUM_INSTR_SIZE],
    pub read_instruction_len: u16,
}

impl PausedPacket {
    pub fn reason(&self) -> Option<PausingReason> {
        PausingReason::from_code(self.pausing_reason)
    }

    pub fn calling_stage(&self) -> Option<CallingStage> {
        CallingStage::from_code(self.event_calling_stage)
    }
}

impl WirePayload for PausedPacket {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            rip: reader.u64()?,
            is_processor_on_32bit_mode: reader.bool()?,
            ignore_disassembling: reader.bool()?,
            pausing_reason: reader.u32()?,
            current_core: reader.u32()?,
            event_tag: reader.u64()?,
            event_calling_stage: reader.u32()?,
            rflags: reader.u64()?,
            instruction_bytes: reader.array()?,
            read_instruction_len: reader.u16()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u64(self.rip)
            .bool(self.is_processor_on_32bit_mode)
            .bool(self.ignore_disassembling)
            .u32(self.pausing_reason)
            .u32(self.current_core)
            .u64(self.event_tag)
            .u32(self.event_calling_stage)
            .u64(self.rflags)
            .bytes(&self.instruction_bytes)
            .u16(self.read_instruction_len);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCoreResult {
    pub new_core: u32,
    pub result: KernelStatus,
}

impl WirePayload for ChangeCoreResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            new_core: reader.u32()?,
            result: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.new_core).u32(self.result.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDetailsResult {
    pub action_type: u32,
    pub process_id: u32,
    /// Address of the process object
    pub process: u64,
    pub process_name: String,
    pub result: KernelStatus,
}

impl WirePayload for ProcessDetailsResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            action_type: reader.u32()?,
            process_id: reader.u32()?,
            process: reader.u64()?,
            process_name: reader.fixed_str::<16>()?,
            result: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.action_type)
            .u32(self.process_id)
            .u64(self.process)
            .fixed_str::<16>(&self.process_name)
            .u32(self.result.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDetailsResult {
    pub action_type: u32,
    pub thread_id: u32,
    pub process_id: u32,
    pub thread: u64,
    pub process: u64,
    pub process_name: String,
    pub result: KernelStatus,
}

impl WirePayload for ThreadDetailsResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            action_type: reader.u32()?,
            thread_id: reader.u32()?,
            process_id: reader.u32()?,
            thread: reader.u64()?,
            process: reader.u64()?,
            process_name: reader.fixed_str::<16>()?,
            result: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.action_type)
            .u32(self.thread_id)
            .u32(self.process_id)
            .u64(self.thread)
            .u64(self.process)
            .fixed_str::<16>(&self.process_name)
            .u32(self.result.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub count_of_results: u32,
    pub result: KernelStatus,
}

impl WirePayload for SearchResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            count_of_results: reader.u32()?,
            result: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.count_of_results).u32(self.result.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushResult {
    pub kernel_status: KernelStatus,
    pub cleared_vmx_root: u32,
    pub cleared_vmx_non_root: u32,
}

impl WirePayload for FlushResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kernel_status: status(reader)?,
            cleared_vmx_root: reader.u32()?,
            cleared_vmx_non_root: reader.u32()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.kernel_status.0)
            .u32(self.cleared_vmx_root)
            .u32(self.cleared_vmx_non_root);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackFrame {
    pub is_stack_address_valid: bool,
    pub is_executable: bool,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackResult {
    pub kernel_status: KernelStatus,
    pub display_method: u32,
    pub is_32bit: bool,
    pub frames: Vec<CallstackFrame>,
}

impl WirePayload for CallstackResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let kernel_status = status(reader)?;
        let display_method = reader.u32()?;
        let is_32bit = reader.bool()?;
        let count = reader.u32()? as usize;
        if count > MAX_CALLSTACK_FRAMES {
            return Err(DecodeError::TooManyEntries {
                count,
                limit: MAX_CALLSTACK_FRAMES,
            });
        }

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(CallstackFrame {
                is_stack_address_valid: reader.bool()?,
                is_executable: reader.bool()?,
                value: reader.u64()?,
            });
        }

        Ok(Self {
            kernel_status,
            display_method,
            is_32bit,
            frames,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.kernel_status.0)
            .u32(self.display_method)
            .bool(self.is_32bit)
            .u32(self.frames.len() as u32);
        for frame in &self.frames {
            writer
                .bool(frame.is_stack_address_valid)
                .bool(frame.is_executable)
                .u64(frame.value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestQueryResult {
    pub request_type: u32,
    pub kernel_status: KernelStatus,
}

impl WirePayload for TestQueryResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            request_type: reader.u32()?,
            kernel_status: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.request_type).u32(self.kernel_status.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResult {
    pub result: KernelStatus,
    /// The script was a `.formats` evaluation
    pub is_format: bool,
}

impl WirePayload for ScriptResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            result: status(reader)?,
            is_format: reader.bool()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.result.0).bool(self.is_format);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatsResult {
    pub value: u64,
    pub result: KernelStatus,
}

impl WirePayload for FormatsResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: reader.u64()?,
            result: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u64(self.value).u32(self.result.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventAndActionResult {
    pub is_successful: bool,
    pub error: u32,
}

impl WirePayload for EventAndActionResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            is_successful: reader.bool()?,
            error: reader.u32()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.bool(self.is_successful).u32(self.error);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyEventsResult {
    pub tag: u64,
    pub kernel_status: KernelStatus,
    pub type_of_action: u32,
    pub is_enabled: bool,
}

impl ModifyEventsResult {
    pub fn action(&self) -> Option<ModifyEventAction> {
        ModifyEventAction::from_code(self.type_of_action)
    }
}

impl WirePayload for ModifyEventsResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            tag: reader.u64()?,
            kernel_status: status(reader)?,
            type_of_action: reader.u32()?,
            is_enabled: reader.bool()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u64(self.tag)
            .u32(self.kernel_status.0)
            .u32(self.type_of_action)
            .bool(self.is_enabled);
    }
}

/// Single status word results (symbol reload, breakpoints, page-in)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResult {
    pub kernel_status: KernelStatus,
}

impl WirePayload for StatusResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kernel_status: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.kernel_status.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCircuitingResult {
    pub kernel_status: KernelStatus,
    pub is_short_circuiting: bool,
}

impl WirePayload for ShortCircuitingResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kernel_status: status(reader)?,
            is_short_circuiting: reader.bool()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.kernel_status.0)
            .bool(self.is_short_circuiting);
    }
}

/// One level of the paging walk: where the entry lives and what it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableLevel {
    pub virtual_address: u64,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PteResult {
    pub virtual_address: u64,
    pub pml4e: PageTableLevel,
    pub pdpte: PageTableLevel,
    pub pde: PageTableLevel,
    pub pte: PageTableLevel,
    pub kernel_status: KernelStatus,
}

impl WirePayload for PteResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let virtual_address = reader.u64()?;
        let mut levels = [PageTableLevel::default(); 4];
        for level in levels.iter_mut() {
            level.virtual_address = reader.u64()?;
            level.value = reader.u64()?;
        }
        Ok(Self {
            virtual_address,
            pml4e: levels[0],
            pdpte: levels[1],
            pde: levels[2],
            pte: levels[3],
            kernel_status: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u64(self.virtual_address);
        for level in [self.pml4e, self.pdpte, self.pde, self.pte] {
            writer.u64(level.virtual_address).u64(level.value);
        }
        writer.u32(self.kernel_status.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub virtual_address: u64,
    pub physical_address: u64,
    pub process_id: u32,
    pub is_virtual_to_physical: bool,
    pub kernel_status: KernelStatus,
}

impl WirePayload for TranslationResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            virtual_address: reader.u64()?,
            physical_address: reader.u64()?,
            process_id: reader.u32()?,
            is_virtual_to_physical: reader.bool()?,
            kernel_status: status(reader)?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u64(self.virtual_address)
            .u64(self.physical_address)
            .u32(self.process_id)
            .bool(self.is_virtual_to_physical)
            .u32(self.kernel_status.0);
    }
}

/// Module entry pushed by the debuggee while building the symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSymbolDetail {
    pub base_address: u64,
    pub module_name: String,
    pub pdb_file_path: String,
    pub is_32bit: bool,
    pub is_local_symbol_path: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableUpdate {
    pub detail: ModuleSymbolDetail,
    pub current_item_index: u32,
    pub total_items: u32,
}

impl WirePayload for SymbolTableUpdate {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            detail: ModuleSymbolDetail {
                base_address: reader.u64()?,
                module_name: reader.string()?,
                pdb_file_path: reader.string()?,
                is_32bit: reader.bool()?,
                is_local_symbol_path: reader.bool()?,
            },
            current_item_index: reader.u32()?,
            total_items: reader.u32()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u64(self.detail.base_address)
            .string(&self.detail.module_name)
            .string(&self.detail.pdb_file_path)
            .bool(self.detail.is_32bit)
            .bool(self.detail.is_local_symbol_path)
            .u32(self.current_item_index)
            .u32(self.total_items);
    }
}

/// Bus/device/function plus identifiers of a PCI device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceEntry {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciDeviceEntry {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            bus: reader.u8()?,
            device: reader.u8()?,
            function: reader.u8()?,
            vendor_id: reader.u16()?,
            device_id: reader.u16()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u8(self.bus)
            .u8(self.device)
            .u8(self.function)
            .u16(self.vendor_id)
            .u16(self.device_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcitreeResult {
    pub kernel_status: KernelStatus,
    pub devices: Vec<PciDeviceEntry>,
}

impl WirePayload for PcitreeResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let kernel_status = status(reader)?;
        let count = (reader.u32()? as usize).min(DEV_MAX_NUM);
        let mut devices = Vec::with_capacity(count);
        for _ in 0..count {
            devices.push(PciDeviceEntry::decode(reader)?);
        }
        Ok(Self {
            kernel_status,
            devices,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.kernel_status.0)
            .u32(self.devices.len() as u32);
        for device in &self.devices {
            device.encode(writer);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcidevinfoResult {
    pub kernel_status: KernelStatus,
    pub device: PciDeviceEntry,
    pub print_raw: bool,
    /// Up to [`CAM_CONFIG_SPACE_LENGTH`] bytes of configuration space
    pub config_space: Vec<u8>,
}

impl WirePayload for PcidevinfoResult {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let kernel_status = status(reader)?;
        let device = PciDeviceEntry::decode(reader)?;
        let print_raw = reader.bool()?;
        let rest = reader.rest();
        let config_space = rest[..rest.len().min(CAM_CONFIG_SPACE_LENGTH)].to_vec();
        Ok(Self {
            kernel_status,
            device,
            print_raw,
            config_space,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u32(self.kernel_status.0);
        self.device.encode(writer);
        writer.bool(self.print_raw).bytes(&self.config_space);
    }
}

/// A debuggee-to-debugger packet decoded into its schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggeeMessage {
    Ping(PingPacket),
    Started(DebuggeeStarted),
    Log(LogMessage),
    Paused(PausedPacket),
    ChangeCore(ChangeCoreResult),
    ChangeProcess(ProcessDetailsResult),
    SearchQuery(SearchResult),
    ChangeThread(ThreadDetailsResult),
    Flush(FlushResult),
    Callstack(CallstackResult),
    TestQuery(TestQueryResult),
    RunScript(ScriptResult),
    Formats(FormatsResult),
    RegisterEvent(EventAndActionResult),
    AddActionToEvent(EventAndActionResult),
    QueryAndModifyEvent(ModifyEventsResult),
    SymbolReloadFinished(StatusResult),
    ReadRegisters(Vec<u8>),
    WriteRegister(Vec<u8>),
    ApicRequest(Vec<u8>),
    IdtEntries(Vec<u8>),
    ReadMemory(Vec<u8>),
    EditMemory(Vec<u8>),
    Bp(StatusResult),
    ShortCircuiting(ShortCircuitingResult),
    Pte(PteResult),
    PageIn(StatusResult),
    Va2paAndPa2va(TranslationResult),
    ListOrModifyBreakpoints(StatusResult),
    UpdateSymbolInfo(SymbolTableUpdate),
    Pcitree(PcitreeResult),
    Pcidevinfo(PcidevinfoResult),
}

impl DebuggeeMessage {
    /// Decode the payload of `action`
    ///
    /// Returns `Ok(None)` for actions that never travel from the debuggee.
    pub fn decode(action: RequestedAction, payload: &[u8]) -> Result<Option<Self>, DecodeError> {
        use RequestedAction as A;

        let raw = || payload.to_vec();
        let message = match action {
            A::PingAndSendSupportedVersion => Self::Ping(PingPacket::from_bytes(payload)?),
            A::DebuggeeStarted => Self::Started(DebuggeeStarted::from_bytes(payload)?),
            A::DebuggeeLoggingMechanism => Self::Log(LogMessage::from_bytes(payload)?),
            A::DebuggeePausedAndCurrentInstruction => {
                Self::Paused(PausedPacket::from_bytes(payload)?)
            }
            A::DebuggeeResultOfChangingCore => {
                Self::ChangeCore(ChangeCoreResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfChangingProcess => {
                Self::ChangeProcess(ProcessDetailsResult::from_bytes(payload)?)
            }
            A::DebuggeeReloadSearchQuery => Self::SearchQuery(SearchResult::from_bytes(payload)?),
            A::DebuggeeResultOfChangingThread => {
                Self::ChangeThread(ThreadDetailsResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfFlush => Self::Flush(FlushResult::from_bytes(payload)?),
            A::DebuggeeResultOfCallstack => Self::Callstack(CallstackResult::from_bytes(payload)?),
            A::DebuggeeResultTestQuery => Self::TestQuery(TestQueryResult::from_bytes(payload)?),
            A::DebuggeeResultOfRunningScript => Self::RunScript(ScriptResult::from_bytes(payload)?),
            A::DebuggeeResultOfFormats => Self::Formats(FormatsResult::from_bytes(payload)?),
            A::DebuggeeResultOfRegisteringEvent => {
                Self::RegisterEvent(EventAndActionResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfAddingActionToEvent => {
                Self::AddActionToEvent(EventAndActionResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfQueryAndModifyEvent => {
                Self::QueryAndModifyEvent(ModifyEventsResult::from_bytes(payload)?)
            }
            A::DebuggeeReloadSymbolFinished => {
                Self::SymbolReloadFinished(StatusResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfReadingRegisters => Self::ReadRegisters(raw()),
            A::DebuggeeResultOfWriteRegister => Self::WriteRegister(raw()),
            A::DebuggeeResultOfApicRequests => Self::ApicRequest(raw()),
            A::DebuggeeResultOfQueryIdtEntries => Self::IdtEntries(raw()),
            A::DebuggeeResultOfReadingMemory => Self::ReadMemory(raw()),
            A::DebuggeeResultOfEditingMemory => Self::EditMemory(raw()),
            A::DebuggeeResultOfBp => Self::Bp(StatusResult::from_bytes(payload)?),
            A::DebuggeeResultOfShortCircuitingState => {
                Self::ShortCircuiting(ShortCircuitingResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfPte => Self::Pte(PteResult::from_bytes(payload)?),
            A::DebuggeeResultOfBringingPagesIn => Self::PageIn(StatusResult::from_bytes(payload)?),
            A::DebuggeeResultOfVa2paAndPa2va => {
                Self::Va2paAndPa2va(TranslationResult::from_bytes(payload)?)
            }
            A::DebuggeeResultOfListOrModifyBreakpoints => {
                Self::ListOrModifyBreakpoints(StatusResult::from_bytes(payload)?)
            }
            A::DebuggeeUpdateSymbolInfo => {
                Self::UpdateSymbolInfo(SymbolTableUpdate::from_bytes(payload)?)
            }
            A::DebuggeeResultOfPcitree => Self::Pcitree(PcitreeResult::from_bytes(payload)?),
            A::DebuggeeResultOfPcidevinfo => {
                Self::Pcidevinfo(PcidevinfoResult::from_bytes(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// The action code this message travels under
    pub fn action(&self) -> RequestedAction {
        use RequestedAction as A;

        match self {
            Self::Ping(_) => A::PingAndSendSupportedVersion,
            Self::Started(_) => A::DebuggeeStarted,
            Self::Log(_) => A::DebuggeeLoggingMechanism,
            Self::Paused(_) => A::DebuggeePausedAndCurrentInstruction,
            Self::ChangeCore(_) => A::DebuggeeResultOfChangingCore,
            Self::ChangeProcess(_) => A::DebuggeeResultOfChangingProcess,
            Self::SearchQuery(_) => A::DebuggeeReloadSearchQuery,
            Self::ChangeThread(_) => A::DebuggeeResultOfChangingThread,
            Self::Flush(_) => A::DebuggeeResultOfFlush,
            Self::Callstack(_) => A::DebuggeeResultOfCallstack,
            Self::TestQuery(_) => A::DebuggeeResultTestQuery,
            Self::RunScript(_) => A::DebuggeeResultOfRunningScript,
            Self::Formats(_) => A::DebuggeeResultOfFormats,
            Self::RegisterEvent(_) => A::DebuggeeResultOfRegisteringEvent,
            Self::AddActionToEvent(_) => A::DebuggeeResultOfAddingActionToEvent,
            Self::QueryAndModifyEvent(_) => A::DebuggeeResultOfQueryAndModifyEvent,
            Self::SymbolReloadFinished(_) => A::DebuggeeReloadSymbolFinished,
            Self::ReadRegisters(_) => A::DebuggeeResultOfReadingRegisters,
            Self::WriteRegister(_) => A::DebuggeeResultOfWriteRegister,
            Self::ApicRequest(_) => A::DebuggeeResultOfApicRequests,
            Self::IdtEntries(_) => A::DebuggeeResultOfQueryIdtEntries,
            Self::ReadMemory(_) => A::DebuggeeResultOfReadingMemory,
            Self::EditMemory(_) => A::DebuggeeResultOfEditingMemory,
            Self::Bp(_) => A::DebuggeeResultOfBp,
            Self::ShortCircuiting(_) => A::DebuggeeResultOfShortCircuitingState,
            Self::Pte(_) => A::DebuggeeResultOfPte,
            Self::PageIn(_) => A::DebuggeeResultOfBringingPagesIn,
            Self::Va2paAndPa2va(_) => A::DebuggeeResultOfVa2paAndPa2va,
            Self::ListOrModifyBreakpoints(_) => A::DebuggeeResultOfListOrModifyBreakpoints,
            Self::UpdateSymbolInfo(_) => A::DebuggeeUpdateSymbolInfo,
            Self::Pcitree(_) => A::DebuggeeResultOfPcitree,
            Self::Pcidevinfo(_) => A::DebuggeeResultOfPcidevinfo,
        }
    }

    /// Payload bytes of this message
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Ping(p) => p.to_bytes(),
            Self::Started(p) => p.to_bytes(),
            Self::Log(p) => p.to_bytes(),
            Self::Paused(p) => p.to_bytes(),
            Self::ChangeCore(p) => p.to_bytes(),
            Self::ChangeProcess(p) => p.to_bytes(),
            Self::SearchQuery(p) => p.to_bytes(),
            Self::ChangeThread(p) => p.to_bytes(),
            Self::Flush(p) => p.to_bytes(),
            Self::Callstack(p) => p.to_bytes(),
            Self::TestQuery(p) => p.to_bytes(),
            Self::RunScript(p) => p.to_bytes(),
            Self::Formats(p) => p.to_bytes(),
            Self::RegisterEvent(p) | Self::AddActionToEvent(p) => p.to_bytes(),
            Self::QueryAndModifyEvent(p) => p.to_bytes(),
            Self::SymbolReloadFinished(p)
            | Self::Bp(p)
            | Self::PageIn(p)
            | Self::ListOrModifyBreakpoints(p) => p.to_bytes(),
            Self::ReadRegisters(raw)
            | Self::WriteRegister(raw)
            | Self::ApicRequest(raw)
            | Self::IdtEntries(raw)
            | Self::ReadMemory(raw)
            | Self::EditMemory(raw) => raw.clone(),
            Self::ShortCircuiting(p) => p.to_bytes(),
            Self::Pte(p) => p.to_bytes(),
            Self::Va2paAndPa2va(p) => p.to_bytes(),
            Self::UpdateSymbolInfo(p) => p.to_bytes(),
            Self::Pcitree(p) => p.to_bytes(),
            Self::Pcidevinfo(p) => p.to_bytes(),
        }
    }

    /// Wrap into a debuggee-to-debugger packet
    pub fn to_packet(&self) -> RemotePacket {
        RemotePacket::new(PacketType::DebuggeeToDebugger, self.action(), self.payload())
    }
}

// Request payloads sent by the debugger

/// Memory read request for the kernel-mode agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMemoryRequest {
    pub address: u64,
    pub size: u32,
    pub process_id: u32,
    pub is_physical: bool,
}

impl WirePayload for ReadMemoryRequest {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: reader.u64()?,
            size: reader.u32()?,
            process_id: reader.u32()?,
            is_physical: reader.bool()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u64(self.address)
            .u32(self.size)
            .u32(self.process_id)
            .bool(self.is_physical);
    }
}

/// Query or modify an event by tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyEventRequest {
    pub tag: u64,
    pub action: ModifyEventAction,
}

impl WirePayload for ModifyEventRequest {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let tag = reader.u64()?;
        let code = reader.u32()?;
        let action = ModifyEventAction::from_code(code).ok_or(DecodeError::InvalidValue {
            field: "type_of_action",
            value: code as u64,
        })?;
        Ok(Self { tag, action })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.u64(self.tag).u32(self.action.code());
    }
}

/// Script text to evaluate on the debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScriptRequest {
    pub script: String,
    pub is_format: bool,
}

impl WirePayload for RunScriptRequest {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            script: reader.string()?,
            is_format: reader.bool()?,
        })
    }

    fn encode(&self, writer: &mut ByteWriter) {
        writer.string(&self.script).bool(self.is_format);
    }
}
