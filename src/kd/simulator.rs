//! Simulated debuggee
//!
//! Stands in for the kernel-mode agent when no hypervisor is present: it
//! answers every kernel-mode request with a well-formed result so the
//! debugger side can be driven end to end (loopback sessions, tests).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::disasm::{Bitness, CapstoneDisassembler, Disassembler};
use crate::protocol::payload::{
    CallstackFrame, CallstackResult, ChangeCoreResult, DebuggeeStarted, EventAndActionResult,
    FlushResult, FormatsResult, LogMessage, ModifyEventRequest, ModifyEventsResult,
    PageTableLevel, PciDeviceEntry, PcidevinfoResult, PcitreeResult, PingPacket,
    ProcessDetailsResult, PteResult, ReadMemoryRequest, RunScriptRequest, ScriptResult,
    SearchResult, ShortCircuitingResult, StatusResult, StepType, TestQueryResult,
    ThreadDetailsResult, TranslationResult, CAM_CONFIG_SPACE_LENGTH, MAXIMUM_INSTR_SIZE,
};
use crate::protocol::{
    ByteReader, DebuggeeMessage, KernelStatus, PausedPacket, PausingReason, RemotePacket,
    RequestedAction, WirePayload,
};
use crate::config::KdConfig;
use crate::transparency::{InterceptionCores, TransparencyCoordinator};
use crate::transport::Transport;

use super::debuggee::{KernelAgent, PauseControl};

/// Code the simulated core executes, in a loop
const PROGRAM: [u8; 16] = [
    0x55, // push rbp
    0xE8, 0x05, 0x00, 0x00, 0x00, // call +5
    0x90, // nop
    0xEB, 0xF7, // jmp -9
    0xCC, // int3
    0x90, // nop
    0xC3, // ret
    0x90, 0x90, 0x90, 0x90,
];

pub const SIMULATED_KERNEL_BASE: u64 = 0xFFFF_F800_0000_0000;
const CODE_BASE: u64 = SIMULATED_KERNEL_BASE + 0x1000;
const SYSTEM_PROCESS: u64 = 0xFFFF_A000_0000_1040;
const SYSTEM_THREAD: u64 = 0xFFFF_A000_0000_2080;

pub struct SimulatedDebuggee {
    transport: Arc<dyn Transport>,
    os_name: String,
    core_count: u32,
    current_core: AtomicU32,
    offset: AtomicU64,
    short_circuiting: AtomicBool,
    version: u32,
    transparency: TransparencyCoordinator,
}

impl SimulatedDebuggee {
    pub fn new(transport: Arc<dyn Transport>, version: u32) -> Self {
        let core_count = 4;
        Self {
            transport,
            os_name: "kdlink simulated target".to_string(),
            core_count,
            current_core: AtomicU32::new(0),
            offset: AtomicU64::new(0),
            short_circuiting: AtomicBool::new(false),
            version,
            transparency: TransparencyCoordinator::new(Arc::new(InterceptionCores::new(
                core_count as usize,
            ))),
        }
    }

    /// Protocol version and trap registry size come from `config`
    pub fn from_config(transport: Arc<dyn Transport>, config: &KdConfig) -> Self {
        let mut target = Self::new(transport, config.protocol_version);
        target.transparency = TransparencyCoordinator::with_capacity(
            Arc::new(InterceptionCores::new(target.core_count as usize)),
            config.trap_capacity,
        );
        target
    }

    pub fn with_os_name(mut self, os_name: &str) -> Self {
        self.os_name = os_name.to_string();
        self
    }

    /// Ping and "started", in the order a real debuggee sends them
    pub fn handshake(&self) -> Vec<DebuggeeMessage> {
        vec![
            DebuggeeMessage::Ping(PingPacket {
                version: self.version,
            }),
            DebuggeeMessage::Started(DebuggeeStarted {
                kernel_base_address: SIMULATED_KERNEL_BASE,
                os_name: self.os_name.clone(),
            }),
        ]
    }

    /// Local request to enter transparent-mode
    pub fn hide(&self) -> KernelStatus {
        self.transparency.handle_mode_request(true)
    }

    pub fn unhide(&self) -> KernelStatus {
        self.transparency.handle_mode_request(false)
    }

    pub fn transparency(&self) -> &TransparencyCoordinator {
        &self.transparency
    }

    pub fn is_short_circuiting(&self) -> bool {
        self.short_circuiting.load(Ordering::SeqCst)
    }

    fn rip(&self) -> u64 {
        CODE_BASE + self.offset.load(Ordering::SeqCst)
    }

    /// The pause packet for the current position
    pub fn paused(&self, reason: PausingReason) -> DebuggeeMessage {
        let offset = self.offset.load(Ordering::SeqCst) as usize;
        let mut instruction_bytes = [0u8; MAXIMUM_INSTR_SIZE];
        for (i, byte) in instruction_bytes.iter_mut().enumerate() {
            *byte = PROGRAM[(offset + i) % PROGRAM.len()];
        }

        DebuggeeMessage::Paused(PausedPacket {
            rip: self.rip(),
            is_processor_on_32bit_mode: false,
            ignore_disassembling: false,
            pausing_reason: reason.code(),
            current_core: self.current_core.load(Ordering::SeqCst),
            event_tag: 0,
            event_calling_stage: 0,
            rflags: 0x246,
            instruction_bytes,
            read_instruction_len: MAXIMUM_INSTR_SIZE as u16,
        })
    }

    fn step(&self, payload: &[u8]) -> Vec<DebuggeeMessage> {
        let step_type = ByteReader::new(payload)
            .u32()
            .ok()
            .and_then(StepType::from_code)
            .unwrap_or(StepType::StepIn);

        let offset = self.offset.load(Ordering::SeqCst) as usize;
        let window: Vec<u8> = (0..MAXIMUM_INSTR_SIZE)
            .map(|i| PROGRAM[(offset + i) % PROGRAM.len()])
            .collect();
        let length = CapstoneDisassembler::new()
            .instruction_length(&window, Bitness::Bit64)
            .unwrap_or(1);
        let next = (offset + length) % PROGRAM.len();
        self.offset.store(next as u64, Ordering::SeqCst);

        let reason = match step_type {
            StepType::InstrumentationStepInForTracking => PausingReason::TrackingStepped,
            _ => PausingReason::Stepped,
        };
        vec![self.paused(reason)]
    }

    fn change_core(&self, payload: &[u8]) -> Vec<DebuggeeMessage> {
        let core = ByteReader::new(payload).u32().unwrap_or(u32::MAX);
        if core >= self.core_count {
            return vec![DebuggeeMessage::ChangeCore(ChangeCoreResult {
                new_core: core,
                result: KernelStatus::INVALID_CORE_ID,
            })];
        }

        self.current_core.store(core, Ordering::SeqCst);
        vec![
            DebuggeeMessage::ChangeCore(ChangeCoreResult {
                new_core: core,
                result: KernelStatus::SUCCESS,
            }),
            self.paused(PausingReason::CoreSwitched),
        ]
    }

    fn run_script(&self, payload: &[u8]) -> Vec<DebuggeeMessage> {
        let Ok(request) = RunScriptRequest::from_bytes(payload) else {
            return vec![DebuggeeMessage::RunScript(ScriptResult {
                result: KernelStatus::INVALID_ADDRESS,
                is_format: false,
            })];
        };

        if !request.is_format {
            return vec![DebuggeeMessage::RunScript(ScriptResult {
                result: KernelStatus::SUCCESS,
                is_format: false,
            })];
        }

        // only register names and numbers are understood
        let expression = request.script.trim();
        let (value, result) = match expression {
            "rip" | "@rip" => (self.rip(), KernelStatus::SUCCESS),
            other => match crate::config::parse_number(other) {
                Ok(value) => (value, KernelStatus::SUCCESS),
                Err(_) => (0, KernelStatus::INVALID_REGISTER_NUMBER),
            },
        };
        vec![
            DebuggeeMessage::Formats(FormatsResult { value, result }),
            DebuggeeMessage::RunScript(ScriptResult {
                result,
                is_format: true,
            }),
        ]
    }

    fn registers(&self) -> Vec<u8> {
        // rax..r15, rip, rflags
        let mut raw = Vec::with_capacity(18 * 8);
        for i in 0..16u64 {
            raw.extend_from_slice(&(i * 0x1111).to_le_bytes());
        }
        raw.extend_from_slice(&self.rip().to_le_bytes());
        raw.extend_from_slice(&0x246u64.to_le_bytes());
        raw
    }

    fn pci_device() -> PciDeviceEntry {
        PciDeviceEntry {
            bus: 0,
            device: 0,
            function: 0,
            vendor_id: 0x8086,
            device_id: 0x29C0,
        }
    }
}

impl PauseControl for SimulatedDebuggee {
    fn pause_debuggee(&self) -> bool {
        let packet = self.paused(PausingReason::Pause).to_packet();
        match self.transport.send_framed(&packet.encode()) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Unable to report the pause: {}", e);
                false
            }
        }
    }
}

impl KernelAgent for SimulatedDebuggee {
    fn execute(&self, packet: &RemotePacket) -> Vec<DebuggeeMessage> {
        use RequestedAction as A;

        let Some(action) = packet.action() else {
            log::warn!("Unknown kernel-mode request {:#06x}", packet.action_code);
            return Vec::new();
        };
        log::debug!("Simulated debuggee executing {:?}", action);

        let payload = packet.payload.as_slice();
        let ok = KernelStatus::SUCCESS;

        match action {
            A::PingAndSendSupportedVersion | A::ModeContinue => Vec::new(),
            A::ModeStep => self.step(payload),
            A::ModeCloseAndUnloadDebuggee => vec![DebuggeeMessage::Log(LogMessage {
                operation_code: 0,
                message: "debuggee is unloading".to_string(),
            })],
            A::ModeChangeCore => self.change_core(payload),
            A::ModeChangeProcess => {
                let request = ProcessDetailsResult::from_bytes(payload).ok();
                vec![DebuggeeMessage::ChangeProcess(ProcessDetailsResult {
                    action_type: request.map_or(1, |r| r.action_type),
                    process_id: 4,
                    process: SYSTEM_PROCESS,
                    process_name: "System".to_string(),
                    result: ok,
                })]
            }
            A::ModeChangeThread => {
                let request = ThreadDetailsResult::from_bytes(payload).ok();
                vec![DebuggeeMessage::ChangeThread(ThreadDetailsResult {
                    action_type: request.map_or(1, |r| r.action_type),
                    thread_id: 8,
                    process_id: 4,
                    thread: SYSTEM_THREAD,
                    process: SYSTEM_PROCESS,
                    process_name: "System".to_string(),
                    result: ok,
                })]
            }
            A::ModeFlushBuffers => vec![DebuggeeMessage::Flush(FlushResult {
                kernel_status: ok,
                cleared_vmx_root: 0,
                cleared_vmx_non_root: 0,
            })],
            A::ModeCallstack => vec![DebuggeeMessage::Callstack(CallstackResult {
                kernel_status: ok,
                display_method: 0,
                is_32bit: false,
                frames: vec![
                    CallstackFrame {
                        is_stack_address_valid: true,
                        is_executable: true,
                        value: CODE_BASE + 6,
                    },
                    CallstackFrame {
                        is_stack_address_valid: true,
                        is_executable: false,
                        value: 0,
                    },
                ],
            })],
            A::ModeTestQuery => {
                let request_type = ByteReader::new(payload).u32().unwrap_or_default();
                vec![DebuggeeMessage::TestQuery(TestQueryResult {
                    request_type,
                    kernel_status: ok,
                })]
            }
            A::ModeRunScript => self.run_script(payload),
            A::ModeSearchQuery => vec![DebuggeeMessage::SearchQuery(SearchResult {
                count_of_results: 0,
                result: ok,
            })],
            A::ModeRegisterEvent => vec![DebuggeeMessage::RegisterEvent(EventAndActionResult {
                is_successful: true,
                error: 0,
            })],
            A::ModeAddActionToEvent => {
                vec![DebuggeeMessage::AddActionToEvent(EventAndActionResult {
                    is_successful: true,
                    error: 0,
                })]
            }
            A::ModeQueryAndModifyEvent => {
                let result = match ModifyEventRequest::from_bytes(payload) {
                    Ok(request) => ModifyEventsResult {
                        tag: request.tag,
                        kernel_status: ok,
                        type_of_action: request.action.code(),
                        is_enabled: true,
                    },
                    Err(_) => ModifyEventsResult {
                        tag: 0,
                        kernel_status: KernelStatus::TAG_NOT_EXISTS,
                        type_of_action: 0,
                        is_enabled: false,
                    },
                };
                vec![DebuggeeMessage::QueryAndModifyEvent(result)]
            }
            A::ModeReadRegisters => vec![DebuggeeMessage::ReadRegisters(self.registers())],
            A::ModeWriteRegister => vec![DebuggeeMessage::WriteRegister(payload.to_vec())],
            A::ModeReadMemory => {
                let size = ReadMemoryRequest::from_bytes(payload).map_or(0, |r| r.size as usize);
                let data = (0..size).map(|i| PROGRAM[i % PROGRAM.len()]).collect();
                vec![DebuggeeMessage::ReadMemory(data)]
            }
            A::ModeEditMemory => vec![DebuggeeMessage::EditMemory(ok.0.to_le_bytes().to_vec())],
            A::ModeBp => vec![DebuggeeMessage::Bp(StatusResult { kernel_status: ok })],
            A::ModeListOrModifyBreakpoints => {
                vec![DebuggeeMessage::ListOrModifyBreakpoints(StatusResult { kernel_status: ok })]
            }
            A::ModeSymbolReload => vec![DebuggeeMessage::SymbolReloadFinished(StatusResult {
                kernel_status: ok,
            })],
            A::ModeQueryPa2vaAndVa2pa => {
                let mut result = TranslationResult::from_bytes(payload).unwrap_or(TranslationResult {
                    virtual_address: 0,
                    physical_address: 0,
                    process_id: 0,
                    is_virtual_to_physical: true,
                    kernel_status: ok,
                });
                // kernel base maps to physical zero
                if result.is_virtual_to_physical {
                    result.physical_address =
                        result.virtual_address.wrapping_sub(SIMULATED_KERNEL_BASE);
                } else {
                    result.virtual_address =
                        result.physical_address.wrapping_add(SIMULATED_KERNEL_BASE);
                }
                result.kernel_status = ok;
                vec![DebuggeeMessage::Va2paAndPa2va(result)]
            }
            A::ModeQueryPte => {
                let virtual_address = ByteReader::new(payload).u64().unwrap_or_default();
                let level = |value| PageTableLevel {
                    virtual_address: 0xFFFF_F6FB_0000_0000,
                    value,
                };
                vec![DebuggeeMessage::Pte(PteResult {
                    virtual_address,
                    pml4e: level(0x0000_0000_0010_0063),
                    pdpte: level(0x0000_0000_0020_0063),
                    pde: level(0x0000_0000_0030_0063),
                    pte: level(0x8000_0000_0040_0121),
                    kernel_status: ok,
                })]
            }
            A::ModeSetShortCircuitingState => {
                let mut reader = ByteReader::new(payload);
                let enabled = reader.u32().and_then(|_| reader.bool()).unwrap_or(false);
                self.short_circuiting.store(enabled, Ordering::SeqCst);
                vec![DebuggeeMessage::ShortCircuiting(ShortCircuitingResult {
                    kernel_status: ok,
                    is_short_circuiting: enabled,
                })]
            }
            A::ModeInjectPageFault => {
                vec![DebuggeeMessage::PageIn(StatusResult { kernel_status: ok })]
            }
            A::ModeApicRequest => vec![DebuggeeMessage::ApicRequest(vec![0; 0x40])],
            A::ModeQueryIdtEntries => vec![DebuggeeMessage::IdtEntries(Vec::new())],
            A::ModeQueryPcitree => vec![DebuggeeMessage::Pcitree(PcitreeResult {
                kernel_status: ok,
                devices: vec![Self::pci_device()],
            })],
            A::ModeQueryPcidevinfo => {
                let request = PcidevinfoResult::from_bytes(payload).ok();
                let device = request.as_ref().map_or_else(Self::pci_device, |r| r.device);
                let print_raw = request.map_or(false, |r| r.print_raw);
                let mut config_space = vec![0u8; CAM_CONFIG_SPACE_LENGTH];
                config_space[..2].copy_from_slice(&device.vendor_id.to_le_bytes());
                config_space[2..4].copy_from_slice(&device.device_id.to_le_bytes());
                config_space[0x0B] = 0x06; // bridge
                vec![DebuggeeMessage::Pcidevinfo(PcidevinfoResult {
                    kernel_status: ok,
                    device,
                    print_raw,
                    config_space,
                })]
            }
            other => {
                log::warn!("{:?} is not a kernel-mode request", other);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ByteWriter, PacketType};
    use crate::transparency::{GuestRegisters, TrapParams};
    use crate::transport::MemoryTransport;

    fn simulated() -> (SimulatedDebuggee, MemoryTransport) {
        let (local, remote) = MemoryTransport::pair();
        (SimulatedDebuggee::new(Arc::new(local), 0x0001_0000), remote)
    }

    fn request(action: RequestedAction, payload: Vec<u8>) -> RemotePacket {
        RemotePacket::new(PacketType::DebuggerToDebuggeeExecuteOnVmxRoot, action, payload)
    }

    #[test]
    fn test_invalid_core_is_refused() {
        let (target, _remote) = simulated();
        let mut writer = ByteWriter::new();
        writer.u32(7).u32(KernelStatus::SUCCESS.0);

        let replies = target.execute(&request(RequestedAction::ModeChangeCore, writer.finish()));
        assert_eq!(
            replies,
            vec![DebuggeeMessage::ChangeCore(ChangeCoreResult {
                new_core: 7,
                result: KernelStatus::INVALID_CORE_ID,
            })]
        );
    }

    #[test]
    fn test_formats_evaluates_rip() {
        let (target, _remote) = simulated();
        let script = RunScriptRequest {
            script: "@rip".to_string(),
            is_format: true,
        };

        let replies = target.execute(&request(RequestedAction::ModeRunScript, script.to_bytes()));
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0],
            DebuggeeMessage::Formats(FormatsResult {
                value: CODE_BASE,
                result: KernelStatus::SUCCESS,
            })
        );
    }

    #[test]
    fn test_short_circuiting_is_remembered() {
        let (target, _remote) = simulated();
        let mut writer = ByteWriter::new();
        writer.u32(0).bool(true);

        target.execute(&request(
            RequestedAction::ModeSetShortCircuitingState,
            writer.finish(),
        ));
        assert!(target.is_short_circuiting());
    }

    #[test]
    fn test_pause_is_reported_to_debugger() {
        let (target, remote) = simulated();
        assert!(target.pause_debuggee());

        let buf = remote.receive_framed().unwrap();
        assert_eq!(
            buf,
            target.paused(PausingReason::Pause).to_packet().encode()
        );
    }

    #[test]
    fn test_debuggee_actions_are_ignored() {
        let (target, _remote) = simulated();
        let replies = target.execute(&request(RequestedAction::DebuggeeResultOfFlush, Vec::new()));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_trap_capacity_comes_from_config() {
        let (local, _remote) = MemoryTransport::pair();
        let config = KdConfig {
            trap_capacity: 8,
            ..KdConfig::new()
        };
        let target = SimulatedDebuggee::from_config(Arc::new(local), &config);

        assert_eq!(target.transparency().capacity(), 8);

        // once hidden, the ninth thread is not tracked
        assert_eq!(target.hide(), KernelStatus::SUCCESS);
        let mut guest = GuestRegisters::default();
        for thread_id in 0..8 {
            assert!(target.transparency().arm_trap_after_syscall(
                &mut guest,
                4,
                thread_id,
                0,
                TrapParams::default()
            ));
        }
        assert!(!target.transparency().arm_trap_after_syscall(
            &mut guest,
            4,
            8,
            0,
            TrapParams::default()
        ));
        assert_eq!(target.transparency().pending_traps(), 8);
        assert_eq!(
            target.handshake()[0],
            DebuggeeMessage::Ping(PingPacket {
                version: config.protocol_version,
            })
        );
    }

    #[test]
    fn test_hide_and_unhide() {
        let (target, _remote) = simulated();
        assert!(!target.transparency().is_enabled());

        assert_eq!(target.hide(), KernelStatus::SUCCESS);
        assert!(target.transparency().is_enabled());
        assert_eq!(target.hide(), KernelStatus::DEBUGGER_ALREADY_HIDE);

        assert_eq!(target.unhide(), KernelStatus::SUCCESS);
        assert_eq!(target.unhide(), KernelStatus::DEBUGGER_ALREADY_UNHIDE);
        assert!(!target.transparency().is_enabled());
    }
}
