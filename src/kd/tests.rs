//! Dispatcher, pausing and handler tests

use std::sync::{Arc, Mutex};
use std::thread;

use super::handlers::{format_pcitree, format_pte, response_slot};
use super::pausing::{handle_paused, pausing_slot};
use super::*;
use crate::config::KdConfig;
use crate::disasm::{Bitness, DisassembledInstruction, Disassembler};
use crate::protocol::payload::{
    CallingStage, ChangeCoreResult, DebuggeeStarted, EventAndActionResult, FormatsResult,
    LogMessage, ModifyEventAction, ModifyEventsResult, PageTableLevel, PciDeviceEntry,
    PcitreeResult, PingPacket, PteResult, ScriptResult, StatusResult, DEV_MAX_NUM,
};
use crate::protocol::{
    classify, encode_raw, DebuggeeMessage, KernelStatus, PacketType, PausedPacket,
    PausingReason, Received, RequestedAction, WirePayload,
};
use crate::signals::{SyncError, SyncObject};
use crate::transport::{MemoryTransport, Transport};
use crate::ui::BufferSink;

struct Session {
    ctx: Arc<KdContext>,
    sink: Arc<BufferSink>,
    remote: MemoryTransport,
}

fn session() -> Session {
    session_with(|collab| collab)
}

fn session_with(build: impl FnOnce(Collaborators) -> Collaborators) -> Session {
    let (local, remote) = MemoryTransport::pair();
    let sink = Arc::new(BufferSink::new());
    let collab = build(Collaborators::new(Arc::new(local), sink.clone()));
    Session {
        ctx: Arc::new(KdContext::new(KdConfig::new(), collab)),
        sink,
        remote,
    }
}

fn paused(reason: PausingReason, event_tag: u64) -> PausedPacket {
    let mut instruction_bytes = [0x90; 16];
    instruction_bytes[0] = 0xCC;
    PausedPacket {
        rip: 0xFFFF_F800_1234_0000,
        is_processor_on_32bit_mode: false,
        ignore_disassembling: false,
        pausing_reason: reason.code(),
        current_core: 2,
        event_tag,
        event_calling_stage: CallingStage::PreEventEmulation.code(),
        rflags: 0x246,
        instruction_bytes,
        read_instruction_len: 16,
    }
}

fn framed(message: DebuggeeMessage) -> Vec<u8> {
    message.to_packet().encode()
}

#[test]
fn test_pausing_slots() {
    assert_eq!(pausing_slot(PausingReason::Pause), None);
    assert_eq!(
        pausing_slot(PausingReason::SoftwareBreakpointHit),
        Some(SyncObject::IsDebuggerRunning)
    );
    assert_eq!(
        pausing_slot(PausingReason::TrackingStepped),
        Some(SyncObject::IsDebuggerRunning)
    );
    assert_eq!(
        pausing_slot(PausingReason::CoreSwitched),
        Some(SyncObject::CoreSwitchingResult)
    );
    assert_eq!(
        pausing_slot(PausingReason::CommandExecutionFinished),
        Some(SyncObject::DebuggeeFinishedCommandExecution)
    );
    assert_eq!(
        pausing_slot(PausingReason::RequestFromDebugger),
        Some(SyncObject::PausedDebuggeeDetails)
    );
}

#[test]
fn test_breakpoint_pause_records_state() {
    let s = session();
    s.ctx.state.set_running(true);
    s.ctx.signals.arm(SyncObject::IsDebuggerRunning, 0).unwrap();

    let packet = paused(PausingReason::SoftwareBreakpointHit, 3);
    let slot = handle_paused(&s.ctx, &packet);

    assert_eq!(slot, Some(SyncObject::IsDebuggerRunning));
    assert_eq!(s.ctx.signals.wait_for(SyncObject::IsDebuggerRunning), Ok(None));
    assert!(!s.ctx.state.is_running());
    assert!(s.ctx.state.ignore_new_logging_messages());
    assert_eq!(s.ctx.state.current_core(), 2);
    assert_eq!(s.ctx.state.current_instruction().rip, packet.rip);
    assert!(s.sink.contains("breakpoint 0x3 hit"));
    assert!(s.sink.contains("fffff800`12340000  CC"));
}

#[test]
fn test_plain_pause_signals_nothing() {
    let s = session();
    s.ctx.signals.arm(SyncObject::IsDebuggerRunning, 0).unwrap();

    assert_eq!(handle_paused(&s.ctx, &paused(PausingReason::Pause, 0)), None);
    assert!(s.ctx.signals.is_armed(SyncObject::IsDebuggerRunning));
    assert!(!s.ctx.state.is_running());
}

#[test]
fn test_event_tag_shown_relative_to_seed() {
    let s = session();
    let tag = DEBUGGER_EVENT_TAG_START_SEED + 5;
    let mut packet = paused(PausingReason::EventTriggered, tag);
    packet.event_calling_stage = CallingStage::PostEventEmulation.code();

    handle_paused(&s.ctx, &packet);
    assert!(s.sink.contains("event 0x5 triggered (post)"));
}

#[test]
fn test_short_instruction_read_warns() {
    let s = session();
    let mut packet = paused(PausingReason::Stepped, 0);
    // call rel32 needs 5 bytes but only 2 were readable
    packet.instruction_bytes = [0; 16];
    packet.instruction_bytes[..2].copy_from_slice(&[0xE8, 0x10]);
    packet.read_instruction_len = 2;

    handle_paused(&s.ctx, &packet);
    assert!(s.sink.contains("misinterpretation in disassembling"));
}

#[test]
fn test_ignore_disassembling() {
    let s = session();
    let mut packet = paused(PausingReason::Stepped, 0);
    packet.ignore_disassembling = true;

    handle_paused(&s.ctx, &packet);
    assert!(!s.sink.contains("fffff800`12340000"));
}

/// Decodes every window as one `ud2` and renders its own listing
struct FixedDisassembler;

impl Disassembler for FixedDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        _bitness: Bitness,
    ) -> Vec<DisassembledInstruction> {
        vec![DisassembledInstruction {
            address,
            bytes: bytes[..2].to_vec(),
            mnemonic: "ud2".to_string(),
            length: 2,
            is_branch: false,
            is_call: false,
            is_ret: false,
            target_address: None,
        }]
    }

    fn format_listing(&self, instructions: &[DisassembledInstruction]) -> String {
        format!("fixed listing: {}", instructions[0].mnemonic)
    }
}

#[test]
fn test_pause_uses_configured_disassembler() {
    let s = session_with(|c| c.with_disassembler(Arc::new(FixedDisassembler)));

    handle_paused(&s.ctx, &paused(PausingReason::Stepped, 0));
    assert!(s.sink.contains("fixed listing: ud2"));
    assert!(!s.sink.contains("int3"));
}

#[test]
fn test_unknown_pausing_reason() {
    let s = session();
    let mut packet = paused(PausingReason::Pause, 0);
    packet.pausing_reason = 0x99;

    assert_eq!(handle_paused(&s.ctx, &packet), None);
    assert!(s.sink.contains("err, unknown pausing reason is received"));
}

#[test]
fn test_tracking_step_follows_calls() {
    let s = session();
    let mut packet = paused(PausingReason::TrackingStepped, 0);
    packet.instruction_bytes = [0x90; 16];
    packet.instruction_bytes[..5].copy_from_slice(&[0xE8, 0x00, 0x01, 0x00, 0x00]);

    handle_paused(&s.ctx, &packet);
    assert_eq!(s.ctx.tracker().depth(), 1);
    assert!(s.sink.contains("call fffff800`12340105"));
}

#[test]
fn test_started_packet() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.signals.arm(SyncObject::StartedPacketReceived, 0).unwrap();

    let started = DebuggeeMessage::Started(DebuggeeStarted {
        kernel_base_address: 0xFFFF_F800_0000_0000,
        os_name: "TestOS".to_string(),
    });
    assert!(listener.process(&framed(started)));

    assert_eq!(s.ctx.state.kernel_base_address(), 0xFFFF_F800_0000_0000);
    assert_eq!(s.ctx.state.os_name(), "TestOS");
    assert_eq!(s.ctx.signals.wait_for(SyncObject::StartedPacketReceived), Ok(None));
    assert!(s.sink.contains("connected to debuggee TestOS"));
    assert_eq!(listener.state(), ListenerState::Listening);
}

#[test]
fn test_corrupted_checksum_is_dropped() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());

    let mut buf = framed(DebuggeeMessage::Started(DebuggeeStarted {
        kernel_base_address: 0xFFFF_F800_0000_0000,
        os_name: "TestOS".to_string(),
    }));
    let last = buf.len() - 1;
    buf[last] = buf[last].wrapping_add(1);

    assert!(listener.process(&buf));
    assert_eq!(s.ctx.state.kernel_base_address(), 0);
    assert!(s.ctx.state.os_name().is_empty());
    assert!(s.sink.contains("err, checksum is invalid"));
    assert_eq!(listener.state(), ListenerState::Listening);
}

#[test]
fn test_wrong_direction_and_unknown_action() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());

    let request = encode_raw(
        PacketType::DebuggerToDebuggeeExecuteOnVmxRoot.code(),
        RequestedAction::ModeContinue.code(),
        &[],
    );
    assert!(listener.process(&request));
    assert!(s.sink.contains("err, unknown packet received from the debuggee"));

    let unknown = encode_raw(PacketType::DebuggeeToDebugger.code(), 0x03FF, &[1, 2]);
    assert!(listener.process(&unknown));
    assert!(s
        .sink
        .contains("err, unknown packet action received from the debuggee"));
}

#[test]
fn test_ping_is_answered_with_our_version() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());

    listener.process(&framed(DebuggeeMessage::Ping(PingPacket { version: 0x0002_0000 })));
    assert!(s.sink.contains("warning, the debuggee runs protocol version 0x20000"));

    let reply = s.remote.receive_framed().unwrap();
    let Ok(Received::Packet(packet)) = classify(&reply, PacketType::DebuggerToDebuggeeExecuteOnVmxRoot)
    else {
        panic!("reply is not a kernel-mode packet");
    };
    assert_eq!(packet.action(), Some(RequestedAction::PingAndSendSupportedVersion));
    assert_eq!(
        PingPacket::from_bytes(&packet.payload).unwrap().version,
        s.ctx.config.protocol_version
    );
}

struct Recorder(Mutex<Vec<String>>);

impl OutputForwarder for Recorder {
    fn forward(&self, _operation_code: u32, message: &str) -> bool {
        self.0.lock().unwrap().push(message.to_string());
        true
    }
}

#[test]
fn test_log_messages() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    let log_packet = |text: &str| {
        framed(DebuggeeMessage::Log(LogMessage {
            operation_code: 1,
            message: text.to_string(),
        }))
    };

    listener.process(&log_packet("hello from the debuggee"));
    assert!(s.sink.contains("hello from the debuggee"));

    // suppressed while halted
    s.ctx.state.set_ignore_new_logging_messages(true);
    listener.process(&log_packet("while halted"));
    assert!(!s.sink.contains("while halted"));

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let forwarded = session_with(|c| c.with_forwarder(recorder.clone()));
    let mut listener = DebuggerListener::new(forwarded.ctx.clone());
    listener.process(&log_packet("to the forwarder"));
    assert!(!forwarded.sink.contains("to the forwarder"));
    assert_eq!(recorder.0.lock().unwrap().as_slice(), ["to the forwarder"]);
}

#[test]
fn test_change_core_signals_only_on_failure() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.signals.arm(SyncObject::CoreSwitchingResult, 64).unwrap();

    listener.process(&framed(DebuggeeMessage::ChangeCore(ChangeCoreResult {
        new_core: 3,
        result: KernelStatus::SUCCESS,
    })));
    assert!(s.sink.contains("current operating core changed to 0x3"));

    let failure = ChangeCoreResult {
        new_core: 9,
        result: KernelStatus::INVALID_CORE_ID,
    };
    listener.process(&framed(DebuggeeMessage::ChangeCore(failure.clone())));
    assert!(s.sink.contains("err, invalid core id (0xc0000001)"));
    assert_eq!(
        s.ctx.signals.wait_for(SyncObject::CoreSwitchingResult),
        Ok(Some(failure.to_bytes()))
    );
}

#[test]
fn test_formats_then_script_result() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.signals.arm(SyncObject::ScriptFormatsResult, 0).unwrap();

    listener.process(&framed(DebuggeeMessage::Formats(FormatsResult {
        value: 0x1234,
        result: KernelStatus::SUCCESS,
    })));
    // the value alone wakes nobody
    assert!(s.ctx.signals.is_armed(SyncObject::ScriptFormatsResult));

    listener.process(&framed(DebuggeeMessage::RunScript(ScriptResult {
        result: KernelStatus::SUCCESS,
        is_format: true,
    })));
    assert_eq!(s.ctx.signals.wait_for(SyncObject::ScriptFormatsResult), Ok(None));
    assert_eq!(s.ctx.state.evaluated_expression().value, 0x1234);
}

#[test]
fn test_event_results() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    let tag = s.ctx.events().register("!syscall");

    let result = EventAndActionResult {
        is_successful: true,
        error: 0,
    };
    listener.process(&framed(DebuggeeMessage::RegisterEvent(result)));
    assert_eq!(s.ctx.state.register_event_result(), result);

    listener.process(&framed(DebuggeeMessage::QueryAndModifyEvent(ModifyEventsResult {
        tag,
        kernel_status: KernelStatus::SUCCESS,
        type_of_action: ModifyEventAction::Disable.code(),
        is_enabled: false,
    })));
    assert!(!s.ctx.events().get(tag).unwrap().enabled);

    listener.process(&framed(DebuggeeMessage::QueryAndModifyEvent(ModifyEventsResult {
        tag,
        kernel_status: KernelStatus::SUCCESS,
        type_of_action: ModifyEventAction::QueryState.code(),
        is_enabled: true,
    })));
    assert!(s.ctx.state.shared_event_status());
    // a query does not touch the local table
    assert!(!s.ctx.events().get(tag).unwrap().enabled);
}

#[test]
fn test_raw_result_truncated_to_capacity() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.signals.arm(SyncObject::ReadMemory, 4).unwrap();

    listener.process(&framed(DebuggeeMessage::ReadMemory(vec![1, 2, 3, 4, 5, 6])));
    assert_eq!(
        s.ctx.signals.wait_for(SyncObject::ReadMemory),
        Ok(Some(vec![1, 2, 3, 4]))
    );
}

#[test]
fn test_breakpoint_failure_is_shown() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.signals.arm(SyncObject::Bp, 16).unwrap();

    let result = StatusResult {
        kernel_status: KernelStatus::BREAKPOINT_ALREADY_EXISTS,
    };
    listener.process(&framed(DebuggeeMessage::Bp(result.clone())));

    assert!(s.sink.contains("err, breakpoint already exists"));
    assert_eq!(
        s.ctx.signals.wait_for(SyncObject::Bp),
        Ok(Some(result.to_bytes()))
    );
}

#[test]
fn test_close_releases_waiters_and_events() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    s.ctx.state.set_connected(true);
    s.ctx.events().register("!epthook");

    s.ctx.signals.arm(SyncObject::ReadMemory, 16).unwrap();
    let ctx = s.ctx.clone();
    let waiter = thread::spawn(move || ctx.signals.wait_for(SyncObject::ReadMemory));

    assert!(!listener.process(&[]));

    assert_eq!(
        waiter.join().unwrap(),
        Err(SyncError::Disconnected(SyncObject::ReadMemory))
    );
    assert!(s.ctx.events().is_empty());
    assert!(!s.ctx.state.is_connected());
    assert_eq!(listener.state(), ListenerState::Closed);
    assert!(s.sink.contains("the remote connection is closed"));
    assert_eq!(
        s.ctx.events().register("next"),
        DEBUGGER_EVENT_TAG_START_SEED
    );
}

#[test]
fn test_single_zero_byte_closes() {
    let s = session();
    let mut listener = DebuggerListener::new(s.ctx.clone());
    assert!(!listener.process(&[0]));
    assert_eq!(listener.state(), ListenerState::Closed);
}

#[test]
fn test_every_result_has_a_slot() {
    for action in RequestedAction::ALL {
        if let Some(response) = response_for(*action) {
            assert!(response_slot(response).is_some(), "{:?}", response);
        }
    }
}

#[test]
fn test_pte_stops_at_large_page() {
    let level = |value| PageTableLevel {
        virtual_address: 0xFFFF_F6FB_7DBE_D000,
        value,
    };
    let mut result = PteResult {
        virtual_address: 0xFFFF_F800_0000_0000,
        pml4e: level(0x1),
        pdpte: level(0x1),
        pde: level(0x1 | (1 << 7)),
        pte: level(0x1),
        kernel_status: KernelStatus::SUCCESS,
    };

    let has_pte = |text: String| text.lines().any(|line| line.starts_with("PTE "));

    let text = format_pte(&result);
    assert!(text.contains("PDE"));
    assert!(!has_pte(text));

    result.pde.value = 0x1;
    assert!(has_pte(format_pte(&result)));
}

#[test]
fn test_pcitree_listing_is_capped() {
    let device = PciDeviceEntry {
        bus: 0,
        device: 0x1f,
        function: 3,
        vendor_id: 0x8086,
        device_id: 0xa348,
    };
    let result = PcitreeResult {
        kernel_status: KernelStatus::SUCCESS,
        devices: vec![device; DEV_MAX_NUM + 10],
    };

    let listing = format_pcitree(&result);
    assert_eq!(listing.lines().count(), DEV_MAX_NUM + 1);
    assert!(listing.contains("00:1f.3       8086:a348"));
}
