//! End-to-end sessions between the debugger and a simulated debuggee
//!
//! Run with: cargo test --test protocol_session -- --nocapture

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use kdlink::config::KdConfig;
use kdlink::kd::simulator::SIMULATED_KERNEL_BASE;
use kdlink::kd::{
    ClientError, Collaborators, DebuggeeExit, DebuggeeListener, DebuggerListener, KdContext,
    KernelDebugger, SimulatedDebuggee, SymbolService, DEBUGGER_EVENT_TAG_START_SEED,
};
use kdlink::protocol::payload::{
    DebuggeeStarted, ModifyEventAction, ModuleSymbolDetail, ReadMemoryRequest, StatusResult,
    StepType,
};
use kdlink::protocol::{DebuggeeMessage, KernelStatus, PausingReason};
use kdlink::signals::{SyncError, SyncObject};
use kdlink::transport::{MemoryTransport, Transport, TransportError};
use kdlink::ui::BufferSink;

#[derive(Default)]
struct RecordingSymbols {
    reloads: Mutex<Vec<u64>>,
}

impl RecordingSymbols {
    fn reloads(&self) -> Vec<u64> {
        self.reloads.lock().unwrap().clone()
    }
}

impl SymbolService for RecordingSymbols {
    fn initial_reload(&self, kernel_base: u64) {
        self.reloads.lock().unwrap().push(kernel_base);
    }

    fn update_symbol_table(&self, _detail: &ModuleSymbolDetail, _index: u32, _total: u32) {}
}

fn started(os_name: &str) -> DebuggeeMessage {
    DebuggeeMessage::Started(DebuggeeStarted {
        kernel_base_address: 0xFFFF_F800_0000_0000,
        os_name: os_name.to_string(),
    })
}

/// Feed `messages` to a dispatcher and report which kernel bases symbol reload saw
fn reloads_after(messages: &[DebuggeeMessage]) -> Vec<u64> {
    let symbols = Arc::new(RecordingSymbols::default());
    let (local, _remote) = MemoryTransport::pair();
    let collab = Collaborators::new(Arc::new(local), Arc::new(BufferSink::new()))
        .with_symbols(symbols.clone());
    let mut listener = DebuggerListener::new(Arc::new(KdContext::new(KdConfig::new(), collab)));

    for message in messages {
        assert!(listener.process(&message.to_packet().encode()));
    }
    symbols.reloads()
}

#[test]
fn test_dispatch_order_carries_kernel_base() {
    let finished = DebuggeeMessage::SymbolReloadFinished(StatusResult {
        kernel_status: KernelStatus::SUCCESS,
    });

    let in_order = reloads_after(&[started("TestOS"), finished.clone()]);
    assert_eq!(in_order, vec![0xFFFF_F800_0000_0000]);

    // the reload runs before the base is known
    let reversed = reloads_after(&[finished, started("TestOS")]);
    assert_eq!(reversed, vec![0]);
}

#[test]
fn test_started_packet_sets_kernel_base() {
    let (local, _remote) = MemoryTransport::pair();
    let sink = Arc::new(BufferSink::new());
    let ctx = Arc::new(KdContext::new(
        KdConfig::new(),
        Collaborators::new(Arc::new(local), sink.clone()),
    ));
    let mut listener = DebuggerListener::new(ctx.clone());

    ctx.signals.arm(SyncObject::StartedPacketReceived, 0).unwrap();
    assert!(listener.process(&started("TestOS").to_packet().encode()));

    assert_eq!(ctx.state.kernel_base_address(), 0xFFFF_F800_0000_0000);
    assert_eq!(ctx.state.os_name(), "TestOS");
    assert_eq!(ctx.signals.wait_for(SyncObject::StartedPacketReceived), Ok(None));
    assert!(sink.contains("connected to debuggee TestOS"));
}

#[test]
fn test_corrupted_checksum_changes_nothing() {
    let (local, _remote) = MemoryTransport::pair();
    let sink = Arc::new(BufferSink::new());
    let ctx = Arc::new(KdContext::new(
        KdConfig::new(),
        Collaborators::new(Arc::new(local), sink.clone()),
    ));
    let mut listener = DebuggerListener::new(ctx.clone());
    ctx.signals.arm(SyncObject::StartedPacketReceived, 0).unwrap();

    let mut buf = started("TestOS").to_packet().encode();
    let last = buf.len() - 1;
    buf[last] = buf[last].wrapping_add(1);

    assert!(listener.process(&buf));
    assert!(sink.contains("err, checksum is invalid"));
    assert_eq!(ctx.state.kernel_base_address(), 0);
    assert_eq!(ctx.state.os_name(), "");
    assert!(ctx.signals.is_armed(SyncObject::StartedPacketReceived));

    // still listening
    assert!(listener.process(&started("TestOS").to_packet().encode()));
    assert_eq!(ctx.state.kernel_base_address(), 0xFFFF_F800_0000_0000);
}

struct Link {
    debugger: KernelDebugger,
    sink: Arc<BufferSink>,
    target: JoinHandle<Result<DebuggeeExit, TransportError>>,
}

/// A connected debugger with a simulated debuggee on the other end
fn link() -> Link {
    let (local, remote) = MemoryTransport::pair();
    let remote: Arc<dyn Transport> = Arc::new(remote);

    let simulated = Arc::new(SimulatedDebuggee::from_config(remote.clone(), &KdConfig::new()));
    let listener = DebuggeeListener::new(remote, simulated.clone(), Arc::new(BufferSink::new()))
        .with_agent(simulated.clone());
    for message in simulated.handshake() {
        listener.send(&message).unwrap();
    }
    let target = thread::spawn(move || listener.run());

    let sink = Arc::new(BufferSink::new());
    let ctx = Arc::new(KdContext::new(
        KdConfig::new(),
        Collaborators::new(Arc::new(local), sink.clone()),
    ));
    let debugger = KernelDebugger::connect(ctx).unwrap();

    Link {
        debugger,
        sink,
        target,
    }
}

#[test]
fn test_handshake_with_simulated_debuggee() {
    let link = link();
    let state = &link.debugger.context().state;

    assert!(link.debugger.is_connected());
    assert_eq!(state.kernel_base_address(), SIMULATED_KERNEL_BASE);
    assert_eq!(state.os_name(), "kdlink simulated target");
    assert!(link.sink.contains("connected to debuggee"));
    // versions match, so no warning
    assert!(!link.sink.contains("warning"));
}

#[test]
fn test_requests_round_trip() {
    let link = link();
    let debugger = &link.debugger;

    let flushed = debugger.flush().unwrap();
    assert_eq!(flushed.kernel_status, KernelStatus::SUCCESS);
    assert!(link.sink.contains("flushing buffers was successful"));

    let memory = debugger
        .read_memory(&ReadMemoryRequest {
            address: SIMULATED_KERNEL_BASE + 0x1000,
            size: 0x20,
            process_id: 0,
            is_physical: false,
        })
        .unwrap();
    assert_eq!(memory.len(), 0x20);
    assert_eq!(memory[0], 0x55);

    assert_eq!(debugger.evaluate_formats("0x1234").unwrap(), 0x1234);
    assert!(matches!(
        debugger.evaluate_formats("not a number"),
        Err(ClientError::Kernel(KernelStatus::INVALID_REGISTER_NUMBER))
    ));
}

#[test]
fn test_oversized_read_is_rejected_up_front() {
    let link = link();
    let debugger = &link.debugger;
    let max = debugger.max_read_size();

    let result = debugger.read_memory(&ReadMemoryRequest {
        address: SIMULATED_KERNEL_BASE + 0x1000,
        size: 0x30000,
        process_id: 0,
        is_physical: false,
    });
    match result {
        Err(ClientError::RequestTooLarge { size, max: limit }) => {
            assert_eq!(size, 0x30000);
            assert_eq!(limit, max);
        }
        other => panic!("expected RequestTooLarge, got {:?}", other),
    }

    // nothing was left armed, so the link still answers
    let memory = debugger
        .read_memory(&ReadMemoryRequest {
            address: SIMULATED_KERNEL_BASE + 0x1000,
            size: 0x10,
            process_id: 0,
            is_physical: false,
        })
        .unwrap();
    assert_eq!(memory.len(), 0x10);
    assert_eq!(
        debugger.flush().unwrap().kernel_status,
        KernelStatus::SUCCESS
    );
}

#[test]
fn test_change_core() {
    let link = link();
    let debugger = &link.debugger;

    debugger.change_core(1).unwrap();
    assert_eq!(debugger.context().state.current_core(), 1);

    assert!(matches!(
        debugger.change_core(9),
        Err(ClientError::Kernel(KernelStatus::INVALID_CORE_ID))
    ));
    assert!(link.sink.contains("err, invalid core id"));
    assert_eq!(debugger.context().state.current_core(), 1);
}

#[test]
fn test_step_reports_new_position() {
    let link = link();

    let pause = link.debugger.step(StepType::StepIn).unwrap().unwrap();
    assert_eq!(pause.reason(), Some(PausingReason::Stepped));
    // push rbp is one byte
    assert_eq!(pause.rip, SIMULATED_KERNEL_BASE + 0x1001);
    assert_eq!(link.debugger.context().state.current_instruction().rip, pause.rip);
}

#[test]
fn test_event_lifecycle() {
    let link = link();
    let debugger = &link.debugger;

    let tag = debugger.register_event("syscall hook", &[1, 2, 3, 4]).unwrap();
    assert_eq!(tag, DEBUGGER_EVENT_TAG_START_SEED);
    assert_eq!(debugger.context().events().len(), 1);

    debugger.add_action(tag, &[0xAA]).unwrap();
    assert!(debugger.query_event_state(tag).unwrap());

    let cleared = debugger.modify_event(tag, ModifyEventAction::Clear).unwrap();
    assert_eq!(cleared.tag, tag);
    assert!(debugger.context().events().is_empty());
}

#[test]
fn test_close_and_unload_stops_both_ends() {
    let link = link();
    let ctx = link.debugger.context().clone();

    link.debugger.close_and_unload().unwrap();

    assert_eq!(link.target.join().unwrap().unwrap(), DebuggeeExit::StopRequested);
    assert!(!ctx.state.is_connected());
    assert!(link.sink.contains("the remote connection is closed"));
}

#[test]
fn test_disconnect_releases_pending_request() {
    let (local, remote) = MemoryTransport::pair();
    let sink = Arc::new(BufferSink::new());
    let ctx = Arc::new(KdContext::new(
        KdConfig::new(),
        Collaborators::new(Arc::new(local), sink.clone()),
    ));

    remote
        .send_framed(&started("TestOS").to_packet().encode())
        .unwrap();
    let debugger = KernelDebugger::connect(ctx.clone()).unwrap();

    thread::scope(|s| {
        let pending = s.spawn(|| debugger.flush());

        // the request is on the wire; now the debuggee goes away
        let request = remote.receive_framed().unwrap();
        assert!(!request.is_empty());
        remote.close();

        let result = pending.join().unwrap();
        assert!(matches!(
            result,
            Err(ClientError::Sync(SyncError::Disconnected(_)))
        ));
    });

    assert!(!debugger.is_connected());
    assert!(sink.contains("the remote connection is closed"));
}
