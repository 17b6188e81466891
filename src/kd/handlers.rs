//! Action handlers of the dispatcher
//!
//! One handler per debuggee-to-debugger action. A handler shows what the
//! user should see, updates [`SharedState`](super::SharedState) and wakes the
//! requester waiting on the matching slot.

use std::collections::HashMap;

use crate::disasm::format_address;
use crate::protocol::payload::{
    CallstackResult, DetailsAction, ModifyEventAction, PcidevinfoResult, PcitreeResult,
    PingPacket, PteResult, TestQueryRequest, WirePayload, DEV_MAX_NUM,
};
use crate::protocol::{DebuggeeMessage, KernelStatus, PacketType, RemotePacket, RequestedAction};
use crate::signals::SyncObject;

use super::listener::ListenerError;
use super::pausing::handle_paused;
use super::KdContext;

/// A dispatcher handler: the decoded message plus its raw payload
pub type Handler = fn(&KdContext, &DebuggeeMessage, &[u8]) -> Result<(), ListenerError>;

/// Pull the expected variant out of a message or fail the dispatch
macro_rules! expect_message {
    ($msg:expr, $variant:ident) => {
        match $msg {
            DebuggeeMessage::$variant(inner) => inner,
            other => return Err(ListenerError::UnexpectedMessage(other.action())),
        }
    };
}

/// Build the dispatch table keyed by requested action
pub fn dispatch_table() -> HashMap<RequestedAction, Handler> {
    use RequestedAction as A;

    let mut table: HashMap<RequestedAction, Handler> = HashMap::new();

    table.insert(A::PingAndSendSupportedVersion, on_ping);
    table.insert(A::DebuggeeStarted, on_started);
    table.insert(A::DebuggeeLoggingMechanism, on_log);
    table.insert(A::DebuggeePausedAndCurrentInstruction, on_paused);
    table.insert(A::DebuggeeResultOfChangingCore, on_change_core);
    table.insert(A::DebuggeeResultOfChangingProcess, on_change_process);
    table.insert(A::DebuggeeResultOfChangingThread, on_change_thread);
    table.insert(A::DebuggeeReloadSearchQuery, on_search);
    table.insert(A::DebuggeeResultOfFlush, on_flush);
    table.insert(A::DebuggeeResultOfCallstack, on_callstack);
    table.insert(A::DebuggeeResultTestQuery, on_test_query);
    table.insert(A::DebuggeeResultOfRunningScript, on_run_script);
    table.insert(A::DebuggeeResultOfFormats, on_formats);
    table.insert(A::DebuggeeResultOfRegisteringEvent, on_register_event);
    table.insert(A::DebuggeeResultOfAddingActionToEvent, on_add_action);
    table.insert(A::DebuggeeResultOfQueryAndModifyEvent, on_query_and_modify_event);
    table.insert(A::DebuggeeReloadSymbolFinished, on_symbol_reload);
    table.insert(A::DebuggeeResultOfBp, on_status_result);
    table.insert(A::DebuggeeResultOfListOrModifyBreakpoints, on_status_result);
    table.insert(A::DebuggeeResultOfShortCircuitingState, on_short_circuiting);
    table.insert(A::DebuggeeResultOfPte, on_pte);
    table.insert(A::DebuggeeResultOfBringingPagesIn, on_page_in);
    table.insert(A::DebuggeeResultOfVa2paAndPa2va, on_va2pa);
    table.insert(A::DebuggeeUpdateSymbolInfo, on_update_symbol_info);
    table.insert(A::DebuggeeResultOfPcitree, on_pcitree);
    table.insert(A::DebuggeeResultOfPcidevinfo, on_pcidevinfo);

    // results copied straight into the requester's buffer
    for action in [
        A::DebuggeeResultOfReadingRegisters,
        A::DebuggeeResultOfWriteRegister,
        A::DebuggeeResultOfApicRequests,
        A::DebuggeeResultOfQueryIdtEntries,
        A::DebuggeeResultOfReadingMemory,
        A::DebuggeeResultOfEditingMemory,
    ] {
        table.insert(action, on_raw_result);
    }

    table
}

/// Slot that receives the result of a debuggee-to-debugger action
pub fn response_slot(action: RequestedAction) -> Option<SyncObject> {
    use RequestedAction as A;

    let slot = match action {
        A::DebuggeeStarted => SyncObject::StartedPacketReceived,
        A::DebuggeeResultOfChangingCore => SyncObject::CoreSwitchingResult,
        A::DebuggeeResultOfChangingProcess => SyncObject::ProcessSwitchingResult,
        A::DebuggeeResultOfChangingThread => SyncObject::ThreadSwitchingResult,
        A::DebuggeeReloadSearchQuery => SyncObject::SearchQueryResult,
        A::DebuggeeResultOfFlush => SyncObject::FlushResult,
        A::DebuggeeResultOfCallstack => SyncObject::CallstackResult,
        A::DebuggeeResultTestQuery => SyncObject::TestQuery,
        A::DebuggeeResultOfRunningScript => SyncObject::ScriptRunningResult,
        A::DebuggeeResultOfRegisteringEvent => SyncObject::RegisterEvent,
        A::DebuggeeResultOfAddingActionToEvent => SyncObject::AddActionToEvent,
        A::DebuggeeResultOfQueryAndModifyEvent => SyncObject::ModifyAndQueryEvent,
        A::DebuggeeReloadSymbolFinished => SyncObject::SymbolReload,
        A::DebuggeeResultOfReadingRegisters => SyncObject::ReadRegisters,
        A::DebuggeeResultOfWriteRegister => SyncObject::WriteRegister,
        A::DebuggeeResultOfApicRequests => SyncObject::ApicActions,
        A::DebuggeeResultOfQueryIdtEntries => SyncObject::IdtEntries,
        A::DebuggeeResultOfReadingMemory => SyncObject::ReadMemory,
        A::DebuggeeResultOfEditingMemory => SyncObject::EditMemory,
        A::DebuggeeResultOfBp => SyncObject::Bp,
        A::DebuggeeResultOfListOrModifyBreakpoints => SyncObject::ListOrModifyBreakpoints,
        A::DebuggeeResultOfShortCircuitingState => SyncObject::ShortCircuitingEventState,
        A::DebuggeeResultOfPte => SyncObject::PteResult,
        A::DebuggeeResultOfBringingPagesIn => SyncObject::PageInState,
        A::DebuggeeResultOfVa2paAndPa2va => SyncObject::Va2paAndPa2vaResult,
        A::DebuggeeResultOfPcitree => SyncObject::PcitreeResult,
        A::DebuggeeResultOfPcidevinfo => SyncObject::PcidevinfoResult,
        _ => return None,
    };
    Some(slot)
}

/// Hand the raw payload to the requester waiting for `action`
fn deliver(ctx: &KdContext, action: RequestedAction, payload: &[u8]) {
    if let Some(slot) = response_slot(action) {
        ctx.signals.deliver(slot, payload);
    }
}

fn on_ping(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let ping = expect_message!(msg, Ping);

    if ping.version != ctx.config.protocol_version {
        ctx.show(&format!(
            "warning, the debuggee runs protocol version 0x{:x} but the debugger expects 0x{:x}",
            ping.version, ctx.config.protocol_version
        ));
    }

    let reply = PingPacket {
        version: ctx.config.protocol_version,
    };
    ctx.send(&RemotePacket::new(
        PacketType::DebuggerToDebuggeeExecuteOnVmxRoot,
        RequestedAction::PingAndSendSupportedVersion,
        reply.to_bytes(),
    ))?;
    Ok(())
}

fn on_started(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let started = expect_message!(msg, Started);

    ctx.state.set_kernel_base_address(started.kernel_base_address);
    ctx.state.set_os_name(&started.os_name);
    log::info!(
        "Debuggee started: {} (kernel base {:#x})",
        started.os_name,
        started.kernel_base_address
    );

    ctx.show(&format!("connected to debuggee {}", started.os_name));
    ctx.signals.signal(SyncObject::StartedPacketReceived);
    Ok(())
}

fn on_log(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let log_message = expect_message!(msg, Log);

    if let Some(forwarder) = ctx.forwarder() {
        if forwarder.forward(log_message.operation_code, &log_message.message) {
            return Ok(());
        }
    }

    if !ctx.state.ignore_new_logging_messages() {
        ctx.show(&log_message.message);
    }
    Ok(())
}

fn on_paused(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let paused = expect_message!(msg, Paused);
    handle_paused(ctx, paused);
    Ok(())
}

fn on_change_core(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, ChangeCore);

    if result.result.is_success() {
        // the CoreSwitched pause that follows wakes the requester
        ctx.show(&format!(
            "current operating core changed to 0x{:x}",
            result.new_core
        ));
    } else {
        ctx.show_error(result.result);
        deliver(ctx, msg.action(), payload);
    }
    Ok(())
}

fn on_change_process(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, ChangeProcess);

    if result.result.is_success() {
        match DetailsAction::from_code(result.action_type) {
            Some(DetailsAction::GetDetails) => ctx.show(&format!(
                "process id: {:x}\nprocess (_EPROCESS): {}\nprocess name (16-Byte): {}",
                result.process_id,
                format_address(result.process),
                result.process_name
            )),
            Some(DetailsAction::PerformSwitch) => ctx.show(
                "press 'g' to continue the debuggee, if the pid or the process object address \
                 is valid then the debuggee will be automatically paused when it attached to \
                 the target process",
            ),
            _ => {}
        }
    } else {
        ctx.show_error(result.result);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_change_thread(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, ChangeThread);

    if result.result.is_success() {
        match DetailsAction::from_code(result.action_type) {
            Some(DetailsAction::GetDetails) => ctx.show(&format!(
                "thread id: {:x} (pid: {:x})\nthread (_ETHREAD): {}\nprocess (_EPROCESS): {}\nprocess name (16-Byte): {}",
                result.thread_id,
                result.process_id,
                format_address(result.thread),
                format_address(result.process),
                result.process_name
            )),
            Some(DetailsAction::PerformSwitch) => ctx.show(
                "press 'g' to continue the debuggee, if the tid or the thread object address \
                 is valid then the debuggee will be automatically paused when it attached to \
                 the target thread",
            ),
            _ => {}
        }
    } else {
        ctx.show_error(result.result);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_search(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, SearchQuery);

    if !result.result.is_success() {
        ctx.show_error(result.result);
    } else if result.count_of_results == 0 {
        ctx.show("not found");
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_flush(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Flush);

    if result.kernel_status.is_success() {
        let total = result.cleared_vmx_root as u64 + result.cleared_vmx_non_root as u64;
        ctx.show(&format!(
            "flushing buffers was successful, total {} messages were cleared.",
            total
        ));
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

/// Render callstack frames, one per line, offset from the stack pointer
pub fn format_callstack(result: &CallstackResult) -> String {
    let width = if result.is_32bit { 4 } else { 8 };
    let mut output = String::new();

    for (i, frame) in result.frames.iter().enumerate() {
        if !frame.is_stack_address_valid {
            continue;
        }
        let value = if result.is_32bit {
            format!("{:08x}", frame.value & 0xFFFF_FFFF)
        } else {
            format_address(frame.value)
        };
        let marker = if frame.is_executable { "  <- code" } else { "" };
        output.push_str(&format!("[$+{:03x}]  {}{}\n", i * width, value, marker));
    }

    output
}

fn on_callstack(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Callstack);

    if result.kernel_status.is_success() {
        let listing = format_callstack(result);
        if !listing.is_empty() {
            ctx.show(listing.trim_end());
        }
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_test_query(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, TestQuery);

    if result.kernel_status.is_success() {
        let text = match TestQueryRequest::from_code(result.request_type) {
            Some(TestQueryRequest::TurnOffBps) => Some(
                "breakpoint interception (#BP) is deactivated\n\
                 from now, the breakpoints will be re-injected into the guest debuggee",
            ),
            Some(TestQueryRequest::TurnOnBps) => Some("breakpoint interception (#BP) is activated"),
            Some(TestQueryRequest::TurnOffDbs) => Some(
                "debug break interception (#DB) is deactivated\n\
                 from now, the debug breaks will be re-injected into the guest debuggee",
            ),
            Some(TestQueryRequest::TurnOnDbs) => Some("debug break interception (#DB) is activated"),
            None => None,
        };
        if let Some(text) = text {
            ctx.show(text);
        }
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_run_script(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, RunScript);

    if !result.result.is_success() {
        ctx.show_error(result.result);
    }

    if result.is_format {
        ctx.signals.signal(SyncObject::ScriptFormatsResult);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_formats(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Formats);

    // the run-script result that follows wakes the requester
    ctx.state.set_evaluated_expression(result.value, result.result);
    Ok(())
}

fn on_register_event(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, RegisterEvent);
    ctx.state.set_register_event_result(*result);
    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_add_action(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, AddActionToEvent);
    ctx.state.set_add_action_result(*result);
    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_query_and_modify_event(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, QueryAndModifyEvent);

    if !result.kernel_status.is_success() {
        ctx.show_error(result.kernel_status);
    } else {
        match result.action() {
            Some(ModifyEventAction::QueryState) => {
                ctx.state.set_shared_event_status(result.is_enabled);
            }
            Some(action) => {
                let known = ctx.events().apply_modification(result.tag, action);
                if !known {
                    log::warn!("Modification of unknown event tag {:#x}", result.tag);
                }
            }
            None => log::warn!(
                "Unknown event modification {} for tag {:#x}",
                result.type_of_action,
                result.tag
            ),
        }
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_symbol_reload(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, SymbolReloadFinished);

    if result.kernel_status.is_success() {
        ctx.symbols()
            .initial_reload(ctx.state.kernel_base_address());
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

/// Breakpoint set and list/modify results
fn on_status_result(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = match msg {
        DebuggeeMessage::Bp(result) | DebuggeeMessage::ListOrModifyBreakpoints(result) => result,
        other => return Err(ListenerError::UnexpectedMessage(other.action())),
    };

    if !result.kernel_status.is_success() {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_short_circuiting(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, ShortCircuiting);

    if result.kernel_status.is_success() {
        ctx.show(&format!(
            "the event's short-circuiting state changed to '{}'",
            if result.is_short_circuiting { "on" } else { "off" }
        ));
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

/// Large-page bit of a PDPTE/PDE
const PAGE_SIZE_BIT: u64 = 1 << 7;

/// Paging walk as shown to the user; stops at a large page
pub fn format_pte(result: &PteResult) -> String {
    let mut output = format!("VA {:x}\n", result.virtual_address);
    let row = |name: &str, level: &crate::protocol::payload::PageTableLevel| {
        format!(
            "{:<14} at {}\tcontains {:016x}\n",
            name,
            format_address(level.virtual_address),
            level.value
        )
    };

    output.push_str(&row("PML4E (PXE)", &result.pml4e));
    output.push_str(&row("PDPTE (PPE)", &result.pdpte));
    if result.pdpte.value & PAGE_SIZE_BIT != 0 {
        return output;
    }
    output.push_str(&row("PDE", &result.pde));
    if result.pde.value & PAGE_SIZE_BIT != 0 {
        return output;
    }
    output.push_str(&row("PTE", &result.pte));
    output
}

fn on_pte(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Pte);

    if result.kernel_status.is_success() {
        ctx.show(format_pte(result).trim_end());
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_page_in(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, PageIn);

    if result.kernel_status.is_success() {
        ctx.show(
            "the page-fault is delivered to the target thread\n\
             press 'g' to continue debuggee (the current thread will execute ONLY one \
             instruction and will be halted again)",
        );
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_va2pa(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Va2paAndPa2va);

    if result.kernel_status.is_success() {
        let address = if result.is_virtual_to_physical {
            result.physical_address
        } else {
            result.virtual_address
        };
        ctx.show(&format!("{:x}", address));
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_update_symbol_info(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    _payload: &[u8],
) -> Result<(), ListenerError> {
    let update = expect_message!(msg, UpdateSymbolInfo);
    ctx.symbols()
        .update_symbol_table(&update.detail, update.current_item_index, update.total_items);
    Ok(())
}

/// `bus:dev.func  vendor:device` listing, at most [`DEV_MAX_NUM`] rows
pub fn format_pcitree(result: &PcitreeResult) -> String {
    let mut output = String::from("Bus:Dev.Func  VendorID:DeviceID\n");
    for device in result.devices.iter().take(DEV_MAX_NUM) {
        output.push_str(&format!(
            "{:02x}:{:02x}.{:x}       {:04x}:{:04x}\n",
            device.bus, device.device, device.function, device.vendor_id, device.device_id
        ));
    }
    output
}

fn on_pcitree(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Pcitree);

    if result.kernel_status.is_success() {
        ctx.show(format_pcitree(result).trim_end());
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

/// Device header plus (optionally) a hex dump of its configuration space
pub fn format_pcidevinfo(result: &PcidevinfoResult) -> String {
    let device = &result.device;
    let space = &result.config_space;
    let mut output = format!(
        "PCI device {:02x}:{:02x}.{:x}  VendorID:DeviceID {:04x}:{:04x}\n",
        device.bus, device.device, device.function, device.vendor_id, device.device_id
    );

    if space.len() > 0x0E {
        output.push_str(&format!(
            "class code {:02x}{:02x}{:02x}  header type {:02x}\n",
            space[0x0B], space[0x0A], space[0x09], space[0x0E]
        ));
    }

    if result.print_raw {
        for (row, chunk) in space.chunks(16).enumerate() {
            output.push_str(&format!("{:02x}: {}\n", row * 16, hex::encode(chunk)));
        }
    }

    output
}

fn on_pcidevinfo(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    let result = expect_message!(msg, Pcidevinfo);

    if result.kernel_status.is_success() {
        ctx.show(format_pcidevinfo(result).trim_end());
    } else {
        ctx.show_error(result.kernel_status);
    }

    deliver(ctx, msg.action(), payload);
    Ok(())
}

fn on_raw_result(
    ctx: &KdContext,
    msg: &DebuggeeMessage,
    payload: &[u8],
) -> Result<(), ListenerError> {
    match msg {
        DebuggeeMessage::ReadRegisters(_)
        | DebuggeeMessage::WriteRegister(_)
        | DebuggeeMessage::ApicRequest(_)
        | DebuggeeMessage::IdtEntries(_)
        | DebuggeeMessage::ReadMemory(_)
        | DebuggeeMessage::EditMemory(_) => {
            deliver(ctx, msg.action(), payload);
            Ok(())
        }
        other => Err(ListenerError::UnexpectedMessage(other.action())),
    }
}

/// Status a handler surfaced, for callers that only need success or failure
pub fn status_of(msg: &DebuggeeMessage) -> Option<KernelStatus> {
    let status = match msg {
        DebuggeeMessage::ChangeCore(r) => r.result,
        DebuggeeMessage::ChangeProcess(r) => r.result,
        DebuggeeMessage::ChangeThread(r) => r.result,
        DebuggeeMessage::SearchQuery(r) => r.result,
        DebuggeeMessage::Flush(r) => r.kernel_status,
        DebuggeeMessage::Callstack(r) => r.kernel_status,
        DebuggeeMessage::TestQuery(r) => r.kernel_status,
        DebuggeeMessage::RunScript(r) => r.result,
        DebuggeeMessage::Formats(r) => r.result,
        DebuggeeMessage::QueryAndModifyEvent(r) => r.kernel_status,
        DebuggeeMessage::SymbolReloadFinished(r)
        | DebuggeeMessage::Bp(r)
        | DebuggeeMessage::PageIn(r)
        | DebuggeeMessage::ListOrModifyBreakpoints(r) => r.kernel_status,
        DebuggeeMessage::ShortCircuiting(r) => r.kernel_status,
        DebuggeeMessage::Pte(r) => r.kernel_status,
        DebuggeeMessage::Va2paAndPa2va(r) => r.kernel_status,
        DebuggeeMessage::Pcitree(r) => r.kernel_status,
        DebuggeeMessage::Pcidevinfo(r) => r.kernel_status,
        _ => return None,
    };
    Some(status)
}
