//! Handling of the "debuggee paused" packet
//!
//! A pause halts every core of the debuggee. The reason decides which
//! requester (if any) gets control back.

use crate::disasm::Bitness;
use crate::protocol::payload::{CallingStage, PausedPacket, PausingReason, MAXIMUM_INSTR_SIZE};
use crate::signals::SyncObject;

use super::KdContext;

/// Slot woken for a pausing reason; `None` for informational pauses
pub fn pausing_slot(reason: PausingReason) -> Option<SyncObject> {
    match reason {
        PausingReason::SoftwareBreakpointHit
        | PausingReason::HardwareDebugRegisterHit
        | PausingReason::EventTriggered
        | PausingReason::Stepped
        | PausingReason::TrackingStepped
        | PausingReason::ProcessSwitched
        | PausingReason::ThreadSwitched
        | PausingReason::StartingModuleLoaded => Some(SyncObject::IsDebuggerRunning),
        PausingReason::CoreSwitched => Some(SyncObject::CoreSwitchingResult),
        PausingReason::CommandExecutionFinished => {
            Some(SyncObject::DebuggeeFinishedCommandExecution)
        }
        PausingReason::RequestFromDebugger => Some(SyncObject::PausedDebuggeeDetails),
        PausingReason::Pause => None,
    }
}

/// Update the session for a halted debuggee and wake the matching requester
///
/// Returns the slot that was signaled.
pub fn handle_paused(ctx: &KdContext, paused: &PausedPacket) -> Option<SyncObject> {
    // no debuggee output while the user is at the prompt
    ctx.state.set_ignore_new_logging_messages(true);
    ctx.state.record_pause(paused);

    let reason = paused.reason();
    log::debug!(
        "Debuggee paused on core {} at {:#x} ({:?})",
        paused.current_core,
        paused.rip,
        reason
    );

    if let Some(reason) = reason {
        show_reason_details(ctx, paused, reason);
    }

    if !paused.ignore_disassembling && ctx.config.show_disassembly {
        show_current_instruction(ctx, paused);
    }

    let Some(reason) = reason else {
        ctx.show("err, unknown pausing reason is received");
        return None;
    };

    if reason == PausingReason::TrackingStepped {
        track_instruction(ctx, paused);
    }

    let slot = pausing_slot(reason)?;
    ctx.signals.signal(slot);
    Some(slot)
}

fn show_reason_details(ctx: &KdContext, paused: &PausedPacket, reason: PausingReason) {
    match reason {
        PausingReason::SoftwareBreakpointHit if paused.event_tag != 0 => {
            ctx.show(&format!("breakpoint 0x{:x} hit", paused.event_tag));
        }
        PausingReason::EventTriggered if paused.event_tag != 0 => {
            let stage = match paused.calling_stage() {
                Some(CallingStage::PostEventEmulation) => "post",
                _ => "pre",
            };
            let tag = ctx.events().display_tag(paused.event_tag);
            ctx.show(&format!("event 0x{:x} triggered ({})", tag, stage));
        }
        PausingReason::ProcessSwitched => ctx.show("switched to the specified process"),
        PausingReason::ThreadSwitched => ctx.show("switched to the specified thread"),
        PausingReason::StartingModuleLoaded => ctx.show(
            "the target module is loaded and a breakpoint is set to the entrypoint\n\
             press 'g' to reach to the entrypoint of the main module...",
        ),
        _ => {}
    }
}

fn show_current_instruction(ctx: &KdContext, paused: &PausedPacket) {
    let bitness = Bitness::from_32bit_flag(paused.is_processor_on_32bit_mode);
    let disassembler = ctx.disassembler();

    // a short read means the tail of the window is not real memory
    if (paused.read_instruction_len as usize) < MAXIMUM_INSTR_SIZE {
        let decoded = disassembler.instruction_length(&paused.instruction_bytes, bitness);
        if decoded.map_or(false, |len| len > paused.read_instruction_len as usize) {
            ctx.show("oOh, no! there might be a misinterpretation in disassembling the current instruction");
        }
    }

    let instructions = disassembler.disassemble(&paused.instruction_bytes, paused.rip, bitness);
    match instructions.first() {
        Some(first) => {
            let listing = disassembler.format_listing(std::slice::from_ref(first));
            ctx.show(listing.trim_end());
        }
        None => log::warn!("Unable to disassemble the instruction at {:#x}", paused.rip),
    }
}

fn track_instruction(ctx: &KdContext, paused: &PausedPacket) {
    let bitness = Bitness::from_32bit_flag(paused.is_processor_on_32bit_mode);
    let instructions = ctx
        .disassembler()
        .disassemble(&paused.instruction_bytes, paused.rip, bitness);

    if let Some(first) = instructions.first() {
        let line = ctx.tracker().handle_instruction(first);
        if let Some(line) = line {
            ctx.show(&line);
        }
    }
}
