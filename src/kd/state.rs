//! State shared between the dispatcher and requester threads
//!
//! The dispatcher is the only writer. Scalars are atomics, everything else
//! sits behind its own mutex so requesters waiting on distinct slots never
//! contend with each other.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::protocol::payload::{EventAndActionResult, PausedPacket, MAXIMUM_INSTR_SIZE};
use crate::protocol::KernelStatus;

/// Result of the last `.formats` style evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatedExpression {
    pub value: u64,
    pub status: KernelStatus,
}

impl Default for EvaluatedExpression {
    fn default() -> Self {
        Self {
            value: 0,
            status: KernelStatus::SUCCESS,
        }
    }
}

/// The instruction window at RIP of the halted core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentInstruction {
    pub rip: u64,
    pub bytes: [u8; MAXIMUM_INSTR_SIZE],
    pub is_32bit: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct SharedState {
    connected: AtomicBool,
    is_running: AtomicBool,
    ignore_new_logging_messages: AtomicBool,
    kernel_base_address: AtomicU64,
    current_core: AtomicU32,
    shared_event_status: AtomicBool,
    os_name: Mutex<String>,
    current_instruction: Mutex<CurrentInstruction>,
    last_pause: Mutex<Option<PausedPacket>>,
    register_event_result: Mutex<EventAndActionResult>,
    add_action_result: Mutex<EventAndActionResult>,
    evaluated_expression: Mutex<EvaluatedExpression>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::SeqCst);
    }

    pub fn ignore_new_logging_messages(&self) -> bool {
        self.ignore_new_logging_messages.load(Ordering::SeqCst)
    }

    pub fn set_ignore_new_logging_messages(&self, ignore: bool) {
        self.ignore_new_logging_messages
            .store(ignore, Ordering::SeqCst);
    }

    pub fn kernel_base_address(&self) -> u64 {
        self.kernel_base_address.load(Ordering::SeqCst)
    }

    pub fn set_kernel_base_address(&self, base: u64) {
        self.kernel_base_address.store(base, Ordering::SeqCst);
    }

    pub fn current_core(&self) -> u32 {
        self.current_core.load(Ordering::SeqCst)
    }

    pub fn shared_event_status(&self) -> bool {
        self.shared_event_status.load(Ordering::SeqCst)
    }

    pub fn set_shared_event_status(&self, enabled: bool) {
        self.shared_event_status.store(enabled, Ordering::SeqCst);
    }

    pub fn os_name(&self) -> String {
        lock(&self.os_name).clone()
    }

    pub fn set_os_name(&self, name: &str) {
        *lock(&self.os_name) = name.to_string();
    }

    pub fn current_instruction(&self) -> CurrentInstruction {
        *lock(&self.current_instruction)
    }

    pub fn last_pause(&self) -> Option<PausedPacket> {
        lock(&self.last_pause).clone()
    }

    /// Record a halted debuggee: core, instruction window and mode
    pub fn record_pause(&self, paused: &PausedPacket) {
        self.set_running(false);
        self.current_core
            .store(paused.current_core, Ordering::SeqCst);
        *lock(&self.current_instruction) = CurrentInstruction {
            rip: paused.rip,
            bytes: paused.instruction_bytes,
            is_32bit: paused.is_processor_on_32bit_mode,
        };
        *lock(&self.last_pause) = Some(paused.clone());
    }

    pub fn register_event_result(&self) -> EventAndActionResult {
        *lock(&self.register_event_result)
    }

    pub fn set_register_event_result(&self, result: EventAndActionResult) {
        *lock(&self.register_event_result) = result;
    }

    pub fn add_action_result(&self) -> EventAndActionResult {
        *lock(&self.add_action_result)
    }

    pub fn set_add_action_result(&self, result: EventAndActionResult) {
        *lock(&self.add_action_result) = result;
    }

    pub fn evaluated_expression(&self) -> EvaluatedExpression {
        *lock(&self.evaluated_expression)
    }

    pub fn set_evaluated_expression(&self, value: u64, status: KernelStatus) {
        *lock(&self.evaluated_expression) = EvaluatedExpression { value, status };
    }

    /// Forget everything learned from the previous debuggee
    pub fn reset(&self) {
        self.set_connected(false);
        self.set_running(false);
        self.set_ignore_new_logging_messages(false);
        self.set_kernel_base_address(0);
        self.current_core.store(0, Ordering::SeqCst);
        self.set_shared_event_status(false);
        lock(&self.os_name).clear();
        *lock(&self.current_instruction) = CurrentInstruction::default();
        *lock(&self.last_pause) = None;
        *lock(&self.register_event_result) = EventAndActionResult::default();
        *lock(&self.add_action_result) = EventAndActionResult::default();
        *lock(&self.evaluated_expression) = EvaluatedExpression::default();
    }
}
