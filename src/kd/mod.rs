//! Kernel Debugger - Remote Session
//!
//! The debugger side of the link: a dispatcher thread that turns packets
//! from the debuggee into state changes and wakes requesters, plus the
//! requester API and the small user-mode listener that runs on the
//! debuggee.

pub mod client;
pub mod debuggee;
pub mod events;
pub mod handlers;
pub mod listener;
pub mod pausing;
pub mod simulator;
pub mod state;
pub mod tracking;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::KdConfig;
use crate::disasm::{CapstoneDisassembler, Disassembler};
use crate::protocol::payload::ModuleSymbolDetail;
use crate::protocol::{KernelStatus, RemotePacket};
use crate::signals::SignalTable;
use crate::transport::{Transport, TransportError};
use crate::ui::DisplaySink;

pub use client::{response_for, ClientError, KernelDebugger};
pub use debuggee::{DebuggeeExit, DebuggeeListener, KernelAgent, PauseControl};
pub use events::{EventRegistry, DEBUGGER_EVENT_TAG_START_SEED};
pub use listener::{spawn_listener, DebuggerListener, ListenerError, ListenerState};
pub use simulator::SimulatedDebuggee;
pub use state::SharedState;
pub use tracking::CallTracker;

/// Symbol loading, driven by the debuggee's module list
pub trait SymbolService: Send + Sync {
    /// Reload symbols once the debuggee finished building its module list
    fn initial_reload(&self, kernel_base: u64);

    /// One module entry of the debuggee's symbol table
    fn update_symbol_table(&self, detail: &ModuleSymbolDetail, index: u32, total: u32);
}

/// Symbol service that only records what it is told in the log
#[derive(Debug, Default)]
pub struct LoggingSymbols;

impl SymbolService for LoggingSymbols {
    fn initial_reload(&self, kernel_base: u64) {
        log::info!("Symbol reload requested (kernel base {:#x})", kernel_base);
    }

    fn update_symbol_table(&self, detail: &ModuleSymbolDetail, index: u32, total: u32) {
        log::debug!(
            "Symbol table entry {}/{}: {} at {:#x} ({})",
            index + 1,
            total,
            detail.module_name,
            detail.base_address,
            detail.pdb_file_path
        );
    }
}

/// Consumer of debuggee log messages (e.g. a file or a socket)
pub trait OutputForwarder: Send + Sync {
    /// Returns `true` when the message was consumed
    fn forward(&self, operation_code: u32, message: &str) -> bool;
}

/// Everything the session talks to outside of itself
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub display: Arc<dyn DisplaySink>,
    pub disassembler: Arc<dyn Disassembler>,
    pub symbols: Arc<dyn SymbolService>,
    pub forwarder: Option<Arc<dyn OutputForwarder>>,
}

impl Collaborators {
    pub fn new(transport: Arc<dyn Transport>, display: Arc<dyn DisplaySink>) -> Self {
        Self {
            transport,
            display,
            disassembler: Arc::new(CapstoneDisassembler::new()),
            symbols: Arc::new(LoggingSymbols),
            forwarder: None,
        }
    }

    pub fn with_disassembler(mut self, disassembler: Arc<dyn Disassembler>) -> Self {
        self.disassembler = disassembler;
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolService>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn OutputForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }
}

/// One debugging session, shared by the dispatcher and requesters
pub struct KdContext {
    pub config: KdConfig,
    pub state: SharedState,
    pub signals: SignalTable,
    events: Mutex<EventRegistry>,
    tracker: Mutex<CallTracker>,
    collab: Collaborators,
}

impl KdContext {
    pub fn new(config: KdConfig, collab: Collaborators) -> Self {
        let events = EventRegistry::new(config.event_tag_seed);
        Self {
            config,
            state: SharedState::new(),
            signals: SignalTable::new(),
            events: Mutex::new(events),
            tracker: Mutex::new(CallTracker::new()),
            collab,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.collab.transport.as_ref()
    }

    pub fn disassembler(&self) -> &dyn Disassembler {
        self.collab.disassembler.as_ref()
    }

    pub fn symbols(&self) -> &dyn SymbolService {
        self.collab.symbols.as_ref()
    }

    pub fn forwarder(&self) -> Option<&dyn OutputForwarder> {
        self.collab.forwarder.as_deref()
    }

    pub fn events(&self) -> MutexGuard<'_, EventRegistry> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tracker(&self) -> MutexGuard<'_, CallTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn show(&self, text: &str) {
        self.collab.display.show(text);
    }

    /// `err, <description>` for a failed kernel status
    pub fn show_error(&self, status: KernelStatus) {
        self.show(&format!("err, {}", status.describe()));
    }

    /// Frame and send a packet to the debuggee
    pub fn send(&self, packet: &RemotePacket) -> Result<(), TransportError> {
        let buf = packet.encode();
        log::trace!("Sending {} bytes: {}", buf.len(), hex::encode(&buf));
        self.transport().send_framed(&buf)
    }
}
