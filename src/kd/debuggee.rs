//! Debuggee side of the link
//!
//! While the debuggee runs, a user-mode thread reads the link and waits for
//! the debugger to ask for a break-in. Packets meant for the kernel-mode
//! agent are handed to a [`KernelAgent`] when one is attached.

use std::sync::Arc;

use crate::protocol::{
    classify, DebuggeeMessage, FrameError, PacketType, Received, RemotePacket, RequestedAction,
};
use crate::transport::{Transport, TransportError};
use crate::ui::DisplaySink;

/// Halts the debuggee on request of the debugger
pub trait PauseControl: Send + Sync {
    /// Returns `false` when the debuggee could not be paused
    fn pause_debuggee(&self) -> bool;
}

/// Executes kernel-mode requests and produces the packets to send back
pub trait KernelAgent: Send + Sync {
    fn execute(&self, packet: &RemotePacket) -> Vec<DebuggeeMessage>;
}

/// Why the debuggee listener stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggeeExit {
    ConnectionClosed,
    StopRequested,
}

pub struct DebuggeeListener {
    transport: Arc<dyn Transport>,
    pause: Arc<dyn PauseControl>,
    display: Arc<dyn DisplaySink>,
    agent: Option<Arc<dyn KernelAgent>>,
}

impl DebuggeeListener {
    pub fn new(
        transport: Arc<dyn Transport>,
        pause: Arc<dyn PauseControl>,
        display: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            transport,
            pause,
            display,
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn KernelAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Send one message to the debugger
    pub fn send(&self, message: &DebuggeeMessage) -> Result<(), TransportError> {
        let buf = message.to_packet().encode();
        log::trace!("Debuggee sending {:?}: {}", message.action(), hex::encode(&buf));
        self.transport.send_framed(&buf)
    }

    /// Read packets until the debugger stops us or goes away
    pub fn run(&self) -> Result<DebuggeeExit, TransportError> {
        loop {
            let buf = match self.transport.receive_framed() {
                Ok(buf) => buf,
                Err(TransportError::Oversized { .. }) => {
                    self.display.show(
                        "err, a buffer received in debuggee which exceeds the buffer limitation",
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(exit) = self.process(&buf)? {
                log::info!("Debuggee listener stopped: {:?}", exit);
                return Ok(exit);
            }
        }
    }

    /// Handle one buffer; `Some` when the listener should stop
    pub fn process(&self, buf: &[u8]) -> Result<Option<DebuggeeExit>, TransportError> {
        if buf.is_empty() {
            return Ok(Some(DebuggeeExit::ConnectionClosed));
        }

        // a lone zero byte cancels a pending read on the other side
        if buf == [0] {
            return Ok(None);
        }

        let packet = match classify(buf, PacketType::DebuggerToDebuggeeExecuteOnUserMode) {
            Ok(Received::Packet(packet)) => packet,
            Ok(Received::Closed) => return Ok(Some(DebuggeeExit::ConnectionClosed)),
            Err(FrameError::UnexpectedType { found, .. })
                if found == PacketType::DebuggerToDebuggeeExecuteOnVmxRoot.code() =>
            {
                return self.forward_to_agent(buf);
            }
            Err(FrameError::ChecksumMismatch { .. }) => {
                self.display.show("err checksum is invalid");
                return Ok(None);
            }
            Err(FrameError::UnexpectedType { .. }) => {
                self.display
                    .show("err, unknown packet received from the debugger");
                return Ok(None);
            }
            Err(e) => {
                log::warn!("Ignoring foreign data on the link: {}", e);
                return Ok(None);
            }
        };

        match packet.action() {
            Some(RequestedAction::UserModePause) => {
                if !self.pause.pause_debuggee() {
                    self.display.show(
                        "err, debugger tries to pause the debuggee but the attempt was unsuccessful",
                    );
                }
                Ok(None)
            }
            Some(RequestedAction::UserModeDoNotReadAnyPacket) => {
                Ok(Some(DebuggeeExit::StopRequested))
            }
            _ => {
                self.display
                    .show("err, unknown packet action received from the debugger");
                Ok(None)
            }
        }
    }

    fn forward_to_agent(&self, buf: &[u8]) -> Result<Option<DebuggeeExit>, TransportError> {
        let Some(agent) = &self.agent else {
            log::debug!("No kernel-mode agent attached, dropping kernel request");
            return Ok(None);
        };

        let packet = match classify(buf, PacketType::DebuggerToDebuggeeExecuteOnVmxRoot) {
            Ok(Received::Packet(packet)) => packet,
            _ => return Ok(None),
        };

        for reply in agent.execute(&packet) {
            self.send(&reply)?;
        }

        if packet.action() == Some(RequestedAction::ModeCloseAndUnloadDebuggee) {
            return Ok(Some(DebuggeeExit::StopRequested));
        }
        Ok(None)
    }
}
