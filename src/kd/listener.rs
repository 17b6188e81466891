//! Dispatcher loop of the debugger
//!
//! Runs on its own thread: receive a framed buffer, validate it, decode the
//! payload once and hand it to the handler registered for its action.
//! Packets are processed strictly in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::protocol::{
    classify, DebuggeeMessage, DecodeError, FrameError, PacketType, Received, RemotePacket,
    RequestedAction,
};
use crate::transport::TransportError;

use super::handlers::{dispatch_table, Handler};
use super::KdContext;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Remote connection is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed payload for action {action:#06x}: {source}")]
    Decode {
        action: u16,
        #[source]
        source: DecodeError,
    },

    #[error("Handler received a message of the wrong kind ({0:?})")]
    UnexpectedMessage(RequestedAction),
}

/// Where the dispatcher is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Dispatching,
    Closed,
}

pub struct DebuggerListener {
    ctx: Arc<KdContext>,
    handlers: HashMap<RequestedAction, Handler>,
    state: ListenerState,
}

impl DebuggerListener {
    pub fn new(ctx: Arc<KdContext>) -> Self {
        Self {
            ctx,
            handlers: dispatch_table(),
            state: ListenerState::Listening,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Receive and dispatch until the connection closes
    pub fn run(&mut self) -> Result<(), ListenerError> {
        self.ctx.state.set_connected(true);
        log::info!("Debugger listener started");

        loop {
            let buf = match self.ctx.transport().receive_framed() {
                Ok(buf) => buf,
                Err(TransportError::Oversized { len, max }) => {
                    log::error!("Discarding {} byte buffer (maximum is {})", len, max);
                    self.ctx.show("err, invalid buffer received");
                    continue;
                }
                Err(e) => {
                    log::error!("Receiving from the debuggee failed: {}", e);
                    self.close();
                    return Err(e.into());
                }
            };

            if !self.process(&buf) {
                return Ok(());
            }
        }
    }

    /// Handle one received buffer
    ///
    /// Returns `false` once the connection is closed.
    pub fn process(&mut self, buf: &[u8]) -> bool {
        log::trace!("Received {} bytes: {}", buf.len(), hex::encode(buf));

        match classify(buf, PacketType::DebuggeeToDebugger) {
            Ok(Received::Closed) => {
                self.close();
                false
            }
            Ok(Received::Packet(packet)) => {
                self.state = ListenerState::Dispatching;
                if let Err(e) = self.dispatch(&packet) {
                    log::error!("{}", e);
                }
                self.state = ListenerState::Listening;
                true
            }
            Err(e) => {
                log::error!("Dropping packet: {}", e);
                let text = match e {
                    FrameError::ChecksumMismatch { .. } => "err, checksum is invalid",
                    FrameError::UnexpectedType { .. } => {
                        "err, unknown packet received from the debuggee"
                    }
                    _ => "err, invalid packet received",
                };
                self.ctx.show(text);
                true
            }
        }
    }

    fn dispatch(&self, packet: &RemotePacket) -> Result<(), ListenerError> {
        let handler = packet
            .action()
            .and_then(|action| self.handlers.get(&action).map(|h| (action, *h)));

        let Some((action, handler)) = handler else {
            log::warn!("Unknown action {:#06x} from the debuggee", packet.action_code);
            self.ctx
                .show("err, unknown packet action received from the debuggee");
            return Ok(());
        };

        let message = DebuggeeMessage::decode(action, &packet.payload)
            .map_err(|source| ListenerError::Decode {
                action: packet.action_code,
                source,
            })?
            .ok_or(ListenerError::UnexpectedMessage(action))?;

        log::debug!("Dispatching {:?} ({} bytes)", action, packet.payload.len());
        handler(&self.ctx, &message, &packet.payload)
    }

    /// Tear down the session after the debuggee went away
    pub fn close(&mut self) {
        if self.state == ListenerState::Closed {
            return;
        }

        if self.ctx.state.is_connected() {
            self.ctx.events().clear_all_and_reset_tags();
        }
        self.ctx.state.set_connected(false);
        self.ctx.state.set_running(false);
        self.ctx.signals.release_all();
        self.ctx.transport().close();

        log::info!("Remote connection closed");
        self.ctx.show("the remote connection is closed");
        self.state = ListenerState::Closed;
    }
}

/// Start the dispatcher on a dedicated thread
pub fn spawn_listener(
    ctx: Arc<KdContext>,
) -> std::io::Result<JoinHandle<Result<(), ListenerError>>> {
    thread::Builder::new()
        .name("kd-listener".to_string())
        .spawn(move || DebuggerListener::new(ctx).run())
}
