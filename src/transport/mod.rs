//! Transport Layer
//!
//! Byte-oriented channels that deliver whole framed packets. The dispatcher
//! only sees complete buffers; an empty buffer means the remote end closed.

pub mod memory;
pub mod stream;

use thiserror::Error;

pub use memory::MemoryTransport;
pub use stream::{StreamTransport, END_OF_BUFFER_SIGNATURE};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection is closed")]
    Closed,

    #[error("Received buffer of {len} bytes exceeds the maximum of {max}")]
    Oversized { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bidirectional channel carrying framed packets
pub trait Transport: Send + Sync {
    /// Block until one framed buffer arrives
    ///
    /// An empty buffer is returned once the peer has gone away.
    fn receive_framed(&self) -> Result<Vec<u8>, TransportError>;

    /// Send one framed buffer
    fn send_framed(&self, buf: &[u8]) -> Result<(), TransportError>;

    /// Tear down the channel; further sends fail
    fn close(&self) {}
}
