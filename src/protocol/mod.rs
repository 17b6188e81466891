//! Remote Protocol - Packet Framing & Payload Schemas
//!
//! Wire envelope, checksum, kernel status codes and the typed payloads
//! exchanged between the debugger and the debuggee.

pub mod checksum;
pub mod codec;
pub mod packet;
pub mod payload;
pub mod status;

#[cfg(test)]
mod tests;

pub use checksum::{compute_checksum, packet_checksum, verify_packet};
pub use codec::{ByteReader, ByteWriter, DecodeError};
pub use packet::{
    classify, encode_raw, is_close_signal, FrameError, PacketType, Received, RemotePacket,
    RequestedAction, MAX_SERIAL_PACKET_SIZE, PACKET_INDICATOR,
};
pub use payload::{DebuggeeMessage, PausedPacket, PausingReason, WirePayload};
pub use status::KernelStatus;
