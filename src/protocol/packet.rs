//! Remote packet envelope
//!
//! ```text
//! offset 0        indicator (u8)
//! offset 1        packet type (u8)
//! offset 2..4     requested action (u16, little-endian)
//! offset 4..N-1   payload
//! offset N-1      checksum (wrapping sum of bytes [1, N-2])
//! ```

use thiserror::Error;

use super::checksum::{compute_checksum, packet_checksum};

/// Marker byte that starts every packet of this protocol
pub const PACKET_INDICATOR: u8 = 0x7E;

/// Indicator + type + action
pub const HEADER_SIZE: usize = 4;

/// Smallest well-formed packet: header plus checksum, no payload
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + 1;

/// Largest buffer a transport is expected to deliver
pub const MAX_SERIAL_PACKET_SIZE: usize = 0x20000;

/// Defines a wire enum with a fixed numeric code per variant.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ty {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code, )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Numeric code on the wire
            pub fn code(self) -> $repr {
                self as $repr
            }

            /// Variant for a wire code, if known
            pub fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// Direction of a packet, checked against the receiver's role
    pub enum PacketType: u8 {
        DebuggeeToDebugger = 1,
        /// Debugger to debuggee, executed by the kernel-mode agent
        DebuggerToDebuggeeExecuteOnVmxRoot = 2,
        /// Debugger to debuggee, executed by the user-mode listener
        DebuggerToDebuggeeExecuteOnUserMode = 3,
    }
}

wire_enum! {
    /// Semantic meaning of a packet's payload
    pub enum RequestedAction: u16 {
        // debugger -> debuggee (user mode)
        UserModePause = 0x0101,
        UserModeDoNotReadAnyPacket = 0x0102,

        // debugger -> debuggee (kernel mode)
        ModeContinue = 0x0201,
        ModeStep = 0x0202,
        ModeCloseAndUnloadDebuggee = 0x0203,
        ModeChangeCore = 0x0204,
        ModeFlushBuffers = 0x0205,
        ModeCallstack = 0x0206,
        ModeTestQuery = 0x0207,
        ModeRunScript = 0x0208,
        ModeSearchQuery = 0x0209,
        ModeRegisterEvent = 0x020A,
        ModeAddActionToEvent = 0x020B,
        ModeQueryAndModifyEvent = 0x020C,
        ModeReadRegisters = 0x020D,
        ModeWriteRegister = 0x020E,
        ModeReadMemory = 0x020F,
        ModeEditMemory = 0x0210,
        ModeBp = 0x0211,
        ModeListOrModifyBreakpoints = 0x0212,
        ModeSymbolReload = 0x0213,
        ModeQueryPa2vaAndVa2pa = 0x0214,
        ModeQueryPte = 0x0215,
        ModeSetShortCircuitingState = 0x0216,
        ModeInjectPageFault = 0x0217,
        ModeChangeProcess = 0x0218,
        ModeChangeThread = 0x0219,
        ModeApicRequest = 0x021A,
        ModeQueryIdtEntries = 0x021B,
        ModeQueryPcitree = 0x021C,
        ModeQueryPcidevinfo = 0x021D,

        // debuggee -> debugger
        PingAndSendSupportedVersion = 0x0301,
        DebuggeeStarted = 0x0302,
        DebuggeeLoggingMechanism = 0x0303,
        DebuggeePausedAndCurrentInstruction = 0x0304,
        DebuggeeResultOfChangingCore = 0x0305,
        DebuggeeResultOfChangingProcess = 0x0306,
        DebuggeeReloadSearchQuery = 0x0307,
        DebuggeeResultOfChangingThread = 0x0308,
        DebuggeeResultOfFlush = 0x0309,
        DebuggeeResultOfCallstack = 0x030A,
        DebuggeeResultTestQuery = 0x030B,
        DebuggeeResultOfRunningScript = 0x030C,
        DebuggeeResultOfFormats = 0x030D,
        DebuggeeResultOfRegisteringEvent = 0x030E,
        DebuggeeResultOfAddingActionToEvent = 0x030F,
        DebuggeeResultOfQueryAndModifyEvent = 0x0310,
        DebuggeeReloadSymbolFinished = 0x0311,
        DebuggeeResultOfReadingRegisters = 0x0312,
        DebuggeeResultOfWriteRegister = 0x0313,
        DebuggeeResultOfApicRequests = 0x0314,
        DebuggeeResultOfQueryIdtEntries = 0x0315,
        DebuggeeResultOfReadingMemory = 0x0316,
        DebuggeeResultOfEditingMemory = 0x0317,
        DebuggeeResultOfBp = 0x0318,
        DebuggeeResultOfShortCircuitingState = 0x0319,
        DebuggeeResultOfPte = 0x031A,
        DebuggeeResultOfBringingPagesIn = 0x031B,
        DebuggeeResultOfVa2paAndPa2va = 0x031C,
        DebuggeeResultOfListOrModifyBreakpoints = 0x031D,
        DebuggeeUpdateSymbolInfo = 0x031E,
        DebuggeeResultOfPcitree = 0x031F,
        DebuggeeResultOfPcidevinfo = 0x0320,
    }
}

impl RequestedAction {
    /// Whether this action travels from the debuggee to the debugger
    pub fn is_debuggee_to_debugger(self) -> bool {
        self.code() >= 0x0300
    }
}

/// Framing errors; all of them are recoverable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer of {len} bytes is too short for a packet")]
    TooShort { len: usize },

    #[error("Invalid packet indicator {found:#04x}")]
    BadIndicator { found: u8 },

    #[error("Checksum is invalid (received {received:#04x}, computed {computed:#04x})")]
    ChecksumMismatch { received: u8, computed: u8 },

    #[error("Unexpected packet type {found:#04x} (expected {expected:?})")]
    UnexpectedType { expected: PacketType, found: u8 },
}

/// Result of classifying one received buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The remote end closed the connection
    Closed,
    /// A packet that passed every integrity check
    Packet(RemotePacket),
}

/// A validated packet with its raw action code and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePacket {
    pub packet_type: PacketType,
    /// Raw action code; unknown codes survive framing and are reported by the dispatcher
    pub action_code: u16,
    pub payload: Vec<u8>,
}

impl RemotePacket {
    pub fn new(packet_type: PacketType, action: RequestedAction, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            action_code: action.code(),
            payload,
        }
    }

    pub fn action(&self) -> Option<RequestedAction> {
        RequestedAction::from_code(self.action_code)
    }

    /// Serialize into a framed buffer with its checksum
    pub fn encode(&self) -> Vec<u8> {
        encode_raw(self.packet_type.code(), self.action_code, &self.payload)
    }
}

/// Build a framed buffer from raw parts
pub fn encode_raw(packet_type: u8, action_code: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MIN_PACKET_SIZE + payload.len());
    buf.push(PACKET_INDICATOR);
    buf.push(packet_type);
    buf.extend_from_slice(&action_code.to_le_bytes());
    buf.extend_from_slice(payload);
    let checksum = compute_checksum(&buf[1..]);
    buf.push(checksum);
    buf
}

/// Whether a received buffer signals that the remote end went away
pub fn is_close_signal(buf: &[u8]) -> bool {
    buf.is_empty() || (buf.len() == 1 && buf[0] == 0)
}

/// Validate a received buffer for a receiver that expects `expected` packets
///
/// Checks run in order: close signal, indicator, checksum, packet type.
pub fn classify(buf: &[u8], expected: PacketType) -> Result<Received, FrameError> {
    if is_close_signal(buf) {
        return Ok(Received::Closed);
    }

    if buf[0] != PACKET_INDICATOR {
        return Err(FrameError::BadIndicator { found: buf[0] });
    }

    if buf.len() < MIN_PACKET_SIZE {
        return Err(FrameError::TooShort { len: buf.len() });
    }

    let received = buf[buf.len() - 1];
    let computed = packet_checksum(buf).unwrap_or_default();
    if received != computed {
        return Err(FrameError::ChecksumMismatch { received, computed });
    }

    let found = buf[1];
    if found != expected.code() {
        return Err(FrameError::UnexpectedType { expected, found });
    }

    Ok(Received::Packet(RemotePacket {
        packet_type: expected,
        action_code: u16::from_le_bytes([buf[2], buf[3]]),
        payload: buf[HEADER_SIZE..buf.len() - 1].to_vec(),
    }))
}
