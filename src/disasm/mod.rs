pub mod engine;
pub mod stub;

pub use engine::{
    format_address, format_listing, Bitness, CapstoneDisassembler, DisasmError,
    DisassembledInstruction, Disassembler,
};
pub use stub::StubDisassembler;
