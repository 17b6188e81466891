//! Disassembly Engine - Capstone Backend
//!
//! Renders the instruction window sent with every pause and feeds the
//! call/ret tracker. Falls back to the stub decoder if Capstone fails.

use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use thiserror::Error;

use super::stub::StubDisassembler;

/// Disassembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisasmError {
    #[error("Buffer too small")]
    BufferTooSmall,

    #[error("Truncated instruction at {address:#x} (needs {needed} bytes)")]
    Truncated { address: u64, needed: usize },

    #[error("Capstone error: {0}")]
    Capstone(String),
}

impl From<capstone::Error> for DisasmError {
    fn from(err: capstone::Error) -> Self {
        DisasmError::Capstone(err.to_string())
    }
}

/// Target architecture bitness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bitness {
    Bit32 = 32,
    #[default]
    Bit64 = 64,
}

impl Bitness {
    pub fn from_32bit_flag(is_32bit: bool) -> Self {
        if is_32bit {
            Bitness::Bit32
        } else {
            Bitness::Bit64
        }
    }

    fn mode(self) -> capstone::arch::x86::ArchMode {
        match self {
            Bitness::Bit32 => capstone::arch::x86::ArchMode::Mode32,
            Bitness::Bit64 => capstone::arch::x86::ArchMode::Mode64,
        }
    }
}

/// A single disassembled instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledInstruction {
    /// Address of the instruction
    pub address: u64,

    /// Raw bytes of the instruction
    pub bytes: Vec<u8>,

    /// Formatted instruction string
    pub mnemonic: String,

    /// Length of the instruction in bytes
    pub length: usize,

    pub is_branch: bool,

    pub is_call: bool,

    pub is_ret: bool,

    /// Branch/call target address (if applicable)
    pub target_address: Option<u64>,
}

/// Turns raw instruction bytes into text
pub trait Disassembler: Send + Sync {
    fn disassemble(&self, bytes: &[u8], address: u64, bitness: Bitness)
        -> Vec<DisassembledInstruction>;

    /// Length of the first instruction in `bytes`
    fn instruction_length(&self, bytes: &[u8], bitness: Bitness) -> Option<usize> {
        self.disassemble(bytes, 0, bitness)
            .first()
            .map(|inst| inst.length)
    }

    /// Render instructions for the console
    fn format_listing(&self, instructions: &[DisassembledInstruction]) -> String {
        format_listing(instructions)
    }
}

/// x86/x64 decoding through Capstone
///
/// A `Capstone` handle is not `Send`, so one is built per call.
#[derive(Debug, Default, Clone)]
pub struct CapstoneDisassembler;

impl CapstoneDisassembler {
    pub fn new() -> Self {
        Self
    }

    fn engine(bitness: Bitness) -> Result<Capstone, DisasmError> {
        let mut cs = Capstone::new()
            .x86()
            .mode(bitness.mode())
            .detail(true)
            .build()?;

        // Invalid bytes come out as data instead of ending the window
        cs.set_skipdata(true)?;

        Ok(cs)
    }

    /// Disassemble `bytes` starting at `address`
    pub fn try_disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Result<Vec<DisassembledInstruction>, DisasmError> {
        if bytes.is_empty() {
            return Err(DisasmError::BufferTooSmall);
        }

        let cs = Self::engine(bitness)?;
        let insns = cs.disasm_all(bytes, address)?;

        let result = insns
            .iter()
            .map(|insn| {
                let name = insn.mnemonic().unwrap_or("???");
                let operands = insn.op_str().unwrap_or("");

                let (is_call, is_ret, is_branch, target_address) = match cs.insn_detail(&insn) {
                    Ok(detail) => {
                        let has = |group: u8| detail.groups().any(|g| g.0 == group);
                        let is_call = has(capstone::InsnGroupType::CS_GRP_CALL as u8);
                        let is_ret = has(capstone::InsnGroupType::CS_GRP_RET as u8);
                        let is_branch = has(capstone::InsnGroupType::CS_GRP_JUMP as u8);

                        let target = if is_call || is_branch {
                            detail
                                .arch_detail()
                                .operands()
                                .into_iter()
                                .find_map(|op| match op {
                                    ArchOperand::X86Operand(op) => match op.op_type {
                                        X86OperandType::Imm(imm) => Some(imm as u64),
                                        _ => None,
                                    },
                                    _ => None,
                                })
                        } else {
                            None
                        };
                        (is_call, is_ret, is_branch, target)
                    }
                    Err(_) => {
                        // Fallback heuristic if detail fails
                        let is_call = name.starts_with("call");
                        let is_ret = name.starts_with("ret");
                        (is_call, is_ret, name.starts_with('j'), None)
                    }
                };

                DisassembledInstruction {
                    address: insn.address(),
                    bytes: insn.bytes().to_vec(),
                    mnemonic: format!("{} {}", name, operands).trim_end().to_string(),
                    length: insn.bytes().len(),
                    is_branch,
                    is_call,
                    is_ret,
                    target_address,
                }
            })
            .collect();

        Ok(result)
    }
}

impl Disassembler for CapstoneDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Vec<DisassembledInstruction> {
        match self.try_disassemble(bytes, address, bitness) {
            Ok(instructions) => instructions,
            Err(DisasmError::BufferTooSmall) => Vec::new(),
            Err(e) => {
                log::warn!("Capstone unavailable ({}), using stub decoder", e);
                StubDisassembler::new().disassemble(bytes, address, bitness)
            }
        }
    }
}

/// Format instructions as a listing (for display)
pub fn format_listing(instructions: &[DisassembledInstruction]) -> String {
    let mut output = String::new();

    for inst in instructions {
        let bytes_str = hex::encode_upper(&inst.bytes);
        output.push_str(&format!(
            "{}  {:24}  {}\n",
            format_address(inst.address),
            bytes_str,
            inst.mnemonic
        ));
    }

    output
}

/// `fffff800`12345678` style address
pub fn format_address(address: u64) -> String {
    format!("{:08x}`{:08x}", address >> 32, address & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_rel32_target() {
        let insts = CapstoneDisassembler::new()
            .try_disassemble(&[0xE8, 0x10, 0x00, 0x00, 0x00], 0x1000, Bitness::Bit64)
            .unwrap();

        assert_eq!(insts.len(), 1);
        assert!(insts[0].is_call);
        assert_eq!(insts[0].length, 5);
        assert_eq!(insts[0].target_address, Some(0x1015));
    }

    #[test]
    fn test_rip_relative_indirect_call() {
        // call qword ptr [rip + 0x10]
        let insts = CapstoneDisassembler::new()
            .try_disassemble(&[0xFF, 0x15, 0x10, 0x00, 0x00, 0x00], 0x1000, Bitness::Bit64)
            .unwrap();

        let call = &insts[0];
        assert!(call.is_call);
        assert!(!call.is_ret);
        assert_eq!(call.length, 6);
        assert_eq!(call.target_address, None);
        assert!(call.mnemonic.starts_with("call"));
    }

    #[test]
    fn test_instruction_length_of_mov() {
        // mov rax, qword ptr [rip + 0x1000]
        let bytes = [0x48, 0x8B, 0x05, 0x00, 0x10, 0x00, 0x00, 0xC3];
        let disasm = CapstoneDisassembler::new();

        assert_eq!(disasm.instruction_length(&bytes, Bitness::Bit64), Some(7));
        let insts = disasm.disassemble(&bytes, 0, Bitness::Bit64);
        assert_eq!(insts.len(), 2);
        assert!(insts[1].is_ret);
    }

    #[test]
    fn test_conditional_jump_is_branch() {
        // je +0x10
        let insts = CapstoneDisassembler::new()
            .try_disassemble(&[0x74, 0x10], 0x2000, Bitness::Bit32)
            .unwrap();

        assert!(insts[0].is_branch);
        assert!(!insts[0].is_call);
        assert_eq!(insts[0].target_address, Some(0x2012));
    }

    #[test]
    fn test_empty_window() {
        let disasm = CapstoneDisassembler::new();
        assert_eq!(
            disasm.try_disassemble(&[], 0, Bitness::Bit64),
            Err(DisasmError::BufferTooSmall)
        );
        assert!(disasm.disassemble(&[], 0, Bitness::Bit64).is_empty());
        assert_eq!(disasm.instruction_length(&[], Bitness::Bit64), None);
    }

    #[test]
    fn test_listing() {
        let disasm = CapstoneDisassembler::new();
        let insts = disasm.disassemble(&[0x55, 0xCC, 0xC3], 0xFFFF_F800_0000_1000, Bitness::Bit64);
        let listing = disasm.format_listing(&insts);

        assert_eq!(insts.len(), 3);
        assert!(listing.starts_with("fffff800`00001000  55"));
        assert!(listing.contains("int3"));
        assert!(listing.contains("ret"));
    }
}
