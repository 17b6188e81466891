//! Stub decoder for when Capstone is unavailable
//!
//! Only knows the control-flow opcodes the debugger cares about (calls,
//! returns, jumps, int3) and falls back to `db` bytes otherwise.

use super::engine::{Bitness, DisasmError, DisassembledInstruction, Disassembler};

/// Table-driven decoder for control-flow instructions
#[derive(Debug, Default, Clone)]
pub struct StubDisassembler;

impl StubDisassembler {
    pub fn new() -> Self {
        Self
    }

    /// Decode the instruction at the start of `bytes`
    pub fn decode_one(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Result<DisassembledInstruction, DisasmError> {
        let first = *bytes.first().ok_or(DisasmError::BufferTooSmall)?;

        // REX prefixes only exist in long mode
        let prefix =
            if bitness == Bitness::Bit64 && (0x40..=0x4F).contains(&first) && bytes.len() > 1 {
                1
            } else {
                0
            };
        let opcode = bytes[prefix];
        let rest = &bytes[prefix + 1..];

        let rel = |size: usize| -> Result<i64, DisasmError> {
            let raw = rest.get(..size).ok_or(DisasmError::Truncated {
                address,
                needed: prefix + 1 + size,
            })?;
            Ok(match size {
                1 => raw[0] as i8 as i64,
                _ => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
            })
        };

        let (mnemonic, operand_len, kind, target) = match opcode {
            0xC3 => ("ret".to_string(), 0, Kind::Ret, None),
            0xCB => ("retf".to_string(), 0, Kind::Ret, None),
            0xC2 | 0xCA => {
                let imm = rest.get(..2).ok_or(DisasmError::Truncated {
                    address,
                    needed: prefix + 3,
                })?;
                let name = if opcode == 0xC2 { "ret" } else { "retf" };
                (
                    format!("{} {:#x}", name, u16::from_le_bytes([imm[0], imm[1]])),
                    2,
                    Kind::Ret,
                    None,
                )
            }
            0xCC => ("int3".to_string(), 0, Kind::Plain, None),
            0x90 => ("nop".to_string(), 0, Kind::Plain, None),
            0xF4 => ("hlt".to_string(), 0, Kind::Plain, None),
            0x50..=0x57 => (
                format!("push {}", reg_name(opcode - 0x50, bitness)),
                0,
                Kind::Plain,
                None,
            ),
            0x58..=0x5F => (
                format!("pop {}", reg_name(opcode - 0x58, bitness)),
                0,
                Kind::Plain,
                None,
            ),
            0xE8 | 0xE9 => {
                let displacement = rel(4)?;
                let next = address.wrapping_add((prefix + 5) as u64);
                let target = next.wrapping_add(displacement as u64);
                let (name, kind) = if opcode == 0xE8 {
                    ("call", Kind::Call)
                } else {
                    ("jmp", Kind::Jump)
                };
                (format!("{} {:#x}", name, target), 4, kind, Some(target))
            }
            0xEB | 0x70..=0x7F => {
                let displacement = rel(1)?;
                let next = address.wrapping_add((prefix + 2) as u64);
                let target = next.wrapping_add(displacement as u64);
                let name = if opcode == 0xEB {
                    "jmp"
                } else {
                    CONDITIONS[(opcode - 0x70) as usize]
                };
                (format!("{} {:#x}", name, target), 1, Kind::Jump, Some(target))
            }
            0xFF if rest.first().map_or(false, |modrm| is_indirect_call(*modrm)) => {
                // register-indirect forms only; memory operands fall through to db
                let modrm = rest[0];
                (
                    format!("call {}", reg_name(modrm & 0x07, bitness)),
                    1,
                    Kind::Call,
                    None,
                )
            }
            _ => (format!("db {:#04x}", first), 0, Kind::Plain, None),
        };

        let length = if mnemonic.starts_with("db ") {
            1
        } else {
            prefix + 1 + operand_len
        };

        Ok(DisassembledInstruction {
            address,
            bytes: bytes[..length].to_vec(),
            mnemonic,
            length,
            is_branch: kind == Kind::Jump,
            is_call: kind == Kind::Call,
            is_ret: kind == Kind::Ret,
            target_address: target,
        })
    }
}

impl Disassembler for StubDisassembler {
    fn disassemble(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Vec<DisassembledInstruction> {
        let mut instructions = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let current = address.wrapping_add(offset as u64);
            match self.decode_one(&bytes[offset..], current, bitness) {
                Ok(inst) => {
                    offset += inst.length;
                    instructions.push(inst);
                }
                Err(e) => {
                    log::trace!("Stopping disassembly at {:#x}: {}", current, e);
                    break;
                }
            }
        }

        instructions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Plain,
    Call,
    Ret,
    Jump,
}

const CONDITIONS: [&str; 16] = [
    "jo", "jno", "jb", "jae", "je", "jne", "jbe", "ja", "js", "jns", "jp", "jnp", "jl", "jge",
    "jle", "jg",
];

fn is_indirect_call(modrm: u8) -> bool {
    // mod == 11, reg == /2
    modrm >> 6 == 0b11 && (modrm >> 3) & 0x07 == 2
}

fn reg_name(index: u8, bitness: Bitness) -> &'static str {
    const REGS_64: [&str; 8] = ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi"];
    const REGS_32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
    match bitness {
        Bitness::Bit64 => REGS_64[(index & 0x07) as usize],
        Bitness::Bit32 => REGS_32[(index & 0x07) as usize],
    }
}
