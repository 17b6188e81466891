//! Call/ret tracking while instrumentation-stepping

use crate::disasm::{format_address, DisassembledInstruction};

/// Follows the call depth of the stepped thread
#[derive(Debug, Default)]
pub struct CallTracker {
    /// Return addresses of calls not returned from yet
    frames: Vec<u64>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Feed one executed instruction; returns a line to show for calls and returns
    pub fn handle_instruction(&mut self, inst: &DisassembledInstruction) -> Option<String> {
        let indent = "  ".repeat(self.frames.len());

        if inst.is_call {
            let return_address = inst.address.wrapping_add(inst.length as u64);
            self.frames.push(return_address);
            let target = inst
                .target_address
                .map(format_address)
                .unwrap_or_else(|| inst.mnemonic.trim_start_matches("call ").to_string());
            return Some(format!("{}{} call {}", indent, format_address(inst.address), target));
        }

        if inst.is_ret {
            // a ret without a tracked call leaves the depth at zero
            self.frames.pop();
            let indent = "  ".repeat(self.frames.len());
            return Some(format!("{}{} ret", indent, format_address(inst.address)));
        }

        None
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::{Bitness, CapstoneDisassembler, Disassembler};

    fn first(bytes: &[u8], address: u64) -> DisassembledInstruction {
        CapstoneDisassembler::new()
            .disassemble(bytes, address, Bitness::Bit64)
            .remove(0)
    }

    #[test]
    fn test_nested_calls() {
        let mut tracker = CallTracker::new();

        let call = first(&[0xE8, 0x00, 0x01, 0x00, 0x00], 0x1000);
        let ret = first(&[0xC3], 0x1105);
        let nop = first(&[0x90], 0x1105);

        let line = tracker.handle_instruction(&call).unwrap();
        assert!(line.contains("call 00000000`00001105"));
        assert_eq!(tracker.depth(), 1);

        assert_eq!(tracker.handle_instruction(&nop), None);

        let line = tracker.handle_instruction(&ret).unwrap();
        assert!(line.ends_with("ret"));
        assert_eq!(tracker.depth(), 0);

        // unmatched ret
        tracker.handle_instruction(&ret);
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn test_memory_indirect_call_is_tracked() {
        let mut tracker = CallTracker::new();

        // call qword ptr [rip + 0x10]
        let call = first(&[0xFF, 0x15, 0x10, 0x00, 0x00, 0x00], 0x2000);
        assert_eq!(call.length, 6);

        let line = tracker.handle_instruction(&call).unwrap();
        assert_eq!(tracker.depth(), 1);
        assert!(line.contains("qword ptr [rip + 0x10]"));

        tracker.handle_instruction(&first(&[0xC3], 0x3000));
        assert_eq!(tracker.depth(), 0);
    }
}
