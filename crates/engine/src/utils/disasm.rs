// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! EVM bytecode disassembly utilities
//!
//! Solc source maps carry one entry per instruction, not per byte, so a program
//! counter from a trace must first be turned into an instruction index. PUSH1..PUSH32
//! immediates occupy bytes that are not instructions of their own and are skipped.

use alloy_primitives::Bytes;
use rdb_common::OpcodeTr;
use revm::bytecode::opcode::OpCode;

/// A single disassembled instruction with its associated data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyInstruction {
    /// Program counter offset where this instruction starts
    pub pc: usize,
    /// Raw opcode byte, which may not be a defined opcode
    pub opcode: u8,
    /// For PUSHX instructions, the immediate bytes actually present in the code
    pub push_data: Bytes,
}

impl DisassemblyInstruction {
    /// Decoded opcode, `None` for undefined bytes
    pub fn op(&self) -> Option<OpCode> {
        OpCode::new(self.opcode)
    }

    /// Check if this instruction is a PUSH instruction
    pub fn is_push(&self) -> bool {
        self.push_size() > 0
    }

    /// Size of the immediate operand, 0 for non-PUSH instructions
    pub fn push_size(&self) -> usize {
        self.op().map_or(0, |op| op.immediate_size())
    }

    /// Total instruction size (opcode + immediate data)
    pub fn instruction_size(&self) -> usize {
        1 + self.push_size()
    }
}

/// Disassemble EVM bytecode
///
/// Truncated PUSH data at the end of the code is kept as-is (shorter than the
/// declared width) since the bytes after it do not exist.
pub fn disassemble(bytecode: &[u8]) -> Vec<DisassemblyInstruction> {
    let mut instructions = Vec::new();
    let mut pc = 0;

    while pc < bytecode.len() {
        let opcode = bytecode[pc];
        let push_size = OpCode::new(opcode).map_or(0, |op| op.immediate_size());
        let data_end = (pc + 1 + push_size).min(bytecode.len());

        instructions.push(DisassemblyInstruction {
            pc,
            opcode,
            push_data: Bytes::copy_from_slice(&bytecode[pc + 1..data_end]),
        });
        pc += 1 + push_size;
    }

    instructions
}

/// Program counter to instruction index table for one piece of bytecode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionIndex {
    /// Indexed by pc; `None` for bytes inside PUSH immediates
    by_pc: Vec<Option<usize>>,
    count: usize,
}

impl InstructionIndex {
    /// Build the table by walking the code once
    pub fn new(bytecode: &[u8]) -> Self {
        let mut by_pc = vec![None; bytecode.len()];
        let mut count = 0;
        for instruction in disassemble(bytecode) {
            by_pc[instruction.pc] = Some(count);
            count += 1;
        }
        Self { by_pc, count }
    }

    /// Instruction index of the instruction starting at `pc`
    ///
    /// Returns `None` when `pc` is past the code or points into PUSH data.
    pub fn instruction_at(&self, pc: usize) -> Option<usize> {
        self.by_pc.get(pc).copied().flatten()
    }

    /// Number of instructions in the code
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the code holds no instruction
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Strip the trailing CBOR metadata section appended by solc
///
/// The last two bytes encode the big-endian length of the CBOR payload that precedes
/// them. Code whose trailer does not describe a plausible CBOR map is returned as is.
pub fn strip_metadata(code: &[u8]) -> &[u8] {
    let Some(split) = code.len().checked_sub(2) else {
        return code;
    };
    let cbor_len = u16::from_be_bytes([code[split], code[split + 1]]) as usize;
    let Some(start) = split.checked_sub(cbor_len) else {
        return code;
    };

    // CBOR maps with up to 23 entries start with 0xa0 | n
    match code.get(start) {
        Some(first) if cbor_len > 0 && (0xa1..=0xb7).contains(first) => &code[..start],
        _ => code,
    }
}

/// Whether two runtime codes were produced from the same compiled contract
///
/// Deployed code may differ from the compiler output in its metadata section only.
pub fn same_runtime_code(deployed: &[u8], compiled: &[u8]) -> bool {
    !compiled.is_empty() && strip_metadata(deployed) == strip_metadata(compiled)
}
