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

//! Test fixtures for building synthetic traces and compilations.
//!
//! Traces produced here follow the tracer convention of starting at depth 1.

use alloy_primitives::{address, Address, Bytes};
use revm::bytecode::OpCode;

use crate::types::{
    Breakpoint, CompilationArtifactView, ContractArtifact, ExecutingAddress, SourceFile, Step,
    Trace,
};

/// Address of the fixture token contract
pub const TOKEN: Address = address!("00000000000000000000000000000000000000aa");
/// Address of a second fixture contract
pub const VAULT: Address = address!("00000000000000000000000000000000000000bb");
/// Address of a third fixture contract
pub const LIBRARY: Address = address!("00000000000000000000000000000000000000cc");

/// Source path of the fixture token contract
pub const TOKEN_SOURCE: &str = "contracts/Token.sol";

/// Fluent builder for traces with consistent depth markers
#[derive(Debug)]
pub struct TraceBuilder {
    trace: Trace,
    depth: usize,
}

impl TraceBuilder {
    /// Start a trace whose top-level frame runs `root`
    pub fn new(root: ExecutingAddress) -> Self {
        Self { trace: Trace::new(root), depth: 1 }
    }

    /// Record a plain instruction in the current frame
    pub fn step(mut self, pc: usize, opcode: OpCode) -> Self {
        self.trace.push(Step::new(pc, opcode.get(), self.depth));
        self
    }

    /// Record `count` plain instructions (pc 0, 1, ...) in the current frame
    pub fn steps(mut self, count: usize) -> Self {
        for pc in 0..count {
            self = self.step(pc, OpCode::JUMPDEST);
        }
        self
    }

    /// Record a call-family instruction that enters a frame running `target`
    pub fn call_with(mut self, pc: usize, opcode: OpCode, target: Address) -> Self {
        self.trace.push(Step::call(pc, opcode.get(), self.depth, target));
        self.depth += 1;
        self
    }

    /// Record a CALL that enters a frame running `target`
    pub fn call(self, pc: usize, target: Address) -> Self {
        self.call_with(pc, OpCode::CALL, target)
    }

    /// Record a DELEGATECALL that enters a frame running `target`'s code
    pub fn delegate_call(self, pc: usize, target: Address) -> Self {
        self.call_with(pc, OpCode::DELEGATECALL, target)
    }

    /// Record a call that does not open a frame (precompile, EOA or failed call)
    pub fn flat_call(mut self, pc: usize, target: Address) -> Self {
        self.trace.push(Step::call(pc, OpCode::CALL.get(), self.depth, target));
        self
    }

    /// Record a CREATE that enters an init-code frame
    pub fn create(mut self, pc: usize) -> Self {
        self.trace.push(Step::new(pc, OpCode::CREATE.get(), self.depth));
        self.depth += 1;
        self
    }

    /// Record a RETURN that leaves the current frame
    pub fn ret(mut self, pc: usize) -> Self {
        self.trace.push(Step::new(pc, OpCode::RETURN.get(), self.depth));
        self.depth = self.depth.saturating_sub(1);
        self
    }

    /// Register the code executed by a frame address
    pub fn code(mut self, address: ExecutingAddress, code: impl Into<Bytes>) -> Self {
        self.trace.insert_bytecode(address, code);
        self
    }

    /// Finish the trace
    pub fn build(self) -> Trace {
        self.trace
    }
}

/// Source text of the fixture token: `lines` statements, one per line
pub fn token_source(lines: usize) -> SourceFile {
    let content: String = (0..lines).map(|i| format!("    stmt_{i:02};\n")).collect();
    SourceFile::new(TOKEN_SOURCE, content)
}

/// Compressed source map entry `offset:length:file` for the given row of a source
pub fn map_entry(source: &SourceFile, row: usize, file: u32) -> String {
    let start = source.line_starts()[row];
    let end = source.line_starts().get(row + 1).copied().unwrap_or(source.content.len());
    // Exclude the trailing newline
    format!("{start}:{}:{file}", end - start - 1)
}

/// A 100-step trace and matching compilation in which `Token.sol` row 10 is hit at
/// steps 20, 45 and 80.
///
/// The token runtime code is two JUMPDESTs: the first maps to row 0, the second to
/// row 10. All other steps execute the first instruction.
pub fn breakpoint_fixture() -> (Trace, CompilationArtifactView, Breakpoint) {
    let code = Bytes::from(vec![OpCode::JUMPDEST.get(), OpCode::JUMPDEST.get()]);
    let source = token_source(12);
    let source_map = format!("{};{}", map_entry(&source, 0, 0), map_entry(&source, 10, 0));

    let root = ExecutingAddress::Contract(TOKEN);
    let mut builder = TraceBuilder::new(root).code(root, code.clone());
    for i in 0..100 {
        let pc = if matches!(i, 20 | 45 | 80) { 1 } else { 0 };
        builder = builder.step(pc, OpCode::JUMPDEST);
    }

    let artifact = CompilationArtifactView::new()
        .with_contract(
            "Token",
            ContractArtifact {
                file: TOKEN_SOURCE.into(),
                deployed_bytecode: code,
                deployed_source_map: source_map,
                ..Default::default()
            },
        )
        .with_source(0, source);

    (builder.build(), artifact, Breakpoint::new("Token.sol", 10))
}
