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

use alloy_primitives::{Address, Bytes};
use revm::bytecode::OpCode;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    ops::{Deref, DerefMut},
};

use crate::OpcodeTr;

/// Where a piece of init code being executed came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CreationSite {
    /// The transaction itself deploys a contract (no `to` field)
    Transaction,
    /// A CREATE/CREATE2 instruction executed at the given step
    Step(usize),
}

/// The address whose code is running in a call frame.
///
/// Init code has no address until it returns, so creation frames are identified by
/// the place that started them instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutingAddress {
    /// Deployed code living at an address
    Contract(Address),
    /// Init code of a contract being created
    Creation(CreationSite),
}

impl ExecutingAddress {
    /// Returns the deployed address, if this is not a creation frame
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Contract(address) => Some(*address),
            Self::Creation(_) => None,
        }
    }

    /// Whether the frame runs init code
    pub fn is_creation(&self) -> bool {
        matches!(self, Self::Creation(_))
    }
}

impl fmt::Display for ExecutingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract(address) => write!(f, "{address}"),
            Self::Creation(CreationSite::Transaction) => {
                write!(f, "(Contract Creation - Transaction)")
            }
            Self::Creation(CreationSite::Step(step)) => {
                write!(f, "(Contract Creation - Step {step})")
            }
        }
    }
}

/// A single executed instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Program counter (byte offset into the running code)
    pub pc: usize,
    /// Raw opcode byte
    pub opcode: u8,
    /// Call depth marker as reported by the tracer
    pub depth: usize,
    /// Code address targeted by a call-family instruction
    pub call_target: Option<Address>,
}

impl Step {
    /// Create a plain step that does not call out
    pub fn new(pc: usize, opcode: u8, depth: usize) -> Self {
        Self { pc, opcode, depth, call_target: None }
    }

    /// Create a call-family step targeting the given code address
    pub fn call(pc: usize, opcode: u8, depth: usize, target: Address) -> Self {
        Self { pc, opcode, depth, call_target: Some(target) }
    }

    /// Decoded opcode, if the byte is a known instruction
    pub fn op(&self) -> Option<OpCode> {
        OpCode::new(self.opcode)
    }

    /// Whether this step hands control to another contract's code
    pub fn is_call(&self) -> bool {
        self.op().is_some_and(|op| op.is_message_call())
    }

    /// Whether this step starts running init code
    pub fn is_create(&self) -> bool {
        self.op().is_some_and(|op| op.is_create())
    }
}

/// A recorded execution trace for one transaction.
///
/// Immutable once handed to a session; a reload replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<Step>,
    /// Target of the outermost frame
    pub root: ExecutingAddress,
    /// Code executed by each frame address known to the provider
    #[serde(with = "bytecode_entries")]
    pub bytecodes: HashMap<ExecutingAddress, Bytes>,
}

// Enum keys cannot be JSON object keys, so the map travels as a list of pairs.
mod bytecode_entries {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        map: &HashMap<ExecutingAddress, Bytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by_key(|(address, _)| **address);
        serializer.collect_seq(entries)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<ExecutingAddress, Bytes>, D::Error> {
        let entries: Vec<(ExecutingAddress, Bytes)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

impl Deref for Trace {
    type Target = Vec<Step>;

    fn deref(&self) -> &Self::Target {
        &self.steps
    }
}

impl DerefMut for Trace {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.steps
    }
}

impl Trace {
    /// Create an empty trace whose top-level frame runs at `root`
    pub fn new(root: ExecutingAddress) -> Self {
        Self { steps: Vec::new(), root, bytecodes: HashMap::new() }
    }

    /// Create a trace from already collected steps
    pub fn with_steps(root: ExecutingAddress, steps: Vec<Step>) -> Self {
        Self { steps, root, bytecodes: HashMap::new() }
    }

    /// Register the code executed by a frame address
    pub fn insert_bytecode(&mut self, address: ExecutingAddress, code: impl Into<Bytes>) {
        self.bytecodes.insert(address, code.into());
    }

    /// Code executed at the given frame address
    pub fn bytecode(&self, address: &ExecutingAddress) -> Option<&Bytes> {
        self.bytecodes.get(address)
    }

    /// Add a step at the end of the trace
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Get the number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the trace has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Convert trace to serde_json::Value
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl IntoIterator for Trace {
    type Item = Step;
    type IntoIter = std::vec::IntoIter<Step>;
    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;
    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_executing_address_display() {
        let addr = address!("1234567890123456789012345678901234567890");
        assert_eq!(
            ExecutingAddress::Contract(addr).to_string(),
            "0x1234567890123456789012345678901234567890"
        );
        assert_eq!(
            ExecutingAddress::Creation(CreationSite::Step(7)).to_string(),
            "(Contract Creation - Step 7)"
        );
        assert!(ExecutingAddress::Creation(CreationSite::Transaction).address().is_none());
    }

    #[test]
    fn test_step_classification() {
        let target = address!("00000000000000000000000000000000000000aa");
        assert!(Step::call(0, 0xf1, 1, target).is_call()); // CALL
        assert!(Step::call(0, 0xf4, 1, target).is_call()); // DELEGATECALL
        assert!(Step::new(0, 0xf0, 1).is_create()); // CREATE
        assert!(Step::new(0, 0xf5, 1).is_create()); // CREATE2
        assert!(!Step::new(0, 0x01, 1).is_call()); // ADD
        assert!(!Step::new(0, 0x0c, 1).is_call()); // unassigned byte
    }

    #[test]
    fn test_trace_serde() {
        let mut trace = Trace::new(ExecutingAddress::Creation(CreationSite::Transaction));
        trace.push(Step::new(0, 0x60, 1));
        trace.insert_bytecode(trace.root, vec![0x60, 0x00]);

        let json = trace.to_json_value().unwrap();
        let back: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.root, trace.root);
        assert_eq!(back.bytecode(&back.root).map(|c| c.len()), Some(2));
    }
}
