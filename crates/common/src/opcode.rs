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

use revm::bytecode::OpCode;

/// Extended trait for classifying EVM opcodes while replaying a trace
///
/// Frame tracking only cares about which instructions may open a new call
/// frame and about instruction widths when walking raw bytecode.
pub trait OpcodeTr {
    /// Check if this opcode transfers control to another contract's code
    ///
    /// Returns `true` for CALL, CALLCODE, DELEGATECALL and STATICCALL. In all four
    /// cases the code that runs in the new frame is the code at the call's target
    /// argument.
    ///
    /// # Example
    /// ```rust
    /// use revm::bytecode::OpCode;
    /// use rdb_common::OpcodeTr;
    ///
    /// assert!(OpCode::DELEGATECALL.is_message_call());
    /// assert!(!OpCode::CREATE.is_message_call());
    /// ```
    fn is_message_call(&self) -> bool;

    /// Check if this opcode runs init code in a new frame (CREATE, CREATE2)
    fn is_create(&self) -> bool;

    /// Check if this opcode may open a new call frame
    fn enters_frame(&self) -> bool {
        self.is_message_call() || self.is_create()
    }

    /// Number of immediate bytes following the opcode (PUSH1..PUSH32)
    fn immediate_size(&self) -> usize;
}

impl OpcodeTr for OpCode {
    fn is_message_call(&self) -> bool {
        matches!(*self, Self::CALL | Self::CALLCODE | Self::DELEGATECALL | Self::STATICCALL)
    }

    fn is_create(&self) -> bool {
        matches!(*self, Self::CREATE | Self::CREATE2)
    }

    fn immediate_size(&self) -> usize {
        let byte = self.get();
        if (0x60..=0x7f).contains(&byte) {
            (byte - 0x5f) as usize
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_opcodes() {
        assert!(OpCode::CALL.enters_frame());
        assert!(OpCode::STATICCALL.enters_frame());
        assert!(OpCode::CREATE2.enters_frame());
        assert!(!OpCode::JUMP.enters_frame());
        assert!(!OpCode::SELFDESTRUCT.enters_frame());
    }

    #[test]
    fn test_immediate_size() {
        assert_eq!(OpCode::PUSH1.immediate_size(), 1);
        assert_eq!(OpCode::PUSH32.immediate_size(), 32);
        assert_eq!(OpCode::PUSH0.immediate_size(), 0);
        assert_eq!(OpCode::ADD.immediate_size(), 0);
    }
}
