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

//! Call frames reconstructed from a trace's depth markers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ExecutingAddress;

/// Call frame identifier: the frame's position in entry order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallFrameId(pub usize);

impl fmt::Display for CallFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One call frame of a replayed trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Identifier of this frame
    pub id: CallFrameId,
    /// Frame that opened this one (`None` for the root frame)
    pub parent: Option<CallFrameId>,
    /// Nesting level (0 = top level)
    pub depth: usize,
    /// Address whose code runs in the frame
    pub address: ExecutingAddress,
    /// First step executed inside the frame
    pub entered_at: usize,
    /// First step executed after the frame returned, `None` if it never returns
    /// within the trace
    pub exited_at: Option<usize>,
}

impl CallFrame {
    /// Whether the given step executes inside this frame or one of its children
    pub fn contains(&self, step: usize) -> bool {
        step >= self.entered_at && self.exited_at.is_none_or(|exit| step < exit)
    }
}
