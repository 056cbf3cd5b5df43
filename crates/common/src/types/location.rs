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

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte range inside a source file, as encoded in a solc source map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawSourceRange {
    /// Byte offset of the first character
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
}

impl RawSourceRange {
    /// Create a new range
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Offset one past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// 0-based line/column position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineColumn {
    /// 0-based line
    pub line: usize,
    /// 0-based column, in bytes
    pub column: usize,
}

/// Line/column span of a source range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineColumnRange {
    /// Position of the first character
    pub start: LineColumn,
    /// Position one past the last character
    pub end: LineColumn,
}

impl LineColumnRange {
    /// Whether the span starts on the given row
    pub fn starts_on(&self, row: usize) -> bool {
        self.start.line == row
    }
}

/// A resolved position in the active compilation's sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Solc file index
    pub file_id: u32,
    /// Path of the source file
    pub path: PathBuf,
    /// Raw byte range from the source map
    pub range: RawSourceRange,
    /// Line/column translation of `range`
    pub span: LineColumnRange,
}

/// Failure to determine which address executes at a step
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ResolutionError {
    /// Step index past the end of the trace
    #[error("step {index} out of range (trace has {len} steps)")]
    StepOutOfRange {
        /// Requested step
        index: usize,
        /// Number of steps in the trace
        len: usize,
    },
    /// The call-depth markers cannot be replayed into a frame stack
    #[error("trace malformed at step {step}: {reason}")]
    MalformedTrace {
        /// First step that could not be replayed
        step: usize,
        /// What went wrong
        reason: String,
    },
}

/// Why no source location is available for a step
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnresolvedReason {
    /// No compilation is active
    #[error("no compilation artifact available")]
    NoArtifact,
    /// The executing address could not be determined
    #[error("executing address unavailable: {0}")]
    Address(#[from] ResolutionError),
    /// The trace carries no code for the executing address
    #[error("no bytecode recorded for the executing address")]
    NoCode,
    /// No compiled contract matches the executing code
    #[error("no compiled contract matches the executing code")]
    NoMatchingContract,
    /// The instruction has no mapped source range (injected or generated code)
    #[error("instruction has no source mapping")]
    NoSourceMapping,
    /// The source map points at a file missing from the compilation
    #[error("unknown source file index {0}")]
    UnknownSource(u32),
    /// The contract's source map could not be decoded
    #[error("invalid source map: {0}")]
    InvalidSourceMap(String),
    /// The mapped range lies outside the source text
    #[error("source range out of bounds")]
    OffsetOutOfBounds,
}

/// Result of resolving one step's source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationOutcome {
    /// The step maps to this location
    Resolved(SourceLocation),
    /// No location is available
    Unresolved(UnresolvedReason),
}

impl LocationOutcome {
    /// The resolved location, if any
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Resolved(location) => Some(location),
            Self::Unresolved(_) => None,
        }
    }

    /// Whether a location was found
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl From<UnresolvedReason> for LocationOutcome {
    fn from(reason: UnresolvedReason) -> Self {
        Self::Unresolved(reason)
    }
}

/// A location outcome tagged with the step it was computed for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// Step index the resolution was requested for
    pub step: usize,
    /// What was found
    pub outcome: LocationOutcome,
}

impl fmt::Display for ResolvedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            LocationOutcome::Resolved(loc) => write!(
                f,
                "step {} @ {}:{}:{}",
                self.step,
                loc.path.display(),
                loc.span.start.line,
                loc.span.start.column
            ),
            LocationOutcome::Unresolved(reason) => {
                write!(f, "step {} unresolved ({reason})", self.step)
            }
        }
    }
}
