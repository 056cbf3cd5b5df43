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

//! RDB Common - Shared functionality for RDB components
//!
//! This crate provides the data model shared by the debug session engine and its
//! collaborators: recorded traces, call frames, transactions, breakpoints,
//! compilation artifacts and source locations, plus logging setup and test fixtures.

/// Common types used throughout RDB including traces, breakpoints and source locations
pub mod types;

/// Logging setup and utilities for consistent logging across RDB components
pub mod logging;
/// Opcode classification helpers for frame tracking and bytecode walking
pub mod opcode;
/// Fixtures for building synthetic traces and compilations in tests
pub mod test_utils;

pub use logging::*;
pub use opcode::*;
