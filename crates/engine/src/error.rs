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

//! Error taxonomy of the debug session.
//!
//! - [`LoadError`] is surfaced to whoever started the load.
//! - [`NavigationError`] reports caller bugs such as out-of-range jumps.
//! - Address and source lookup failures never surface as errors: they are downgraded
//!   to [`UnresolvedReason`](rdb_common::types::UnresolvedReason) values.
//! - A second load while one is in flight is not an error at all, see
//!   [`LoadOutcome::Ignored`](crate::LoadOutcome::Ignored).

use std::time::Duration;

use thiserror::Error;

/// Failure to load a trace
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The transaction reference does not designate a known transaction
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    /// The trace provider failed
    #[error("trace provider failed: {0}")]
    Provider(String),
    /// The provider returned a trace without steps
    #[error("trace for {0} has no steps")]
    EmptyTrace(String),
    /// The provider did not answer in time
    #[error("loading timed out after {0:?}")]
    Timeout(Duration),
}

impl LoadError {
    /// Wrap a collaborator error, keeping its full cause chain in the message
    pub fn provider(err: eyre::Report) -> Self {
        Self::Provider(format!("{err:#}"))
    }
}

/// Failure to move the step cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NavigationError {
    /// No trace is loaded
    #[error("no trace loaded")]
    NotLoaded,
    /// Requested step is outside the trace
    #[error("step {index} out of bounds (total {len})")]
    OutOfRange {
        /// Requested step
        index: usize,
        /// Number of steps
        len: usize,
    },
}
