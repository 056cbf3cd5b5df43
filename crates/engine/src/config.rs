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

//! Session configuration, constructed in code or parsed from TOML.

use std::time::Duration;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Default capacity of the session event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a debug session.
///
/// Sessions are rebuilt on every debug request, so nothing here is persisted. Hosts
/// that keep settings in a file can deserialize this struct from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of events buffered per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
    /// Give up loading a trace after this many milliseconds (no limit if unset)
    pub load_timeout_ms: Option<u64>,
    /// Resolve steps on the rayon pool when indexing breakpoints
    pub parallel_indexing: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            load_timeout_ms: None,
            parallel_indexing: true,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from TOML; missing keys take their default values
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).wrap_err("Failed to parse session config")
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the load timeout
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enable or disable parallel breakpoint indexing
    pub fn with_parallel_indexing(mut self, parallel: bool) -> Self {
        self.parallel_indexing = parallel;
        self
    }

    /// Load timeout as a duration
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }
}
