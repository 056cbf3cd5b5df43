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

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

/// A user-defined source breakpoint.
///
/// Breakpoints are independent of any trace and survive reloads. Rows are 0-based,
/// matching the editor gutter that creates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Breakpoint {
    /// Path of the source file, possibly only a suffix of the compiled path
    pub file: PathBuf,
    /// 0-based line number
    pub row: usize,
}

impl Breakpoint {
    /// Creates a new breakpoint at the given file and row.
    pub fn new(file: impl Into<PathBuf>, row: usize) -> Self {
        Self { file: file.into(), row }
    }

    /// Whether this breakpoint refers to the given compiled source path.
    ///
    /// Users may give a file name instead of the full path, so any source path that
    /// ends with the breakpoint's path matches.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.ends_with(&self.file)
    }
}

/// Indexing state of a breakpoint against the loaded trace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BreakpointState {
    /// No compilation artifact is available, the breakpoint cannot be indexed
    Inactive,
    /// The hit set must be (re)computed before use
    Stale,
    /// The hit set is up to date
    Indexed,
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.row)
    }
}

impl FromStr for Breakpoint {
    type Err = Error;

    /// Parses a breakpoint from a string.
    /// Format: `<path>:<row>`
    /// Examples:
    /// - `contracts/Token.sol:41`
    /// - `Token.sol:0`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let Some((path, row)) = trimmed.rsplit_once(':') else {
            bail!("Invalid breakpoint format. Expected <path>:<row>, got: {s}");
        };

        let path = path.trim();
        if path.is_empty() {
            bail!("Breakpoint path is empty");
        }

        let row = row.trim().parse::<usize>().map_err(|e| eyre!("Invalid row: {e}"))?;
        Ok(Self::new(path, row))
    }
}
