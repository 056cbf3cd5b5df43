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

//! Read-only snapshot of the active compilation.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use alloy_primitives::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Compiled output of one contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractArtifact {
    /// Source file the contract is defined in
    pub file: PathBuf,
    /// Creation (init) bytecode
    pub bytecode: Bytes,
    /// Compressed solc source map for the creation bytecode
    pub source_map: String,
    /// Runtime bytecode
    pub deployed_bytecode: Bytes,
    /// Compressed solc source map for the runtime bytecode
    pub deployed_source_map: String,
}

/// A source file of the compilation, identified by its solc file index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path as known to the compiler
    pub path: PathBuf,
    /// Full source text
    pub content: String,
    #[serde(skip)]
    line_starts: OnceCell<Vec<usize>>,
}

impl SourceFile {
    /// Create a new source file
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self { path: path.into(), content: content.into(), line_starts: OnceCell::new() }
    }

    /// Byte offsets at which each line starts. Computed on first use.
    pub fn line_starts(&self) -> &[usize] {
        self.line_starts.get_or_init(|| {
            std::iter::once(0)
                .chain(self.content.match_indices('\n').map(|(i, _)| i + 1))
                .collect()
        })
    }
}

impl PartialEq for SourceFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.content == other.content
    }
}

impl Eq for SourceFile {}

/// Contracts and sources of the currently active compilation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationArtifactView {
    /// Compiled contracts by name
    pub contracts: HashMap<String, ContractArtifact>,
    /// Source files by solc file index
    pub sources: BTreeMap<u32, SourceFile>,
}

impl CompilationArtifactView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled contract
    pub fn with_contract(mut self, name: impl Into<String>, contract: ContractArtifact) -> Self {
        self.contracts.insert(name.into(), contract);
        self
    }

    /// Add a source file under the given file index
    pub fn with_source(mut self, id: u32, source: SourceFile) -> Self {
        self.sources.insert(id, source);
        self
    }

    /// Look up a source by file index
    pub fn source(&self, id: u32) -> Option<&SourceFile> {
        self.sources.get(&id)
    }
}
