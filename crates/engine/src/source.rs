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

//! Source location resolution.
//!
//! Turning a step into a source span takes three lookups: the compiled contract whose
//! code the executing frame runs, the instruction index of the step's program counter
//! within that code, and the source map entry at that index. Every failure along the
//! way is reported as an [`UnresolvedReason`] rather than an error, since a missing
//! highlight is an expected outcome for library code, injected code or a stale build.

use std::sync::Arc;

use auto_impl::auto_impl;
use foundry_compilers::artifacts::sourcemap::{self, SourceElement};
use rdb_common::types::{
    CompilationArtifactView, ContractArtifact, ExecutingAddress, LineColumn, LineColumnRange,
    LocationOutcome, RawSourceRange, ResolvedLocation, SourceFile, SourceLocation, Trace,
    UnresolvedReason,
};
use tracing::{debug, trace};

use crate::{frames::CallFrameIndex, utils::InstructionIndex};

/// Translates a raw byte range of a source file into a line/column span
#[auto_impl(&, Arc, Box)]
pub trait LineColumnConverter: Send + Sync {
    /// Returns `None` when the range does not lie within the source text
    fn convert(&self, source: &SourceFile, range: RawSourceRange) -> Option<LineColumnRange>;
}

/// Converter based on the source's line-break table
#[derive(Debug, Clone, Copy, Default)]
pub struct LineBreakConverter;

impl LineBreakConverter {
    fn position(line_starts: &[usize], offset: usize) -> LineColumn {
        // line_starts[0] == 0, so at least one line start is <= offset
        let line = line_starts.partition_point(|&start| start <= offset).saturating_sub(1);
        LineColumn { line, column: offset - line_starts[line] }
    }
}

impl LineColumnConverter for LineBreakConverter {
    fn convert(&self, source: &SourceFile, range: RawSourceRange) -> Option<LineColumnRange> {
        if range.end() > source.content.len() {
            return None;
        }
        let starts = source.line_starts();
        Some(LineColumnRange {
            start: Self::position(starts, range.offset),
            end: Self::position(starts, range.end()),
        })
    }
}

/// Which of a contract's two mapping tables applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Init code, mapped by the creation source map
    Creation,
    /// Deployed code, mapped by the runtime source map
    Runtime,
}

/// Decoded mapping table of one compiled contract, ready for per-step lookups
#[derive(Debug, Clone)]
pub struct ContractSourceMap {
    /// Name of the matched contract
    pub contract: String,
    /// Table kind
    pub kind: CodeKind,
    instructions: InstructionIndex,
    elements: Vec<SourceElement>,
}

impl ContractSourceMap {
    /// Source map element for the instruction starting at `pc`
    fn element_at(&self, pc: usize) -> Option<&SourceElement> {
        self.instructions.instruction_at(pc).and_then(|index| self.elements.get(index))
    }
}

/// Maps steps to source locations against a compilation artifact
#[derive(Clone)]
pub struct SourceLocationResolver {
    converter: Arc<dyn LineColumnConverter>,
}

impl std::fmt::Debug for SourceLocationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLocationResolver").finish_non_exhaustive()
    }
}

impl Default for SourceLocationResolver {
    fn default() -> Self {
        Self::new(Arc::new(LineBreakConverter))
    }
}

impl SourceLocationResolver {
    /// Create a resolver using the given line/column converter
    pub fn new(converter: Arc<dyn LineColumnConverter>) -> Self {
        Self { converter }
    }

    /// Select and decode the mapping table for the code executed by `address`
    pub fn prepare(
        &self,
        address: &ExecutingAddress,
        trace: &Trace,
        artifact: Option<&CompilationArtifactView>,
    ) -> Result<ContractSourceMap, UnresolvedReason> {
        let artifact = artifact.ok_or(UnresolvedReason::NoArtifact)?;
        let code = trace.bytecode(address).ok_or(UnresolvedReason::NoCode)?;

        let kind = if address.is_creation() { CodeKind::Creation } else { CodeKind::Runtime };
        let (name, contract) = find_contract(artifact, code, kind)
            .ok_or(UnresolvedReason::NoMatchingContract)?;

        let raw = match kind {
            CodeKind::Creation => &contract.source_map,
            CodeKind::Runtime => &contract.deployed_source_map,
        };
        let elements =
            sourcemap::parse(raw).map_err(|e| UnresolvedReason::InvalidSourceMap(e.to_string()))?;

        trace!(%address, contract = name, ?kind, entries = elements.len(), "Prepared source map");
        Ok(ContractSourceMap {
            contract: name.to_string(),
            kind,
            instructions: InstructionIndex::new(code),
            elements,
        })
    }

    /// Look up the source location of the instruction at `pc` in a prepared table
    pub fn locate(
        &self,
        map: &ContractSourceMap,
        pc: usize,
        artifact: &CompilationArtifactView,
    ) -> LocationOutcome {
        let Some(element) = map.element_at(pc) else {
            return UnresolvedReason::NoSourceMapping.into();
        };
        let Some(file_id) = element.index() else {
            return UnresolvedReason::NoSourceMapping.into();
        };
        let Some(source) = artifact.source(file_id) else {
            return UnresolvedReason::UnknownSource(file_id).into();
        };

        let range = RawSourceRange::new(element.offset() as usize, element.length() as usize);
        match self.converter.convert(source, range) {
            Some(span) => LocationOutcome::Resolved(SourceLocation {
                file_id,
                path: source.path.clone(),
                range,
                span,
            }),
            None => UnresolvedReason::OffsetOutOfBounds.into(),
        }
    }

    /// Resolve the instruction at `pc` executed by `address`
    pub fn resolve(
        &self,
        address: &ExecutingAddress,
        pc: usize,
        trace: &Trace,
        artifact: Option<&CompilationArtifactView>,
    ) -> LocationOutcome {
        let Some(artifact) = artifact else {
            return UnresolvedReason::NoArtifact.into();
        };
        match self.prepare(address, trace, Some(artifact)) {
            Ok(map) => self.locate(&map, pc, artifact),
            Err(reason) => reason.into(),
        }
    }

    /// Resolve a step of a loaded trace, including its executing address
    pub fn resolve_step(
        &self,
        frames: &CallFrameIndex,
        trace: &Trace,
        step: usize,
        artifact: Option<&CompilationArtifactView>,
    ) -> ResolvedLocation {
        let outcome = match (frames.address_at(step), trace.get(step)) {
            (Ok(address), Some(executed)) => self.resolve(&address, executed.pc, trace, artifact),
            (Err(err), _) => UnresolvedReason::Address(err).into(),
            (Ok(_), None) => UnresolvedReason::NoCode.into(),
        };

        if let LocationOutcome::Unresolved(reason) = &outcome {
            debug!(step, %reason, "No source location for step");
        }
        ResolvedLocation { step, outcome }
    }
}

/// Find the compiled contract whose code of the given kind is `code`
///
/// Ties are broken by contract name so the choice does not depend on map order.
fn find_contract<'a>(
    artifact: &'a CompilationArtifactView,
    code: &[u8],
    kind: CodeKind,
) -> Option<(&'a str, &'a ContractArtifact)> {
    artifact
        .contracts
        .iter()
        .filter(|(_, contract)| match kind {
            CodeKind::Runtime => {
                crate::utils::same_runtime_code(code, &contract.deployed_bytecode)
            }
            // Init code is followed by the constructor arguments
            CodeKind::Creation => {
                !contract.bytecode.is_empty() && code.starts_with(&contract.bytecode)
            }
        })
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(name, contract)| (name.as_str(), contract))
}
