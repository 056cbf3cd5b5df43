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

//! Breakpoint hit sets over the loaded trace.
//!
//! A breakpoint is hit at every step whose resolved source span starts on the
//! breakpoint's row in a matching file. Hit sets are computed lazily and in bulk:
//! every step is resolved once, with the per-contract mapping tables prepared once,
//! and tested against all breakpoints that need indexing.
//!
//! Any change to the breakpoint set, the artifact or the trace bumps the engine
//! revision and drops all hit sets. Indexing runs outside the engine (see
//! [`IndexRequest`]) and its result is only applied if the revision did not move in
//! the meantime.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use rayon::prelude::*;
use rdb_common::types::{
    Breakpoint, BreakpointState, CompilationArtifactView, ExecutingAddress, LocationOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    source::{ContractSourceMap, SourceLocationResolver},
    store::LoadedTrace,
};

/// Search direction for breakpoint continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards later steps
    Forward,
    /// Towards earlier steps
    Backward,
}

/// Owner of the breakpoint set and its derived hit sets
#[derive(Debug, Clone)]
pub struct BreakpointEngine {
    /// Sorted hit steps per breakpoint, `None` until indexed
    entries: BTreeMap<Breakpoint, Option<Arc<[usize]>>>,
    artifact: Option<Arc<CompilationArtifactView>>,
    resolver: SourceLocationResolver,
    parallel: bool,
    revision: u64,
}

impl BreakpointEngine {
    /// Create an engine without breakpoints or artifact
    pub fn new(resolver: SourceLocationResolver, parallel: bool) -> Self {
        Self { entries: BTreeMap::new(), artifact: None, resolver, parallel, revision: 0 }
    }

    /// Revision of the inputs hit sets are derived from
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All breakpoints, in path/row order
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.keys()
    }

    /// Number of breakpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no breakpoint is set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The active compilation artifact
    pub fn artifact(&self) -> Option<&Arc<CompilationArtifactView>> {
        self.artifact.as_ref()
    }

    /// State of a breakpoint, `None` if it is not set
    pub fn state(&self, breakpoint: &Breakpoint) -> Option<BreakpointState> {
        let hits = self.entries.get(breakpoint)?;
        Some(match (&self.artifact, hits) {
            (None, _) => BreakpointState::Inactive,
            (Some(_), Some(_)) => BreakpointState::Indexed,
            (Some(_), None) => BreakpointState::Stale,
        })
    }

    /// Hit steps of an indexed breakpoint, in ascending order
    pub fn hits(&self, breakpoint: &Breakpoint) -> Option<&[usize]> {
        self.entries.get(breakpoint)?.as_deref()
    }

    /// Add a breakpoint. Returns whether it was not set before.
    pub fn add(&mut self, breakpoint: Breakpoint) -> bool {
        if self.entries.contains_key(&breakpoint) {
            return false;
        }
        debug!(%breakpoint, "Adding breakpoint");
        self.entries.insert(breakpoint, None);
        self.invalidate();
        true
    }

    /// Remove a breakpoint. Returns whether it was set.
    pub fn remove(&mut self, breakpoint: &Breakpoint) -> bool {
        if self.entries.remove(breakpoint).is_none() {
            return false;
        }
        debug!(%breakpoint, "Removed breakpoint");
        self.invalidate();
        true
    }

    /// Remove all breakpoints
    pub fn clear(&mut self) {
        self.entries.clear();
        self.invalidate();
    }

    /// Switch the active compilation, or drop it with `None`
    pub fn set_artifact(&mut self, artifact: Option<Arc<CompilationArtifactView>>) {
        self.artifact = artifact;
        self.invalidate();
    }

    /// Forget hit sets computed against a previous trace
    pub fn invalidate_trace(&mut self) {
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        for hits in self.entries.values_mut() {
            *hits = None;
        }
    }

    /// Work needed to bring all breakpoints to the Indexed state
    ///
    /// Returns `None` when nothing can or needs to be indexed: every breakpoint is
    /// already indexed, or there is no artifact.
    pub fn index_request(&self, trace: Arc<LoadedTrace>) -> Option<IndexRequest> {
        let artifact = self.artifact.clone()?;
        let breakpoints: Vec<Breakpoint> = self
            .entries
            .iter()
            .filter(|(_, hits)| hits.is_none())
            .map(|(breakpoint, _)| breakpoint.clone())
            .collect();
        if breakpoints.is_empty() {
            return None;
        }

        Some(IndexRequest {
            revision: self.revision,
            breakpoints,
            artifact,
            trace,
            resolver: self.resolver.clone(),
            parallel: self.parallel,
        })
    }

    /// Store the hit sets of a finished request
    ///
    /// Returns `false` and drops the result if anything changed since the request was
    /// made.
    pub fn apply(&mut self, result: IndexResult) -> bool {
        if result.revision != self.revision {
            debug!(
                result = result.revision,
                current = self.revision,
                "Dropping breakpoint index computed for an outdated revision"
            );
            return false;
        }
        for (breakpoint, hits) in result.hits {
            if let Some(entry) = self.entries.get_mut(&breakpoint) {
                *entry = Some(hits.into());
            }
        }
        true
    }

    /// Index all breakpoints in place
    pub fn ensure_indexed(&mut self, trace: &Arc<LoadedTrace>) {
        if let Some(request) = self.index_request(Arc::clone(trace)) {
            let result = request.run();
            self.apply(result);
        }
    }

    /// Nearest hit of any indexed breakpoint strictly after (or before) `current`
    ///
    /// Does not wrap around: past the last hit there is no next one.
    pub fn next_hit(&self, current: usize, direction: Direction) -> Option<usize> {
        let hit_sets = self.entries.values().flatten();
        match direction {
            Direction::Forward => hit_sets
                .filter_map(|hits| {
                    let pos = hits.partition_point(|&step| step <= current);
                    hits.get(pos).copied()
                })
                .min(),
            Direction::Backward => hit_sets
                .filter_map(|hits| {
                    let pos = hits.partition_point(|&step| step < current);
                    pos.checked_sub(1).map(|pos| hits[pos])
                })
                .max(),
        }
    }

    /// Index if needed, then find the next hit
    pub fn continue_to(
        &mut self,
        trace: &Arc<LoadedTrace>,
        current: usize,
        direction: Direction,
    ) -> Option<usize> {
        self.ensure_indexed(trace);
        self.next_hit(current, direction)
    }
}

/// Snapshot of everything needed to compute hit sets off the engine
#[derive(Debug)]
pub struct IndexRequest {
    revision: u64,
    breakpoints: Vec<Breakpoint>,
    artifact: Arc<CompilationArtifactView>,
    trace: Arc<LoadedTrace>,
    resolver: SourceLocationResolver,
    parallel: bool,
}

/// Hit sets computed by an [`IndexRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResult {
    revision: u64,
    hits: Vec<(Breakpoint, Vec<usize>)>,
}

impl IndexResult {
    /// Engine revision the result was computed for
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl IndexRequest {
    /// Engine revision the request was made at
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Resolve every step once and collect the hits of the requested breakpoints
    ///
    /// CPU bound; run it on a blocking thread when called from async code.
    pub fn run(self) -> IndexResult {
        let loaded = &self.trace;
        let artifact = self.artifact.as_ref();

        // Mapping tables are shared with cursor resolution through the trace's cache
        let mut maps: HashMap<ExecutingAddress, Option<Arc<ContractSourceMap>>> = HashMap::new();
        for frame in loaded.frames.frames() {
            maps.entry(frame.address).or_insert_with(|| {
                loaded.source_map(&self.resolver, &frame.address, &self.artifact).ok()
            });
        }

        let breakpoints = &self.breakpoints;
        let resolver = &self.resolver;
        let hits_at = |step: usize| -> Vec<(usize, usize)> {
            let (Ok(address), Some(executed)) = (loaded.frames.address_at(step), loaded.step(step))
            else {
                return Vec::new();
            };
            let Some(Some(map)) = maps.get(&address) else {
                return Vec::new();
            };
            let LocationOutcome::Resolved(location) = resolver.locate(map, executed.pc, artifact)
            else {
                return Vec::new();
            };

            breakpoints
                .iter()
                .enumerate()
                .filter(|(_, bp)| {
                    bp.matches_path(&location.path) && location.span.starts_on(bp.row)
                })
                .map(|(i, _)| (i, step))
                .collect()
        };

        let pairs: Vec<(usize, usize)> = if self.parallel {
            (0..loaded.len()).into_par_iter().flat_map_iter(hits_at).collect()
        } else {
            (0..loaded.len()).flat_map(hits_at).collect()
        };

        let mut hits = vec![Vec::new(); breakpoints.len()];
        for (i, step) in pairs {
            hits[i].push(step);
        }

        let hits: Vec<_> = self
            .breakpoints
            .into_iter()
            .zip(hits)
            .map(|(breakpoint, mut steps)| {
                steps.sort_unstable();
                debug!(%breakpoint, hits = steps.len(), "Indexed breakpoint");
                (breakpoint, steps)
            })
            .collect();

        IndexResult { revision: self.revision, hits }
    }
}
