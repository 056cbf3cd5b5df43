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

//! The loaded trace of a session and the pipeline that produces it.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use rdb_common::types::{
    CompilationArtifactView, ExecutingAddress, LocationOutcome, ResolvedLocation, Step, Trace,
    TransactionRecord, TransactionRef, UnresolvedReason,
};
use tracing::{debug, info, trace};

use crate::{
    error::LoadError,
    frames::CallFrameIndex,
    provider::{resolve_transaction, TraceProvider},
    source::{ContractSourceMap, SourceLocationResolver},
};

type PreparedMap = Result<Arc<ContractSourceMap>, UnresolvedReason>;

/// Prepared mapping tables for the most recently used artifact
#[derive(Debug, Default)]
struct SourceMapCache {
    /// Identity of the artifact the maps were prepared against
    artifact: Weak<CompilationArtifactView>,
    maps: HashMap<ExecutingAddress, PreparedMap>,
}

impl SourceMapCache {
    fn is_for(&self, artifact: &Arc<CompilationArtifactView>) -> bool {
        std::ptr::eq(self.artifact.as_ptr(), Arc::as_ptr(artifact))
    }
}

/// A trace together with the indices built over it
///
/// Immutable once built and shared between the session and background work.
#[derive(Debug)]
pub struct LoadedTrace {
    /// Transaction the trace was recorded for
    pub transaction: TransactionRecord,
    /// Recorded steps and frame code
    pub trace: Trace,
    /// Executing-address index
    pub frames: CallFrameIndex,
    source_maps: Mutex<SourceMapCache>,
}

impl LoadedTrace {
    /// Index a trace. Traces without steps are rejected, since they admit no cursor.
    pub fn new(transaction: TransactionRecord, mut trace: Trace) -> Result<Self, LoadError> {
        if trace.is_empty() {
            return Err(LoadError::EmptyTrace(transaction.hash.to_string()));
        }

        // The top-level frame is whatever the transaction targets
        let root = transaction.root_address();
        if trace.root != root {
            debug!(provider_root = %trace.root, %root, "Using transaction target as trace root");
            trace.root = root;
        }

        let frames = CallFrameIndex::build(&trace);
        Ok(Self { transaction, trace, frames, source_maps: Mutex::default() })
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.trace.len()
    }

    /// Whether the trace has no steps. Always false for a built trace.
    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }

    /// Raw step data
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.trace.get(index)
    }

    /// Executing address at a step, `None` if it cannot be determined
    pub fn address_at(&self, index: usize) -> Option<ExecutingAddress> {
        self.frames.address_at(index).ok()
    }

    /// Mapping table for the code executed by `address`, prepared at most once per
    /// artifact. Switching to another artifact drops the maps of the previous one.
    pub fn source_map(
        &self,
        resolver: &SourceLocationResolver,
        address: &ExecutingAddress,
        artifact: &Arc<CompilationArtifactView>,
    ) -> Result<Arc<ContractSourceMap>, UnresolvedReason> {
        {
            let mut cache = self.source_maps.lock();
            if !cache.is_for(artifact) {
                cache.artifact = Arc::downgrade(artifact);
                cache.maps.clear();
            } else if let Some(map) = cache.maps.get(address) {
                return map.clone();
            }
        }

        // Prepared outside the lock; a concurrent miss for the same address just
        // prepares an equal table
        let map = resolver.prepare(address, &self.trace, Some(artifact)).map(Arc::new);
        let mut cache = self.source_maps.lock();
        if cache.is_for(artifact) {
            trace!(%address, "Cached source map");
            cache.maps.insert(*address, map.clone());
        }
        map
    }

    /// Resolve the source location of a step
    pub fn resolve(
        &self,
        resolver: &SourceLocationResolver,
        step: usize,
        artifact: Option<&Arc<CompilationArtifactView>>,
    ) -> ResolvedLocation {
        let outcome = match (self.frames.address_at(step), self.trace.get(step), artifact) {
            (Err(err), _, _) => UnresolvedReason::Address(err).into(),
            (Ok(_), None, _) => UnresolvedReason::NoCode.into(),
            (Ok(_), Some(_), None) => UnresolvedReason::NoArtifact.into(),
            (Ok(address), Some(executed), Some(artifact)) => {
                match self.source_map(resolver, &address, artifact) {
                    Ok(map) => resolver.locate(&map, executed.pc, artifact),
                    Err(reason) => reason.into(),
                }
            }
        };

        if let LocationOutcome::Unresolved(reason) = &outcome {
            debug!(step, %reason, "No source location for step");
        }
        ResolvedLocation { step, outcome }
    }
}

/// Fetch and index the trace of a transaction
pub async fn load_trace<P>(
    provider: &P,
    tx: TransactionRef,
    timeout: Option<Duration>,
) -> Result<LoadedTrace, LoadError>
where
    P: TraceProvider + ?Sized,
{
    let fetch = async {
        let record = resolve_transaction(provider, tx).await?;
        let trace = provider.trace(record.clone()).await.map_err(LoadError::provider)?;
        Ok::<_, LoadError>((record, trace))
    };

    let (record, trace) = match timeout {
        Some(limit) => {
            tokio::time::timeout(limit, fetch).await.map_err(|_| LoadError::Timeout(limit))??
        }
        None => fetch.await?,
    };

    let hash = record.hash;
    // Replaying depth markers is linear in the trace length
    let loaded = tokio::task::spawn_blocking(move || LoadedTrace::new(record, trace))
        .await
        .map_err(|e| LoadError::Provider(format!("trace indexing task failed: {e}")))??;

    info!(
        provider = provider.name(),
        tx = %hash,
        steps = loaded.len(),
        frames = loaded.frames.frames().len(),
        "Loaded trace"
    );
    Ok(loaded)
}
