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

//! Debug session coordinator.
//!
//! A [`DebugSession`] owns the loaded trace, the step cursor and the breakpoint set,
//! and publishes every change on its [`SessionEventBus`].
//!
//! # Staleness
//!
//! Loading a trace and resolving a step's source location run asynchronously, and
//! the state may change while they do. Rather than holding a lock across those
//! suspension points, every continuation carries tags taken when it started:
//!
//! - the session *generation*, bumped by every load and unload,
//! - for location resolutions, the cursor *move sequence*, bumped by every jump.
//!
//! A continuation publishes only if both tags still match, checked under the state
//! lock it publishes with. A result computed for a superseded step or a previous
//! trace is dropped without any notification.
//!
//! # Notification order
//!
//! Per trace: `StatusChanged { active: true }`, then `CursorChanged { step: 0 }`,
//! then for every move `CursorChanged` followed by at most one `LocationResolved`
//! for that move. `BreakpointReached` directly precedes the `CursorChanged` of the
//! jump it causes. Unloading emits `StatusChanged { active: false }` and `Unloaded`.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use rdb_common::types::{
    Breakpoint, BreakpointState, CallFrame, CompilationArtifactView, ExecutingAddress,
    ResolutionError, ResolvedLocation, TransactionRecord, TransactionRef,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    breakpoint::{BreakpointEngine, Direction, IndexRequest, IndexResult},
    config::SessionConfig,
    error::{LoadError, NavigationError},
    events::{EventKind, EventSubscriber, SessionEvent, SessionEventBus},
    navigator::{Movement, StepNavigator},
    provider::TraceProvider,
    source::{LineBreakConverter, LineColumnConverter, SourceLocationResolver},
    store::{load_trace, LoadedTrace},
};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Nothing loaded yet, or the last load failed
    Idle,
    /// A trace is being fetched
    Loading,
    /// A trace is loaded and the cursor is valid
    Loaded,
    /// The trace was explicitly unloaded
    Unloaded,
}

/// How a [`DebugSession::start_load`] call ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOutcome {
    /// The trace is loaded and the cursor is at step 0
    Loaded {
        /// Number of steps in the trace
        steps: usize,
    },
    /// Another load was already in flight; nothing happened
    Ignored,
    /// The session was unloaded (or reloaded) before this load finished
    Cancelled,
}

/// Collaborators and settings a session is constructed with
#[derive(Clone)]
pub struct SessionContext {
    /// Session settings
    pub config: SessionConfig,
    /// Where traces come from
    pub provider: Arc<dyn TraceProvider>,
    /// Byte offset to line/column translation
    pub converter: Arc<dyn LineColumnConverter>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Context with default settings and line-break based offset conversion
    pub fn new(provider: Arc<dyn TraceProvider>) -> Self {
        Self { config: SessionConfig::default(), provider, converter: Arc::new(LineBreakConverter) }
    }

    /// Replace the settings
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the offset converter
    pub fn with_converter(mut self, converter: Arc<dyn LineColumnConverter>) -> Self {
        self.converter = converter;
        self
    }
}

/// Pending source resolution for one cursor move
#[derive(Debug)]
pub struct ResolutionHandle {
    step: usize,
    task: JoinHandle<bool>,
}

impl ResolutionHandle {
    /// Step the resolution was started for
    pub fn step(&self) -> usize {
        self.step
    }

    /// Wait for the resolution. Returns whether its result was published, which is
    /// not the case if the cursor moved or the session was unloaded meanwhile.
    pub async fn published(self) -> bool {
        match self.task.await {
            Ok(published) => published,
            Err(e) => {
                error!(step = self.step, "Source resolution task failed: {e}");
                false
            }
        }
    }
}

/// Mutable session state, only ever touched under the lock
struct State {
    status: SessionStatus,
    generation: u64,
    /// Bumped on every cursor move
    moves: u64,
    loaded: Option<Arc<LoadedTrace>>,
    navigator: Option<StepNavigator>,
    breakpoints: BreakpointEngine,
    provider: Arc<dyn TraceProvider>,
}

struct Inner {
    state: Mutex<State>,
    events: SessionEventBus,
    resolver: SourceLocationResolver,
    config: SessionConfig,
}

/// Result of one locked pass of breakpoint continuation
enum Continuation {
    Index(IndexRequest),
    Done(Option<ResolutionHandle>),
}

/// Handle to a debug session. Cheap to clone; clones share the session.
///
/// Cursor moves spawn their source resolution on the current Tokio runtime, so they
/// must be called from within one.
#[derive(Clone)]
pub struct DebugSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DebugSession")
            .field("status", &state.status)
            .field("generation", &state.generation)
            .field("cursor", &state.navigator.as_ref().map(StepNavigator::cursor))
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Create an idle session
    pub fn new(context: SessionContext) -> Self {
        let SessionContext { config, provider, converter } = context;
        let resolver = SourceLocationResolver::new(converter);
        let state = State {
            status: SessionStatus::Idle,
            generation: 0,
            moves: 0,
            loaded: None,
            navigator: None,
            breakpoints: BreakpointEngine::new(resolver.clone(), config.parallel_indexing),
            provider,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events: SessionEventBus::new(config.event_capacity),
                resolver,
                config,
            }),
        }
    }

    /////////////////////////////////////////////
    // Events
    /////////////////////////////////////////////

    /// Subscribe to all notifications
    pub fn subscribe(&self) -> EventSubscriber {
        self.inner.events.subscribe()
    }

    /// Subscribe to notifications of the given kinds
    pub fn subscribe_to(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventSubscriber {
        self.inner.events.subscribe_to(kinds)
    }

    /////////////////////////////////////////////
    // Lifecycle
    /////////////////////////////////////////////

    /// Load the trace of a transaction and put the cursor at step 0
    ///
    /// A call made while another load is in flight is ignored. A call made while a
    /// trace is loaded unloads it first.
    pub async fn start_load(
        &self,
        tx: impl Into<TransactionRef>,
    ) -> Result<LoadOutcome, LoadError> {
        let tx = tx.into();
        let (generation, provider) = {
            let mut state = self.inner.state.lock();
            if state.status == SessionStatus::Loading {
                debug!(%tx, "Ignoring load request, another load is in flight");
                return Ok(LoadOutcome::Ignored);
            }
            self.inner.unload_locked(&mut state);

            state.generation += 1;
            state.status = SessionStatus::Loading;
            (state.generation, Arc::clone(&state.provider))
        };

        info!(%tx, provider = provider.name(), generation, "Loading trace");
        let result = load_trace(provider.as_ref(), tx, self.inner.config.load_timeout()).await;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.generation != generation || state.status != SessionStatus::Loading {
            debug!(
                generation,
                current = state.generation,
                "Discarding load of a superseded session"
            );
            return Ok(LoadOutcome::Cancelled);
        }

        let checked = result.and_then(|loaded| {
            let navigator = StepNavigator::new(loaded.len())
                .ok_or_else(|| LoadError::EmptyTrace(loaded.transaction.hash.to_string()))?;
            Ok((Arc::new(loaded), navigator))
        });
        let (loaded, navigator) = match checked {
            Ok(checked) => checked,
            Err(err) => {
                warn!(generation, "Failed to load trace: {err}");
                state.status = SessionStatus::Idle;
                return Err(err);
            }
        };

        let steps = loaded.len();
        state.breakpoints.invalidate_trace();
        state.loaded = Some(loaded);
        state.navigator = Some(navigator);
        state.status = SessionStatus::Loaded;

        self.inner.events.publish(SessionEvent::StatusChanged { active: true });
        // The returned handle is not needed: step 0's resolution publishes on its own
        let _ = self.inner.moved(state, 0);

        info!(generation, steps, "Trace loaded");
        Ok(LoadOutcome::Loaded { steps })
    }

    /// Drop the loaded trace, or cancel the load in flight
    ///
    /// Results of work started before the unload are never published afterwards.
    /// Returns whether there was anything to unload.
    pub fn unload(&self) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.unload_locked(&mut state)
    }

    /// The editor content changed: locations of the loaded trace are meaningless now
    pub fn notify_source_edited(&self) -> bool {
        debug!("Source edited, unloading trace");
        self.unload()
    }

    /// Switch the trace provider, e.g. after the execution context changed
    ///
    /// Takes effect for subsequent loads.
    pub fn set_provider(&self, provider: Arc<dyn TraceProvider>) {
        let mut state = self.inner.state.lock();
        info!(from = state.provider.name(), to = provider.name(), "Switching trace provider");
        state.provider = provider;
    }

    /// Switch the active compilation, or drop it with `None`
    ///
    /// Breakpoints become Stale (or Inactive without an artifact). The current step
    /// is not re-resolved; the next move uses the new artifact.
    pub fn set_artifact(&self, artifact: Option<Arc<CompilationArtifactView>>) {
        let mut state = self.inner.state.lock();
        debug!(available = artifact.is_some(), "Compilation artifact changed");
        state.breakpoints.set_artifact(artifact);
    }

    /////////////////////////////////////////////
    // Navigation
    /////////////////////////////////////////////

    /// Move the cursor to `index`, rejecting indices outside the trace
    pub fn jump_to(&self, index: usize) -> Result<ResolutionHandle, NavigationError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let navigator = state.navigator.as_mut().ok_or(NavigationError::NotLoaded)?;
        navigator.jump_to(index)?;
        Ok(self.inner.moved(state, index))
    }

    /// Apply a relative movement. Returns `None` without any notification when the
    /// movement does not change the cursor.
    pub fn move_cursor(
        &self,
        movement: Movement,
    ) -> Result<Option<ResolutionHandle>, NavigationError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let (Some(navigator), Some(loaded)) = (state.navigator.as_mut(), state.loaded.as_ref())
        else {
            return Err(NavigationError::NotLoaded);
        };

        let Some(target) = navigator.target(movement, &loaded.frames) else {
            debug!(?movement, cursor = navigator.cursor(), "Movement is a no-op");
            return Ok(None);
        };
        navigator.jump_to(target)?;
        Ok(Some(self.inner.moved(state, target)))
    }

    /// One step forward; no-op at the last step
    pub fn next(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::Next)
    }

    /// One step back; no-op at step 0
    pub fn previous(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::Previous)
    }

    /// Go to step 0
    pub fn first(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::First)
    }

    /// Go to the last step
    pub fn last(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::Last)
    }

    /// Next step of the current frame or a caller, skipping over calls
    pub fn step_over_forward(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::StepOverForward)
    }

    /// Previous step of the current frame or a caller, skipping over calls
    pub fn step_over_back(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::StepOverBack)
    }

    /// First step after the current frame returns
    pub fn jump_out(&self) -> Result<Option<ResolutionHandle>, NavigationError> {
        self.move_cursor(Movement::JumpOut)
    }

    /////////////////////////////////////////////
    // Breakpoints
    /////////////////////////////////////////////

    /// Add a breakpoint. Returns whether it was not set before.
    pub fn add_breakpoint(&self, breakpoint: Breakpoint) -> bool {
        self.inner.state.lock().breakpoints.add(breakpoint)
    }

    /// Remove a breakpoint. Returns whether it was set.
    pub fn remove_breakpoint(&self, breakpoint: &Breakpoint) -> bool {
        self.inner.state.lock().breakpoints.remove(breakpoint)
    }

    /// Remove all breakpoints
    pub fn clear_breakpoints(&self) {
        self.inner.state.lock().breakpoints.clear();
    }

    /// Jump to the nearest breakpoint hit after (or before) the cursor
    ///
    /// Stale breakpoints are indexed first on a blocking thread. Returns `None`, and
    /// leaves the cursor alone, when there is no further hit.
    pub async fn continue_to_breakpoint(
        &self,
        direction: Direction,
    ) -> Result<Option<ResolutionHandle>, NavigationError> {
        let mut pending: Option<IndexResult> = None;
        loop {
            let step = {
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;
                let loaded = state.loaded.clone().ok_or(NavigationError::NotLoaded)?;

                // An outdated result is dropped and the engine asks for a new run
                if let Some(result) = pending.take() {
                    state.breakpoints.apply(result);
                }

                match state.breakpoints.index_request(loaded) {
                    Some(request) => Continuation::Index(request),
                    None => Continuation::Done(self.inner.continue_locked(state, direction)?),
                }
            };

            match step {
                Continuation::Done(handle) => return Ok(handle),
                Continuation::Index(request) => {
                    debug!(revision = request.revision(), "Indexing breakpoints");
                    match tokio::task::spawn_blocking(move || request.run()).await {
                        Ok(result) => pending = Some(result),
                        Err(e) => {
                            error!("Breakpoint indexing task failed: {e}");
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /////////////////////////////////////////////
    // Accessors
    /////////////////////////////////////////////

    /// Lifecycle state
    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Current step, `None` unless a trace is loaded
    pub fn cursor(&self) -> Option<usize> {
        self.inner.state.lock().navigator.as_ref().map(StepNavigator::cursor)
    }

    /// Number of steps of the loaded trace
    pub fn step_count(&self) -> Option<usize> {
        self.inner.state.lock().loaded.as_ref().map(|loaded| loaded.len())
    }

    /// The loaded trace
    pub fn loaded_trace(&self) -> Option<Arc<LoadedTrace>> {
        self.inner.state.lock().loaded.clone()
    }

    /// Transaction of the loaded trace
    pub fn transaction(&self) -> Option<TransactionRecord> {
        self.inner.state.lock().loaded.as_ref().map(|loaded| loaded.transaction.clone())
    }

    /// Executing address at a step; `None` unless a trace is loaded
    pub fn address_at(&self, index: usize) -> Option<Result<ExecutingAddress, ResolutionError>> {
        let loaded = self.loaded_trace()?;
        Some(loaded.frames.address_at(index))
    }

    /// Frame stack at the cursor, outermost first
    pub fn call_stack(&self) -> Option<Result<Vec<CallFrame>, ResolutionError>> {
        let state = self.inner.state.lock();
        let (loaded, navigator) = (state.loaded.as_ref()?, state.navigator.as_ref()?);
        Some(
            loaded
                .frames
                .call_stack_at(navigator.cursor())
                .map(|stack| stack.into_iter().cloned().collect()),
        )
    }

    /// Resolve the source location of any step of the loaded trace against the
    /// current artifact, without touching the cursor or publishing anything
    pub fn location_at(&self, index: usize) -> Option<ResolvedLocation> {
        let (loaded, artifact) = {
            let state = self.inner.state.lock();
            (state.loaded.clone()?, state.breakpoints.artifact().cloned())
        };
        (index < loaded.len())
            .then(|| loaded.resolve(&self.inner.resolver, index, artifact.as_ref()))
    }

    /// All breakpoints, in path/row order
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.state.lock().breakpoints.breakpoints().cloned().collect()
    }

    /// Indexing state of a breakpoint, `None` if it is not set
    pub fn breakpoint_state(&self, breakpoint: &Breakpoint) -> Option<BreakpointState> {
        self.inner.state.lock().breakpoints.state(breakpoint)
    }

    /// Hit steps of an indexed breakpoint
    pub fn breakpoint_hits(&self, breakpoint: &Breakpoint) -> Option<Vec<usize>> {
        self.inner.state.lock().breakpoints.hits(breakpoint).map(<[usize]>::to_vec)
    }
}

impl Inner {
    /// Unload under the lock. Returns whether there was anything to unload.
    fn unload_locked(&self, state: &mut State) -> bool {
        match state.status {
            SessionStatus::Loaded => {
                state.generation += 1;
                state.loaded = None;
                state.navigator = None;
                state.status = SessionStatus::Unloaded;
                state.breakpoints.invalidate_trace();

                self.events.publish(SessionEvent::StatusChanged { active: false });
                self.events.publish(SessionEvent::Unloaded);
                info!(generation = state.generation, "Trace unloaded");
                true
            }
            SessionStatus::Loading => {
                // The in-flight load sees the new generation and gives up
                state.generation += 1;
                state.status = SessionStatus::Unloaded;

                self.events.publish(SessionEvent::Unloaded);
                info!(generation = state.generation, "Cancelled trace load");
                true
            }
            SessionStatus::Idle | SessionStatus::Unloaded => false,
        }
    }

    /// Publish a cursor move and start resolving the new step
    fn moved(self: &Arc<Self>, state: &mut State, step: usize) -> ResolutionHandle {
        state.moves += 1;
        self.events.publish(SessionEvent::CursorChanged { step });

        let generation = state.generation;
        let seq = state.moves;
        let loaded = state.loaded.clone();
        let artifact = state.breakpoints.artifact().cloned();
        let inner = Arc::clone(self);

        let task = tokio::spawn(async move {
            let Some(loaded) = loaded else {
                return false;
            };
            let location = loaded.resolve(&inner.resolver, step, artifact.as_ref());
            inner.publish_location(generation, seq, location)
        });
        ResolutionHandle { step, task }
    }

    /// Publish a resolution if it is still for the current step of the current trace
    fn publish_location(&self, generation: u64, seq: u64, location: ResolvedLocation) -> bool {
        let state = self.state.lock();
        if state.generation != generation || state.moves != seq {
            debug!(
                step = location.step,
                generation,
                current_generation = state.generation,
                "Discarding stale source resolution"
            );
            return false;
        }

        debug!(%location, "Resolved source location");
        self.events.publish(SessionEvent::LocationResolved(location));
        true
    }

    /// Find the next hit with all breakpoints indexed and jump there
    fn continue_locked(
        self: &Arc<Self>,
        state: &mut State,
        direction: Direction,
    ) -> Result<Option<ResolutionHandle>, NavigationError> {
        let navigator = state.navigator.as_mut().ok_or(NavigationError::NotLoaded)?;
        let current = navigator.cursor();
        let Some(target) = state.breakpoints.next_hit(current, direction) else {
            debug!(current, ?direction, "No further breakpoint hit");
            return Ok(None);
        };

        navigator.jump_to(target)?;
        info!(step = target, "Breakpoint reached");
        self.events.publish(SessionEvent::BreakpointReached { step: target });
        Ok(Some(self.moved(state, target)))
    }
}
