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

mod common;

use common::{fixture, session_with, token_tx};
use rdb_common::types::{Breakpoint, BreakpointState, LocationOutcome, UnresolvedReason};
use rdb_engine::{Direction, EventKind, SessionEvent};
use tracing::info;

#[tokio::test]
async fn test_continue_walks_hit_set() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, breakpoint) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    assert!(session.add_breakpoint(breakpoint.clone()));
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Stale));

    let handle = session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(handle.map(|h| h.step()), Some(20));
    assert_eq!(session.cursor(), Some(20));
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Indexed));
    assert_eq!(session.breakpoint_hits(&breakpoint), Some(vec![20, 45, 80]));

    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.cursor(), Some(45));
    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.cursor(), Some(80));

    // No wrap-around past the last hit
    let none = session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert!(none.is_none());
    assert_eq!(session.cursor(), Some(80));

    session.continue_to_breakpoint(Direction::Backward).await.unwrap();
    assert_eq!(session.cursor(), Some(45));
}

#[tokio::test]
async fn test_breakpoint_reached_precedes_cursor_change() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, breakpoint) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    session.add_breakpoint(breakpoint);
    let mut events =
        session.subscribe_to([EventKind::BreakpointReached, EventKind::CursorChanged]);

    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(
        events.drain(),
        vec![
            SessionEvent::BreakpointReached { step: 20 },
            SessionEvent::CursorChanged { step: 20 },
        ]
    );

    // A miss emits nothing
    session.jump_to(90).unwrap();
    events.drain();
    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_removed_breakpoint_is_ignored() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, breakpoint) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    session.add_breakpoint(breakpoint.clone());
    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.cursor(), Some(20));

    assert!(session.remove_breakpoint(&breakpoint));
    assert_eq!(session.breakpoint_state(&breakpoint), None);
    assert!(session.breakpoint_hits(&breakpoint).is_none());

    let none = session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert!(none.is_none());
    assert_eq!(session.cursor(), Some(20));
}

#[tokio::test]
async fn test_without_artifact_nothing_resolves() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, breakpoint) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();
    session.add_breakpoint(breakpoint.clone());

    for step in 0..100 {
        let location = session.location_at(step).unwrap();
        assert_eq!(
            location.outcome,
            LocationOutcome::Unresolved(UnresolvedReason::NoArtifact)
        );
    }

    let none = session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert!(none.is_none());
    assert_eq!(session.cursor(), Some(0));
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Inactive));
}

#[tokio::test]
async fn test_breakpoints_activate_when_artifact_arrives() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, breakpoint) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();
    session.add_breakpoint(breakpoint.clone());
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Inactive));

    session.set_artifact(Some(artifact));
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Stale));
    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.cursor(), Some(20));
}

#[tokio::test]
async fn test_breakpoints_survive_reload() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, breakpoint) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.add_breakpoint(breakpoint.clone());
    session.start_load(token_tx(1)).await.unwrap();
    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Indexed));

    session.start_load(token_tx(2)).await.unwrap();
    assert_eq!(session.breakpoints(), vec![breakpoint.clone()]);
    assert_eq!(session.breakpoint_state(&breakpoint), Some(BreakpointState::Stale));

    session.continue_to_breakpoint(Direction::Forward).await.unwrap();
    assert_eq!(session.cursor(), Some(20));
}

#[tokio::test]
async fn test_breakpoint_in_other_file_never_hits() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, _) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();

    let other = Breakpoint::new("Vault.sol", 10);
    session.add_breakpoint(other.clone());
    assert!(session.continue_to_breakpoint(Direction::Forward).await.unwrap().is_none());
    assert_eq!(session.breakpoint_hits(&other), Some(vec![]));

    session.clear_breakpoints();
    assert!(session.breakpoints().is_empty());
}

#[tokio::test]
async fn test_continue_requires_loaded_trace() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, breakpoint) = fixture();
    let session = session_with(provider);
    session.add_breakpoint(breakpoint);

    assert_eq!(
        session.continue_to_breakpoint(Direction::Forward).await.unwrap_err(),
        rdb_engine::NavigationError::NotLoaded
    );
}
