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

use std::{sync::Arc, time::Duration};

use alloy_primitives::TxHash;
use common::{fixture, recv_until, session_with, token_tx, MockProvider};
use rdb_common::{
    test_utils::TOKEN,
    types::{ExecutingAddress, Trace, TransactionRef},
};
use rdb_engine::{
    DebugSession, EventKind, LoadError, LoadOutcome, NavigationError, SessionConfig,
    SessionContext, SessionEvent, SessionStatus,
};
use tokio::sync::Notify;
use tracing::info;

fn is_location(step: usize) -> impl Fn(&SessionEvent) -> bool {
    move |event| matches!(event, SessionEvent::LocationResolved(loc) if loc.step == step)
}

#[tokio::test]
async fn test_load_emits_activation_then_cursor() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, _) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    let mut events = session.subscribe();

    let outcome = session.start_load(token_tx(1)).await.unwrap();
    assert_eq!(outcome, LoadOutcome::Loaded { steps: 100 });
    assert_eq!(session.status(), SessionStatus::Loaded);
    assert_eq!(session.cursor(), Some(0));
    assert_eq!(session.step_count(), Some(100));

    let received = recv_until(&mut events, is_location(0)).await;
    assert_eq!(received[0], SessionEvent::StatusChanged { active: true });
    assert_eq!(received[1], SessionEvent::CursorChanged { step: 0 });
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_load_by_hash_and_block_index() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);

    let outcome = session.start_load(TransactionRef::Hash(TxHash::repeat_byte(2))).await;
    assert_eq!(outcome, Ok(LoadOutcome::Loaded { steps: 100 }));
    assert_eq!(session.transaction().map(|tx| tx.hash), Some(TxHash::repeat_byte(2)));

    let outcome =
        session.start_load(TransactionRef::BlockIndex { block_number: 7, tx_index: 1 }).await;
    assert_eq!(outcome, Ok(LoadOutcome::Loaded { steps: 100 }));
    assert_eq!(session.transaction().map(|tx| tx.hash), Some(TxHash::repeat_byte(1)));
}

#[tokio::test]
async fn test_load_failures_leave_session_inactive() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    let mut events = session.subscribe();

    let missing = session.start_load(TransactionRef::Hash(TxHash::repeat_byte(9))).await;
    assert!(matches!(missing, Err(LoadError::TransactionNotFound(_))));
    assert_eq!(session.status(), SessionStatus::Idle);
    assert_eq!(session.cursor(), None);

    let failing = session_with(MockProvider::new("broken").failing("node unreachable"));
    let result = failing.start_load(token_tx(1)).await;
    assert!(matches!(result, Err(LoadError::Provider(msg)) if msg.contains("node unreachable")));
    assert_eq!(failing.status(), SessionStatus::Idle);

    let empty = session_with(
        MockProvider::new("empty")
            .with_transaction(token_tx(3), Trace::new(ExecutingAddress::Contract(TOKEN))),
    );
    assert!(matches!(empty.start_load(token_tx(3)).await, Err(LoadError::EmptyTrace(_))));

    // No activation was ever announced
    assert!(events.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let provider = provider.gated(Arc::new(Notify::new()));
    let config = SessionConfig::default().with_load_timeout(Duration::from_secs(3));
    let session = DebugSession::new(SessionContext::new(Arc::new(provider)).with_config(config));

    let result = session.start_load(token_tx(1)).await;
    assert_eq!(result, Err(LoadError::Timeout(Duration::from_secs(3))));
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_subsecond_load_timeout_allows_slow_provider() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let gate = Arc::new(Notify::new());
    let (provider, _, _) = fixture();
    let provider = provider.gated(Arc::clone(&gate));
    let config = SessionConfig::default().with_load_timeout(Duration::from_millis(500));
    let session = DebugSession::new(SessionContext::new(Arc::new(provider)).with_config(config));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.notify_one();
    });

    assert!(matches!(session.start_load(token_tx(1)).await, Ok(LoadOutcome::Loaded { .. })));
    assert_eq!(session.status(), SessionStatus::Loaded);
}

#[tokio::test]
async fn test_concurrent_load_is_ignored_and_unload_cancels() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let gate = Arc::new(Notify::new());
    let (provider, _, _) = fixture();
    let session = session_with(provider.gated(Arc::clone(&gate)));
    let mut events = session.subscribe();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.start_load(token_tx(1)).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(session.status(), SessionStatus::Loading);

    assert_eq!(session.start_load(token_tx(2)).await, Ok(LoadOutcome::Ignored));

    assert!(session.unload());
    gate.notify_one();
    assert_eq!(first.await.unwrap(), Ok(LoadOutcome::Cancelled));
    assert_eq!(session.status(), SessionStatus::Unloaded);
    assert_eq!(session.cursor(), None);

    // Only the unload itself was announced
    assert_eq!(events.drain(), vec![SessionEvent::Unloaded]);
}

#[tokio::test]
async fn test_every_jump_emits_one_cursor_change() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();
    let mut cursor_events = session.subscribe_to([EventKind::CursorChanged]);

    for i in 0..100 {
        let handle = session.jump_to(i).unwrap();
        assert_eq!(handle.step(), i);
        assert_eq!(session.cursor(), Some(i));
        assert_eq!(cursor_events.drain(), vec![SessionEvent::CursorChanged { step: i }]);
    }
}

#[tokio::test]
async fn test_out_of_range_jump_is_rejected() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    assert_eq!(session.jump_to(0).unwrap_err(), NavigationError::NotLoaded);

    session.start_load(token_tx(1)).await.unwrap();
    session.jump_to(42).unwrap();
    let mut events = session.subscribe();

    assert_eq!(
        session.jump_to(100).unwrap_err(),
        NavigationError::OutOfRange { index: 100, len: 100 }
    );
    assert_eq!(session.cursor(), Some(42));
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_boundary_moves_are_silent() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();
    let mut cursor_events = session.subscribe_to([EventKind::CursorChanged]);

    assert!(session.previous().unwrap().is_none());
    assert!(session.next().unwrap().is_some());
    assert!(session.last().unwrap().is_some());
    assert!(session.next().unwrap().is_none());
    assert!(session.first().unwrap().is_some());

    assert_eq!(
        cursor_events.drain(),
        vec![
            SessionEvent::CursorChanged { step: 1 },
            SessionEvent::CursorChanged { step: 99 },
            SessionEvent::CursorChanged { step: 0 },
        ]
    );
}

#[tokio::test]
async fn test_superseded_resolution_is_never_published() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, _) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    let mut events = session.subscribe();

    let five = session.jump_to(5).unwrap();
    let ten = session.jump_to(10).unwrap();
    assert!(!five.published().await);
    assert!(ten.published().await);

    let received = events.drain();
    assert_eq!(received[0], SessionEvent::CursorChanged { step: 5 });
    assert_eq!(received[1], SessionEvent::CursorChanged { step: 10 });
    assert_eq!(received.len(), 3);
    assert!(is_location(10)(&received[2]));
}

#[tokio::test]
async fn test_returning_to_a_step_publishes_once() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, _) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    let mut locations = session.subscribe_to([EventKind::LocationResolved]);

    let first = session.jump_to(5).unwrap();
    session.jump_to(10).unwrap();
    let again = session.jump_to(5).unwrap();
    assert!(!first.published().await);
    assert!(again.published().await);

    tokio::task::yield_now().await;
    let received = locations.drain();
    assert_eq!(received.len(), 1);
    assert!(is_location(5)(&received[0]));
}

#[tokio::test]
async fn test_unload_and_reload_starts_fresh() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, artifact, _) = fixture();
    let session = session_with(provider);
    session.set_artifact(Some(artifact));
    session.start_load(token_tx(1)).await.unwrap();
    let mut events = session.subscribe();

    let pending = session.jump_to(7).unwrap();
    assert!(session.unload());
    assert!(!session.unload());
    assert_eq!(session.jump_to(1).unwrap_err(), NavigationError::NotLoaded);

    session.start_load(token_tx(2)).await.unwrap();
    assert_eq!(session.cursor(), Some(0));
    assert!(!pending.published().await);

    let received = recv_until(&mut events, is_location(0)).await;
    assert_eq!(
        received[..5],
        [
            SessionEvent::CursorChanged { step: 7 },
            SessionEvent::StatusChanged { active: false },
            SessionEvent::Unloaded,
            SessionEvent::StatusChanged { active: true },
            SessionEvent::CursorChanged { step: 0 },
        ]
    );
    assert_eq!(received.len(), 6);
}

#[tokio::test]
async fn test_loading_while_loaded_unloads_first() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();
    session.jump_to(50).unwrap();
    let mut status = session.subscribe_to([EventKind::StatusChanged, EventKind::Unloaded]);

    session.start_load(token_tx(2)).await.unwrap();
    assert_eq!(session.cursor(), Some(0));
    assert_eq!(
        status.drain(),
        vec![
            SessionEvent::StatusChanged { active: false },
            SessionEvent::Unloaded,
            SessionEvent::StatusChanged { active: true },
        ]
    );
}

#[tokio::test]
async fn test_source_edit_unloads() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let (provider, _, _) = fixture();
    let session = session_with(provider);
    session.start_load(token_tx(1)).await.unwrap();

    assert!(session.notify_source_edited());
    assert_eq!(session.status(), SessionStatus::Unloaded);
    assert!(session.loaded_trace().is_none());
}

#[tokio::test]
async fn test_switching_provider_affects_next_load() {
    rdb_common::logging::ensure_test_logging(None);
    info!("Running test");

    let session = session_with(MockProvider::new("empty"));
    let result = session.start_load(TransactionRef::Hash(TxHash::repeat_byte(1))).await;
    assert!(matches!(result, Err(LoadError::TransactionNotFound(_))));

    let (provider, _, _) = fixture();
    session.set_provider(Arc::new(provider));
    let result = session.start_load(TransactionRef::Hash(TxHash::repeat_byte(1))).await;
    assert_eq!(result, Ok(LoadOutcome::Loaded { steps: 100 }));
}
