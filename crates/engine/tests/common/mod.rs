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

//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{Bytes, TxHash, U256};
use eyre::{bail, eyre, Result};
use futures::{future::BoxFuture, FutureExt};
use rdb_common::{
    test_utils::{breakpoint_fixture, TOKEN, VAULT},
    types::{Breakpoint, CompilationArtifactView, Trace, TransactionRecord},
};
use rdb_engine::{DebugSession, EventSubscriber, SessionContext, SessionEvent, TraceProvider};
use tokio::sync::Notify;

/// In-memory trace provider
#[derive(Debug, Default)]
pub struct MockProvider {
    name: String,
    transactions: Vec<TransactionRecord>,
    traces: HashMap<TxHash, Trace>,
    gate: Option<Arc<Notify>>,
    failure: Option<String>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn with_transaction(mut self, record: TransactionRecord, trace: Trace) -> Self {
        self.traces.insert(record.hash, trace);
        self.transactions.push(record);
        self
    }

    /// Hold every trace request until the gate is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail every trace request
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

impl TraceProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> BoxFuture<'_, Result<Option<TransactionRecord>>> {
        async move { Ok(self.transactions.iter().find(|tx| tx.hash == hash).cloned()) }.boxed()
    }

    fn transaction_by_block_index(
        &self,
        block_number: u64,
        tx_index: u64,
    ) -> BoxFuture<'_, Result<Option<TransactionRecord>>> {
        async move {
            Ok(self
                .transactions
                .iter()
                .find(|tx| {
                    tx.block_number == Some(block_number) && tx.transaction_index == Some(tx_index)
                })
                .cloned())
        }
        .boxed()
    }

    fn trace(&self, tx: TransactionRecord) -> BoxFuture<'_, Result<Trace>> {
        async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(message) = &self.failure {
                bail!("{message}");
            }
            self.traces.get(&tx.hash).cloned().ok_or_else(|| eyre!("no trace for {}", tx.hash))
        }
        .boxed()
    }
}

/// A transaction calling the fixture token, mined at block 7
pub fn token_tx(id: u8) -> TransactionRecord {
    TransactionRecord {
        hash: TxHash::repeat_byte(id),
        block_number: Some(7),
        transaction_index: Some(id as u64),
        from: VAULT,
        to: Some(TOKEN),
        value: U256::ZERO,
        input: Bytes::new(),
    }
}

/// Provider serving the breakpoint fixture trace for `token_tx(1)` and `token_tx(2)`
pub fn fixture() -> (MockProvider, Arc<CompilationArtifactView>, Breakpoint) {
    let (trace, artifact, breakpoint) = breakpoint_fixture();
    let provider = MockProvider::new("mock")
        .with_transaction(token_tx(1), trace.clone())
        .with_transaction(token_tx(2), trace);
    (provider, Arc::new(artifact), breakpoint)
}

pub fn session_with(provider: MockProvider) -> DebugSession {
    DebugSession::new(SessionContext::new(Arc::new(provider)))
}

/// Receive events until one matches `last`, returning all of them
pub async fn recv_until(
    events: &mut EventSubscriber,
    last: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut received = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event bus closed");
        let done = last(&event);
        received.push(event);
        if done {
            return received;
        }
    }
}
