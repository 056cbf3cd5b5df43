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

//! Trace acquisition collaborator.
//!
//! The session never talks to a node or VM itself. Whatever executes transactions
//! (a local VM, a node's debug API, a recorded fixture) implements
//! [`TraceProvider`], and the session swaps providers when the execution context
//! changes.

use alloy_primitives::TxHash;
use auto_impl::auto_impl;
use eyre::Result;
use futures::future::BoxFuture;
use tracing::debug;

use rdb_common::types::{Trace, TransactionRecord, TransactionRef};

use crate::LoadError;

/// Source of transactions and their recorded traces
#[auto_impl(&, Arc, Box)]
pub trait TraceProvider: Send + Sync {
    /// Short name for logs (e.g. "vm", "web3")
    fn name(&self) -> &str;

    /// Look up a transaction by hash. `Ok(None)` means it does not exist.
    fn transaction_by_hash(&self, hash: TxHash) -> BoxFuture<'_, Result<Option<TransactionRecord>>>;

    /// Look up a transaction by its position in a block. `Ok(None)` means it does not
    /// exist.
    fn transaction_by_block_index(
        &self,
        block_number: u64,
        tx_index: u64,
    ) -> BoxFuture<'_, Result<Option<TransactionRecord>>>;

    /// Replay the transaction and return its instruction trace
    fn trace(&self, tx: TransactionRecord) -> BoxFuture<'_, Result<Trace>>;
}

/// Turn a transaction reference into a full record, asking the provider if needed
pub(crate) async fn resolve_transaction<P>(
    provider: &P,
    tx: TransactionRef,
) -> Result<TransactionRecord, LoadError>
where
    P: TraceProvider + ?Sized,
{
    let found = match &tx {
        TransactionRef::Record(record) => return Ok(record.clone()),
        TransactionRef::Hash(hash) => provider.transaction_by_hash(*hash).await,
        TransactionRef::BlockIndex { block_number, tx_index } => {
            provider.transaction_by_block_index(*block_number, *tx_index).await
        }
    };

    match found.map_err(LoadError::provider)? {
        Some(record) => {
            debug!(provider = provider.name(), %tx, hash = %record.hash, "Resolved transaction");
            Ok(record)
        }
        None => Err(LoadError::TransactionNotFound(tx.to_string())),
    }
}
