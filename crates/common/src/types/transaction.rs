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

use std::fmt;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::types::{CreationSite, ExecutingAddress};

/// The transaction whose trace is debugged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash
    pub hash: TxHash,
    /// Block the transaction was mined in, if known
    pub block_number: Option<u64>,
    /// Position inside the block, if known
    pub transaction_index: Option<u64>,
    /// Sender
    pub from: Address,
    /// Recipient, `None` for contract creations
    pub to: Option<Address>,
    /// Value transferred
    pub value: U256,
    /// Calldata or init code
    pub input: Bytes,
}

impl TransactionRecord {
    /// Whether the transaction deploys a contract
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Address executing in the outermost frame
    pub fn root_address(&self) -> ExecutingAddress {
        match self.to {
            Some(to) => ExecutingAddress::Contract(to),
            None => ExecutingAddress::Creation(CreationSite::Transaction),
        }
    }
}

/// How the user designated the transaction to debug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRef {
    /// A full transaction record, used as is
    Record(TransactionRecord),
    /// A transaction hash to look up
    Hash(TxHash),
    /// A transaction designated by its position in a block
    BlockIndex {
        /// Block number
        block_number: u64,
        /// Index inside the block
        tx_index: u64,
    },
}

impl From<TransactionRecord> for TransactionRef {
    fn from(record: TransactionRecord) -> Self {
        Self::Record(record)
    }
}

impl From<TxHash> for TransactionRef {
    fn from(hash: TxHash) -> Self {
        Self::Hash(hash)
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(record) => write!(f, "{}", record.hash),
            Self::Hash(hash) => write!(f, "{hash}"),
            Self::BlockIndex { block_number, tx_index } => {
                write!(f, "block {block_number} tx #{tx_index}")
            }
        }
    }
}
