use common::TxHash;
use serde::{Deserialize, Serialize};

/// Position of a contract log in the chain: block first, then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RelayCursor {
    pub block_number: u64,
    pub log_index: u32,
}

impl RelayCursor {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Identity of a contract log for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessedKey {
    pub event_name: String,
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl ProcessedKey {
    pub fn new(event_name: impl Into<String>, tx_hash: TxHash, log_index: u32) -> Self {
        Self {
            event_name: event_name.into(),
            tx_hash,
            log_index,
        }
    }
}
