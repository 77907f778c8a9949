use alloy_primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {number} does not extend head {head}")]
    NotContiguous { head: u64, number: u64 },
    #[error("block {number} has unknown parent {parent}")]
    UnknownParent { number: u64, parent: B256 },
    #[error("block {number}: transactions root mismatch (header {expected}, computed {got})")]
    TransactionsRoot {
        number: u64,
        expected: B256,
        got: B256,
    },
}
