pub mod error;
pub mod store;
pub mod types;

pub use error::ChainError;
pub use store::MemoryChain;
pub use types::{Block, BlockBody, BlockHeader, Transaction};
