pub mod bytes;
pub mod error;
pub mod messages;
pub mod rlp;

pub use error::Error;
pub use messages::{GetBlockHeadersData, HashOrNumber, P2pMessage, PeerId};
