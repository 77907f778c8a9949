use alloy_primitives::B256;
use thiserror::Error;

use wire::PeerId;

/// Failure reported by a [`crate::Transport`] when delivering a message.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {} is not connected", short_id(.0))]
    NotConnected(PeerId),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerSetError {
    #[error("peer set is closed")]
    Closed,
    #[error("peer {} is already registered", short_id(.0))]
    AlreadyRegistered(PeerId),
    #[error("peer {} is not registered", short_id(.0))]
    NotRegistered(PeerId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("fork detected at height {number}: queued {existing}, received {incoming}")]
    ForkDetected {
        number: u64,
        existing: B256,
        incoming: B256,
    },
    #[error("no queued header at height {0}")]
    UnknownHeight(u64),
    #[error("transactions root mismatch at height {number}: header {expected}, body {got}")]
    TransactionsMismatch {
        number: u64,
        expected: B256,
        got: B256,
    },
}

/// Failure of an outbound request or reply.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("wire: {0}")]
    Wire(#[from] wire::Error),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

pub(crate) fn short_id(id: &PeerId) -> String {
    hex::encode(&id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_wraps_transport_and_wire() {
        let err: SyncError = TransportError::NotConnected([0xAB; 64]).into();
        assert!(matches!(err, SyncError::Transport(TransportError::NotConnected(_))));
        assert_eq!(err.to_string(), "transport: peer abababababababab is not connected");

        let err: SyncError = wire::Error::Rlp("truncated list".into()).into();
        assert!(matches!(err, SyncError::Wire(wire::Error::Rlp(_))));
        assert_eq!(err.to_string(), "wire: RLP error: truncated list");
    }
}
