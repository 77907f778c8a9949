use std::collections::BTreeMap;

use alloy_primitives::B256;
use chain::{Block, BlockBody, BlockHeader};

use crate::error::QueueError;

/// A block whose header is known, waiting for (or holding) its body.
#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub block: Block,
    /// Body not received yet.
    pub syncing: bool,
}

/// Outcome of offering a header to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    /// New entry created, body still needed.
    Inserted,
    /// Same header already queued.
    Existing { syncing: bool },
    /// A different header was queued here and still had no body; it was
    /// dropped in favour of the new one.
    Replaced { previous: B256 },
}

/// Height-ordered staging area between header/body arrival and commit.
///
/// Owned by the engine task; no internal locking.
#[derive(Debug, Default)]
pub struct AssemblyQueue {
    entries: BTreeMap<u64, PendingBlock>,
}

impl AssemblyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, number: u64) -> Option<&PendingBlock> {
        self.entries.get(&number)
    }

    /// Queue `header` at its height.
    ///
    /// A conflicting header overwrites an entry that is still waiting for its
    /// body, so a stalled rival never pins the height. Once the body is in,
    /// the conflict is rejected as a fork.
    pub fn insert_header(&mut self, header: BlockHeader) -> Result<HeaderSlot, QueueError> {
        let number = header.number;
        let mut replaced = None;
        if let Some(existing) = self.entries.get(&number) {
            let existing_hash = existing.block.hash();
            let incoming = header.hash();
            if existing_hash == incoming {
                return Ok(HeaderSlot::Existing {
                    syncing: existing.syncing,
                });
            }
            if !existing.syncing {
                return Err(QueueError::ForkDetected {
                    number,
                    existing: existing_hash,
                    incoming,
                });
            }
            replaced = Some(existing_hash);
        }
        self.entries.insert(
            number,
            PendingBlock {
                block: Block::from_header(header),
                syncing: true,
            },
        );
        Ok(match replaced {
            Some(previous) => HeaderSlot::Replaced { previous },
            None => HeaderSlot::Inserted,
        })
    }

    /// Attach a received body to the queued header at the same height.
    pub fn attach_body(&mut self, body: BlockBody) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(&body.number)
            .ok_or(QueueError::UnknownHeight(body.number))?;
        let expected = entry.block.header.transactions_root;
        let got = body.transactions_root();
        if expected != got {
            return Err(QueueError::TransactionsMismatch {
                number: body.number,
                expected,
                got,
            });
        }
        entry.block.set_transactions(body.transactions);
        entry.syncing = false;
        Ok(())
    }

    /// Remove and return the block at `number` if its body has arrived.
    pub fn take_ready(&mut self, number: u64) -> Option<Block> {
        match self.entries.get(&number) {
            Some(entry) if !entry.syncing => self.entries.remove(&number).map(|e| e.block),
            _ => None,
        }
    }

    /// Hand contiguous completed blocks starting at `next` to `commit`.
    ///
    /// Stops at the first gap, the first block still syncing, or the first
    /// commit error. Returns how many blocks were committed, together with
    /// the error that stopped the drain if any.
    pub fn drain<E>(
        &mut self,
        mut next: u64,
        mut commit: impl FnMut(Block) -> Result<(), E>,
    ) -> (usize, Option<E>) {
        let mut committed = 0;
        while let Some(block) = self.take_ready(next) {
            if let Err(e) = commit(block) {
                return (committed, Some(e));
            }
            committed += 1;
            next += 1;
        }
        (committed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain::types::transactions_root;

    fn header(number: u64, txs: &[Vec<u8>]) -> BlockHeader {
        BlockHeader {
            parent_hash: B256::repeat_byte(number as u8),
            number,
            timestamp: 1_000 + number,
            state_root: B256::ZERO,
            transactions_root: transactions_root(txs),
            extra_data: vec![],
        }
    }

    fn completed(queue: &mut AssemblyQueue, number: u64) {
        let txs = vec![vec![number as u8]];
        queue.insert_header(header(number, &txs)).unwrap();
        queue.attach_body(BlockBody::new(number, txs)).unwrap();
    }

    #[test]
    fn drain_stops_at_gap() {
        let mut queue = AssemblyQueue::new();
        completed(&mut queue, 5);
        completed(&mut queue, 6);
        completed(&mut queue, 8);

        let mut seen = Vec::new();
        let (count, err) = queue.drain::<()>(5, |block| {
            seen.push(block.number());
            Ok(())
        });
        assert_eq!(count, 2);
        assert!(err.is_none());
        assert_eq!(seen, vec![5, 6]);
        assert_eq!(queue.len(), 1);
        assert!(queue.get(8).is_some());
    }

    #[test]
    fn drain_halts_at_syncing_entry() {
        let mut queue = AssemblyQueue::new();
        queue.insert_header(header(5, &[])).unwrap();
        completed(&mut queue, 6);

        let (count, _) = queue.drain::<()>(5, |_| Ok(()));
        assert_eq!(count, 0);
        assert_eq!(queue.len(), 2);
        assert!(queue.get(5).unwrap().syncing);
    }

    #[test]
    fn drain_stops_on_commit_error() {
        let mut queue = AssemblyQueue::new();
        completed(&mut queue, 1);
        completed(&mut queue, 2);
        let (count, err) = queue.drain(1, |_| Err("rejected"));
        assert_eq!(count, 0);
        assert_eq!(err, Some("rejected"));
        assert!(queue.get(2).is_some());
    }

    #[test]
    fn same_header_is_idempotent() {
        let mut queue = AssemblyQueue::new();
        let h = header(3, &[]);
        assert_eq!(queue.insert_header(h.clone()), Ok(HeaderSlot::Inserted));
        assert_eq!(
            queue.insert_header(h),
            Ok(HeaderSlot::Existing { syncing: true })
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn conflicting_header_is_a_fork_once_body_attached() {
        let mut queue = AssemblyQueue::new();
        let txs = vec![vec![3u8]];
        let h = header(3, &txs);
        queue.insert_header(h.clone()).unwrap();
        queue.attach_body(BlockBody::new(3, txs)).unwrap();
        let other = BlockHeader {
            extra_data: b"other".to_vec(),
            ..h.clone()
        };
        let err = queue.insert_header(other.clone()).unwrap_err();
        assert_eq!(
            err,
            QueueError::ForkDetected {
                number: 3,
                existing: h.hash(),
                incoming: other.hash(),
            }
        );
        assert_eq!(queue.get(3).unwrap().block.hash(), h.hash());
        assert!(!queue.get(3).unwrap().syncing);
    }

    #[test]
    fn conflicting_header_replaces_entry_without_body() {
        let mut queue = AssemblyQueue::new();
        let rival = BlockHeader {
            extra_data: b"rival".to_vec(),
            ..header(4, &[])
        };
        let txs = vec![vec![4u8]];
        let honest = header(4, &txs);
        queue.insert_header(rival.clone()).unwrap();

        assert_eq!(
            queue.insert_header(honest.clone()),
            Ok(HeaderSlot::Replaced {
                previous: rival.hash()
            })
        );
        let entry = queue.get(4).unwrap();
        assert_eq!(entry.block.hash(), honest.hash());
        assert!(entry.syncing);

        queue.attach_body(BlockBody::new(4, txs)).unwrap();
        assert_eq!(queue.take_ready(4).map(|b| b.hash()), Some(honest.hash()));
    }

    #[test]
    fn body_checks() {
        let mut queue = AssemblyQueue::new();
        assert_eq!(
            queue.attach_body(BlockBody::new(9, vec![])),
            Err(QueueError::UnknownHeight(9))
        );

        queue.insert_header(header(9, &[vec![1]])).unwrap();
        assert!(matches!(
            queue.attach_body(BlockBody::new(9, vec![vec![2]])),
            Err(QueueError::TransactionsMismatch { number: 9, .. })
        ));
        assert!(queue.get(9).unwrap().syncing);

        queue.attach_body(BlockBody::new(9, vec![vec![1]])).unwrap();
        let entry = queue.get(9).unwrap();
        assert!(!entry.syncing);
        assert_eq!(entry.block.transactions, vec![vec![1u8]]);
    }
}
