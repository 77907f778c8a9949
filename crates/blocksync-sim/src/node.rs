use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::keccak256;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{debug, info, warn};

use blocksync::{Checkpoint, SyncConfig, SyncHandle, Syncer};
use chain::types::transactions_root;
use chain::{Block, BlockHeader, MemoryChain};
use wire::PeerId;

use crate::config::RuntimeConfig;
use crate::network::{short, Hub};

const GENESIS_TIMESTAMP: u64 = 1_600_000_000;
const BLOCK_TIME_SECS: u64 = 13;

/// Outcome of a finished simulation.
#[derive(Debug)]
pub struct SimReport {
    pub target_height: u64,
    pub best_height: u64,
    pub forks: usize,
    pub elapsed: Duration,
}

/// Several source nodes at different heights and one empty target node,
/// all running the syncer over an in-memory hub.
pub struct Simulation {
    config: RuntimeConfig,
}

impl Simulation {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Run until the target holds the tallest source's head, the timeout
    /// passes, or Ctrl+C.
    pub async fn run(&mut self) -> Result<SimReport, Box<dyn std::error::Error>> {
        let started = Instant::now();
        let genesis = BlockHeader::genesis(GENESIS_TIMESTAMP);
        let best_height = self.config.sources.iter().copied().max().unwrap_or(0);
        let canonical = build_chain(&genesis, best_height);
        let best_hash = canonical
            .last()
            .map(|b| b.hash())
            .unwrap_or_else(|| genesis.hash());

        let hub = Hub::new(self.config.max_latency);
        let mut handles: Vec<SyncHandle> = Vec::new();
        let mut source_ids: Vec<PeerId> = Vec::new();

        for (i, height) in self.config.sources.iter().enumerate() {
            let store = Arc::new(MemoryChain::new(genesis.clone()));
            for block in &canonical[..*height as usize] {
                store.append(block.clone(), true)?;
            }
            let id = node_id(i as u8 + 1);
            let transport = hub.join(id, Arc::clone(&store));
            let syncer = Syncer::new(
                self.sync_config(None),
                Arc::clone(&transport),
                store,
                transport,
            );
            handles.push(syncer.start());
            source_ids.push(id);
            info!(node = %short(&id), height, "source node started");
        }

        let checkpoint = self.config.checkpoint.map(|number| Checkpoint {
            number,
            hash: if number == 0 {
                genesis.hash()
            } else {
                canonical[number as usize - 1].hash()
            },
        });
        let target_id = node_id(0);
        let target_store = Arc::new(MemoryChain::new(genesis.clone()));
        let target_transport = hub.join(target_id, Arc::clone(&target_store));
        let target = Syncer::new(
            self.sync_config(checkpoint),
            Arc::clone(&target_transport),
            Arc::clone(&target_store),
            Arc::clone(&target_transport),
        )
        .start();
        let mut forks = target.subscribe_forks();
        info!(
            node = %short(&target_transport.id()),
            best_height,
            sources = source_ids.len(),
            "target node started"
        );

        for id in &source_ids {
            hub.connect(target_id, *id);
        }

        let mut progress = interval(Duration::from_secs(1));
        progress.tick().await; // skip first immediate tick
        let churn_every = self.config.churn_interval;
        let mut churn = interval(churn_every.unwrap_or(Duration::from_secs(3600)));
        churn.tick().await; // skip first immediate tick
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut fork_count = 0usize;
        let mut forks_open = true;
        let mut timed_out = false;

        while target_store.head_number() < best_height {
            tokio::select! {
                _ = progress.tick() => {
                    info!(
                        height = target_store.head_number(),
                        best_height,
                        peers = target.peers().len(),
                        "sync progress"
                    );
                }
                _ = churn.tick(), if churn_every.is_some() => {
                    let idx = rand::thread_rng().gen_range(0..source_ids.len());
                    let id = source_ids[idx];
                    hub.disconnect(target_id, id);
                    let hub = Arc::clone(&hub);
                    let pause = churn_every.unwrap_or_default() / 2;
                    tokio::spawn(async move {
                        tokio::time::sleep(pause).await;
                        hub.connect(target_id, id);
                    });
                    debug!(node = %short(&id), "churned source link");
                }
                notice = forks.recv(), if forks_open => match notice {
                    Ok(notice) => {
                        fork_count += 1;
                        warn!(number = notice.number, peer = %short(&notice.peer), "fork notice");
                    }
                    Err(RecvError::Lagged(skipped)) => fork_count += skipped as usize,
                    Err(RecvError::Closed) => forks_open = false,
                },
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        target.stop();
        for handle in &handles {
            handle.stop();
        }
        target.join().await;
        for handle in handles {
            handle.join().await;
        }

        let report = SimReport {
            target_height: target_store.head_number(),
            best_height,
            forks: fork_count,
            elapsed: started.elapsed(),
        };
        if timed_out {
            return Err(format!(
                "target reached {} of {} before the timeout",
                report.target_height, best_height
            )
            .into());
        }
        if report.target_height >= best_height && target_store.head().hash() != best_hash {
            return Err(format!(
                "target head {} differs from source head {}",
                target_store.head().hash(),
                best_hash
            )
            .into());
        }
        info!(
            height = report.target_height,
            forks = report.forks,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "simulation finished"
        );
        Ok(report)
    }

    fn sync_config(&self, checkpoint: Option<Checkpoint>) -> SyncConfig {
        SyncConfig {
            force_sync_interval: self.config.force_sync_interval,
            force_header_interval: self.config.force_header_interval,
            serve_concurrency: self.config.serve_concurrency,
            checkpoint,
            ..SyncConfig::default()
        }
    }
}

fn node_id(n: u8) -> PeerId {
    let mut id = [0u8; 64];
    id[0] = 0x5E;
    id[1] = n;
    id
}

/// Blocks 1..=len on top of `genesis`, with a few synthetic transactions each.
fn build_chain(genesis: &BlockHeader, len: u64) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(len as usize);
    let mut parent = genesis.clone();
    for number in 1..=len {
        let transactions: Vec<Vec<u8>> = (0..number % 4)
            .map(|i| [number.to_be_bytes().as_slice(), &[i as u8]].concat())
            .collect();
        let header = BlockHeader {
            parent_hash: parent.hash(),
            number,
            timestamp: parent.timestamp + BLOCK_TIME_SECS,
            state_root: keccak256(number.to_be_bytes()),
            transactions_root: transactions_root(&transactions),
            extra_data: b"blocksync-sim".to_vec(),
        };
        parent = header.clone();
        blocks.push(Block::new(header, transactions));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sources: Vec<u64>) -> RuntimeConfig {
        RuntimeConfig {
            sources,
            max_latency: Duration::from_millis(3),
            timeout: Duration::from_secs(30),
            force_sync_interval: Duration::from_secs(1),
            force_header_interval: Duration::from_secs(5),
            churn_interval: None,
            checkpoint: None,
            serve_concurrency: 8,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn chain_links_parents() {
        let genesis = BlockHeader::genesis(GENESIS_TIMESTAMP);
        let blocks = build_chain(&genesis, 5);
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].header.parent_hash, genesis.hash());
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.parent_hash, pair[0].hash());
        }
        assert_eq!(blocks[2].transactions.len(), 3);
    }

    #[tokio::test]
    async fn target_catches_up_with_tallest_source() {
        let mut sim = Simulation::new(config(vec![40, 90, 70]));
        let report = sim.run().await.unwrap();
        assert_eq!(report.target_height, 90);
        assert_eq!(report.forks, 0);
    }

    #[tokio::test]
    async fn target_validates_checkpoint() {
        let mut cfg = config(vec![30, 60]);
        cfg.checkpoint = Some(20);
        let report = Simulation::new(cfg).run().await.unwrap();
        assert_eq!(report.target_height, 60);
    }

    #[tokio::test]
    async fn target_syncs_across_batches() {
        let report = Simulation::new(config(vec![450])).run().await.unwrap();
        assert_eq!(report.target_height, 450);
    }
}
