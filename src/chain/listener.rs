//! Vault event listener using HTTP log polling

use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventParser, VaultRole};
use crate::ledger::SubscriptionSender;

use super::ChainProvider;

use ethers::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Polls one vault contract and feeds decoded events into a subscription
pub struct ChainListener {
    provider: Arc<ChainProvider>,
    parser: EventParser,
    sender: SubscriptionSender,
    /// First block not yet scanned
    next_block: u64,
}

impl ChainListener {
    pub fn new(
        provider: Arc<ChainProvider>,
        role: VaultRole,
        sender: SubscriptionSender,
        start_block: u64,
    ) -> Self {
        Self {
            provider,
            parser: EventParser::new(role),
            sender,
            next_block: start_block,
        }
    }

    /// Main listening loop; ends on shutdown or when the subscriber goes away
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let chain = self.provider.name().to_string();
        let poll_interval = Duration::from_millis(self.provider.config().poll_interval_ms);

        info!("Listening on chain {} from block {}", chain, self.next_block);

        loop {
            if *shutdown.borrow() || self.sender.errors.is_closed() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                warn!("Polling chain {} failed: {}", chain, e);
                let report = BridgeError::Subscription {
                    chain: chain.clone(),
                    message: e.to_string(),
                };
                if self.sender.errors.send(report).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Listener for chain {} stopped", chain);
    }

    /// Scan the next confirmed block range once
    async fn poll_once(&mut self) -> BridgeResult<()> {
        let config = self.provider.config();
        let current_block = self.provider.get_block_number().await?;

        // A block with `confirmation_blocks` confirmations counting itself
        let confirmed_block = current_block.saturating_sub(config.confirmation_blocks.saturating_sub(1));
        if confirmed_block < self.next_block {
            return Ok(());
        }

        // Limit range to prevent huge queries
        let from_block = self.next_block;
        let to_block = std::cmp::min(confirmed_block, from_block + config.max_block_range - 1);

        debug!(
            "Chain {}: Processing blocks {} to {}",
            config.name, from_block, to_block
        );

        let filter = Filter::new()
            .address(self.provider.contract_address())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await?;
        for log in logs {
            match self.parser.parse_log(&log) {
                Ok(Some((kind, event))) => {
                    debug!("Chain {} {} event: {}", config.name, kind.name(), event);
                    self.sender
                        .for_asset(kind.asset())
                        .send(event)
                        .await
                        .map_err(|_| BridgeError::Internal("subscription closed".to_string()))?;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Skipping undecodable log {:?} on chain {}: {}",
                    log.transaction_hash, config.name, e
                ),
            }
        }

        crate::metrics::record_blocks_scanned(&config.name, to_block - from_block + 1);
        self.next_block = to_block + 1;
        Ok(())
    }
}
