//! Chain provider with multi-RPC support and automatic failover

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{BridgeError, BridgeResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// Parsed vault contract address
    contract_address: Address,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider; performs no network calls
    pub fn new(config: ChainConfig) -> BridgeResult<Self> {
        let contract_address: Address = config
            .contract_address
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid contract address: {}", e)))?;

        let mut http_providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(config.poll_interval_ms));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BridgeError::ChainConnection {
                chain: config.name.clone(),
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            contract_address,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.name, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> BridgeResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Get logs for a filter with failover
    pub async fn get_logs(&self, filter: &Filter) -> BridgeResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get logs"))
    }

    /// Transaction count of an account, including pending transactions
    pub async fn get_transaction_count(&self, address: Address) -> BridgeResult<u64> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map(|nonce| nonce.as_u64())
            .map_err(|e| BridgeError::Nonce {
                chain: self.config.name.clone(),
                message: e.to_string(),
            })
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> BridgeResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| BridgeError::GasEstimation(e.to_string()))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> BridgeResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| BridgeError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(std::cmp::min(price, self.max_gas_price())))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> BridgeResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| BridgeError::GasEstimation(e.to_string()))?
            .ok_or_else(|| BridgeError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| BridgeError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = std::cmp::min(base_fee * 2 + priority_fee, self.max_gas_price());
        let priority_fee = std::cmp::min(priority_fee, max_fee);

        Ok((max_fee, priority_fee))
    }

    fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.name, e);
                false
            }
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn connection_error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::ChainConnection {
            chain: self.config.name.clone(),
            message: message.into(),
        }
    }
}

/// Gas price types
#[derive(Debug, Clone)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}
