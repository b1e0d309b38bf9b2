//! Gas estimation and fee accounting

use crate::chain::{ChainProvider, GasPrice};
use crate::error::BridgeResult;

use ethers::types::{TransactionReceipt, U256};
use tracing::debug;

/// Gas estimator for vault calls
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Pad a node-provided gas estimate
    pub fn buffered_gas_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for a chain
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> BridgeResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.buffer_price(gas_price);

        debug!("Gas price for chain {}: {:?}", provider.name(), buffered);
        Ok(buffered)
    }

    fn buffer_price(&self, gas_price: GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }

    /// Fee actually paid for a mined transaction
    pub fn fee_paid(receipt: &TransactionReceipt) -> U256 {
        let gas_used = receipt.gas_used.unwrap_or_default();
        let price = receipt.effective_gas_price.unwrap_or_default();
        gas_used * price
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
