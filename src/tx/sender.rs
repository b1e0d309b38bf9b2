//! Transaction sender for vault contract calls

use super::{GasEstimator, NonceManager};
use crate::chain::{ChainProvider, GasPrice};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::TxReceipt;

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Signs and submits vault calls, waiting for them to be mined
pub struct TransactionSender {
    provider: Arc<ChainProvider>,
    wallet: LocalWallet,
    nonce_manager: NonceManager,
    gas_estimator: GasEstimator,
}

/// Where a submission failed, which decides what happens to its nonce
enum SubmitError {
    /// Never reached the chain; the nonce is reused
    NotBroadcast(BridgeError),
    /// Mined and reverted; the nonce is consumed
    Reverted(BridgeError),
    /// Broadcast but no receipt; the chain decides whether the nonce was used
    Unconfirmed(BridgeError),
}

impl TransactionSender {
    /// Create a sender, reading the wallet's current nonce from the chain
    pub async fn new(provider: Arc<ChainProvider>, wallet: LocalWallet) -> BridgeResult<Self> {
        let wallet = wallet.with_chain_id(provider.chain_id());
        let on_chain_nonce = provider.get_transaction_count(wallet.address()).await?;

        info!(
            "Transaction sender for chain {} initialized with wallet: {:?}",
            provider.name(),
            wallet.address()
        );

        Ok(Self {
            nonce_manager: NonceManager::new(provider.name(), on_chain_nonce),
            provider,
            wallet,
            gas_estimator: GasEstimator::new(),
        })
    }

    /// Relayer wallet address
    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    /// Submit a call to the vault contract and wait for its receipt
    pub async fn send(&self, method: &str, calldata: Bytes) -> BridgeResult<TxReceipt> {
        let chain = self.provider.name().to_string();
        let nonce = self.nonce_manager.next().await;

        match self.submit(method, calldata, nonce).await {
            Ok(receipt) => {
                self.nonce_manager.confirm(nonce).await;
                crate::metrics::record_tx_submitted(&chain, method);
                let fee = u128::try_from(receipt.fee).map(|fee| fee as f64).unwrap_or(f64::MAX);
                crate::metrics::record_fee_paid(&chain, fee);
                Ok(receipt)
            }
            Err(SubmitError::NotBroadcast(e)) => {
                self.nonce_manager.release(nonce).await;
                if e.to_string().contains("nonce too low") {
                    warn!("Nonce too low on chain {}, syncing", chain);
                    if let Ok(on_chain) = self.provider.get_transaction_count(self.wallet.address()).await {
                        self.nonce_manager.sync(on_chain).await;
                    }
                }
                crate::metrics::record_tx_failed(&chain, method);
                Err(e)
            }
            Err(SubmitError::Reverted(e)) => {
                self.nonce_manager.confirm(nonce).await;
                crate::metrics::record_tx_failed(&chain, method);
                Err(e)
            }
            Err(SubmitError::Unconfirmed(e)) => {
                match self.provider.get_transaction_count(self.wallet.address()).await {
                    Ok(on_chain) => {
                        self.nonce_manager.reconcile(nonce, on_chain).await;
                    }
                    Err(sync_error) => {
                        warn!(
                            "Cannot settle nonce {} on chain {}: {}",
                            nonce, chain, sync_error
                        );
                        self.nonce_manager.forget(nonce);
                    }
                }
                crate::metrics::record_tx_failed(&chain, method);
                Err(e)
            }
        }
    }

    async fn submit(&self, method: &str, calldata: Bytes, nonce: u64) -> Result<TxReceipt, SubmitError> {
        let chain = self.provider.name().to_string();

        let gas_price = self
            .gas_estimator
            .get_gas_price(&self.provider)
            .await
            .map_err(SubmitError::NotBroadcast)?;

        let mut tx = self.build_tx(calldata, nonce, &gas_price);
        let gas_limit = self
            .provider
            .estimate_gas(&tx)
            .await
            .map_err(SubmitError::NotBroadcast)?;
        tx.set_gas(self.gas_estimator.buffered_gas_limit(gas_limit));

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SubmitError::NotBroadcast(BridgeError::Wallet(e.to_string())))?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .provider
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| {
                SubmitError::NotBroadcast(BridgeError::Transaction {
                    chain: chain.clone(),
                    message: e.to_string(),
                })
            })?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        self.nonce_manager.mark_pending(nonce, &tx_hash);
        debug!("{} sent on chain {}: {} (nonce {})", method, chain, tx_hash, nonce);

        let confirmations = self.provider.config().confirmation_blocks.max(1) as usize;
        let wait = Duration::from_secs(self.provider.config().tx_timeout_secs);

        let receipt = match timeout(wait, pending.confirmations(confirmations)).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                return Err(SubmitError::Unconfirmed(BridgeError::Transaction {
                    chain,
                    message: format!("transaction {} dropped from mempool", tx_hash),
                }))
            }
            Ok(Err(e)) => {
                return Err(SubmitError::Unconfirmed(BridgeError::Transaction {
                    chain,
                    message: e.to_string(),
                }))
            }
            Err(_) => {
                return Err(SubmitError::Unconfirmed(BridgeError::Timeout {
                    operation: format!("{} receipt {}", method, tx_hash),
                }))
            }
        };

        if receipt.status != Some(1u64.into()) {
            return Err(SubmitError::Reverted(BridgeError::Reverted { chain, tx_hash }));
        }

        Ok(TxReceipt {
            tx_hash,
            fee: GasEstimator::fee_paid(&receipt),
        })
    }

    /// Build a vault call with the given nonce and gas price
    fn build_tx(&self, calldata: Bytes, nonce: u64, gas_price: &GasPrice) -> TypedTransaction {
        let contract_address = self.provider.contract_address();
        let chain_id = self.provider.chain_id();

        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(contract_address)
                    .data(calldata)
                    .nonce(nonce)
                    .gas_price(*price)
                    .chain_id(chain_id),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(contract_address)
                    .data(calldata)
                    .nonce(nonce)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(chain_id),
            ),
        }
    }
}
