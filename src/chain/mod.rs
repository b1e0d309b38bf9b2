//! Chain module - EVM ledgers backed by a `BridgeVault` contract
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Confirmed-block log polling into ledger subscriptions
//! - Vault calls submitted through the transaction sender

pub mod listener;
pub mod provider;

pub use listener::ChainListener;
pub use provider::{ChainProvider, GasPrice};

use crate::config::ChainConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{Asset, MintCall, TransferWrappedCall, UnlockCall, VaultRole};
use crate::ledger::{subscription_channel, DestinationLedger, SourceLedger, Subscription, TxReceipt};
use crate::tx::TransactionSender;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// One side of the bridge: a vault contract on an EVM chain
pub struct EvmLedger {
    provider: Arc<ChainProvider>,
    sender: TransactionSender,
    role: VaultRole,
    event_buffer: usize,
}

impl EvmLedger {
    /// Connect to the chain and prepare the relayer wallet
    pub async fn connect(
        config: ChainConfig,
        wallet: LocalWallet,
        role: VaultRole,
        event_buffer: usize,
    ) -> BridgeResult<Self> {
        info!(
            "Initializing chain {} (ID: {}) as {:?} vault",
            config.name, config.chain_id, role
        );

        let provider = Arc::new(ChainProvider::new(config)?);
        let sender = TransactionSender::new(provider.clone(), wallet).await?;

        info!(
            "Chain {} vault {:?}, relayer wallet {:?}",
            provider.name(),
            provider.contract_address(),
            sender.wallet_address()
        );

        Ok(Self {
            provider,
            sender,
            role,
            event_buffer,
        })
    }

    pub fn provider(&self) -> &Arc<ChainProvider> {
        &self.provider
    }

    async fn start_listener(&self, shutdown: watch::Receiver<bool>) -> BridgeResult<Subscription> {
        let head = self.provider.get_block_number().await?;
        let start_block = self.provider.config().start_block.unwrap_or(head + 1);

        let (events_tx, subscription) = subscription_channel(self.event_buffer);
        let listener = ChainListener::new(self.provider.clone(), self.role, events_tx, start_block);
        tokio::spawn(listener.run(shutdown));

        Ok(subscription)
    }
}

/// Parse a recipient address carried by a transfer event
fn parse_destination(destination: &str) -> BridgeResult<Address> {
    destination
        .trim()
        .parse()
        .map_err(|_| BridgeError::InvalidDestination(destination.to_string()))
}

fn unlock_calldata(asset: Asset, to: Address, amount: U256) -> Bytes {
    UnlockCall {
        asset: asset.code(),
        to,
        amount,
    }
    .encode()
    .into()
}

fn mint_calldata(asset: Asset, amount: U256) -> Bytes {
    MintCall {
        asset: asset.code(),
        amount,
    }
    .encode()
    .into()
}

fn transfer_wrapped_calldata(asset: Asset, to: Address, amount: U256) -> Bytes {
    TransferWrappedCall {
        asset: asset.code(),
        to,
        amount,
    }
    .encode()
    .into()
}

#[async_trait]
impl SourceLedger for EvmLedger {
    async fn subscribe(&self, shutdown: watch::Receiver<bool>) -> BridgeResult<Subscription> {
        self.start_listener(shutdown).await
    }

    async fn unlock(&self, asset: Asset, destination: &str, amount: U256) -> BridgeResult<TxReceipt> {
        let to = parse_destination(destination)?;
        self.sender.send("unlock", unlock_calldata(asset, to, amount)).await
    }
}

#[async_trait]
impl DestinationLedger for EvmLedger {
    async fn subscribe(&self, shutdown: watch::Receiver<bool>) -> BridgeResult<Subscription> {
        self.start_listener(shutdown).await
    }

    async fn mint_wrapped(&self, asset: Asset, amount: U256) -> BridgeResult<TxReceipt> {
        self.sender.send("mint", mint_calldata(asset, amount)).await
    }

    async fn transfer_wrapped(
        &self,
        asset: Asset,
        destination: &str,
        amount: U256,
    ) -> BridgeResult<TxReceipt> {
        let to = parse_destination(destination)?;
        self.sender
            .send("transfer_wrapped", transfer_wrapped_calldata(asset, to, amount))
            .await
    }
}
