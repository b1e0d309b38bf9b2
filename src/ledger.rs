//! Ledger interfaces consumed by the bridge loop
//!
//! A source ledger holds the locked native coin and token; a destination
//! ledger mints and burns their wrapped counterparts.

use crate::error::{BridgeError, BridgeResult};
use crate::events::{Asset, TransferEvent};

use async_trait::async_trait;
use ethers::types::U256;
#[cfg(test)]
use mockall::automock;
use tokio::sync::{mpsc, watch};

/// Result of a submitted ledger transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    /// Fee paid by the relayer wallet
    pub fee: U256,
}

/// Live event feed from one ledger
///
/// Carries one channel per recognized event kind, indexed by asset, plus a
/// side channel for subscription failures.
pub struct Subscription {
    pub native: mpsc::Receiver<TransferEvent>,
    pub token: mpsc::Receiver<TransferEvent>,
    pub errors: mpsc::Receiver<BridgeError>,
}

/// Sending halves of a [`Subscription`], owned by the producer
#[derive(Clone)]
pub struct SubscriptionSender {
    pub native: mpsc::Sender<TransferEvent>,
    pub token: mpsc::Sender<TransferEvent>,
    pub errors: mpsc::Sender<BridgeError>,
}

impl SubscriptionSender {
    pub fn for_asset(&self, asset: Asset) -> &mpsc::Sender<TransferEvent> {
        match asset {
            Asset::Native => &self.native,
            Asset::Token => &self.token,
        }
    }
}

/// Create a connected subscription pair with the given per-channel capacity
pub fn subscription_channel(buffer: usize) -> (SubscriptionSender, Subscription) {
    let (native_tx, native_rx) = mpsc::channel(buffer);
    let (token_tx, token_rx) = mpsc::channel(buffer);
    let (errors_tx, errors_rx) = mpsc::channel(buffer);

    (
        SubscriptionSender {
            native: native_tx,
            token: token_tx,
            errors: errors_tx,
        },
        Subscription {
            native: native_rx,
            token: token_rx,
            errors: errors_rx,
        },
    )
}

/// Ledger where the original assets are locked and unlocked
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceLedger: Send + Sync {
    /// Start streaming `Locked` events; fails fast when the chain is unreachable
    async fn subscribe(&self, shutdown: watch::Receiver<bool>) -> BridgeResult<Subscription>;

    /// Release locked funds to `destination`
    async fn unlock(&self, asset: Asset, destination: &str, amount: U256) -> BridgeResult<TxReceipt>;
}

/// Ledger where wrapped assets are minted and burned
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DestinationLedger: Send + Sync {
    /// Start streaming `Burned` events; fails fast when the chain is unreachable
    async fn subscribe(&self, shutdown: watch::Receiver<bool>) -> BridgeResult<Subscription>;

    /// Mint wrapped funds into the relayer's account
    async fn mint_wrapped(&self, asset: Asset, amount: U256) -> BridgeResult<TxReceipt>;

    /// Forward wrapped funds from the relayer's account to `destination`
    async fn transfer_wrapped(
        &self,
        asset: Asset,
        destination: &str,
        amount: U256,
    ) -> BridgeResult<TxReceipt>;
}
