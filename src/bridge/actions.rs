//! Ledger actions used as perform and rollback steps

use crate::error::BridgeResult;
use crate::events::{Asset, TransferEvent};
use crate::ledger::{DestinationLedger, SourceLedger};

use std::sync::Arc;
use tracing::{error, info, warn};

/// Mint the wrapped asset, then forward it to the event's destination
///
/// A failed transfer after a successful mint is reported as a failure of the
/// whole action, leaving the minted amount on the relayer account.
pub async fn mint_and_forward(
    ledger: Arc<dyn DestinationLedger>,
    asset: Asset,
    symbol: String,
    event: TransferEvent,
) -> BridgeResult<()> {
    let minted = ledger
        .mint_wrapped(asset, event.amount)
        .await
        .map_err(|e| {
            error!(error = %e, "Mint {} failed", symbol);
            e
        })?;

    info!(
        user = %event.user,
        amount = %event.amount,
        destination = %event.destination,
        tx_hash = %minted.tx_hash,
        fee = %minted.fee,
        "{} minted",
        symbol
    );

    let transferred = ledger
        .transfer_wrapped(asset, &event.destination, event.amount)
        .await
        .map_err(|e| {
            warn!(
                error = %e,
                mint_tx = %minted.tx_hash,
                amount = %event.amount,
                "{} minted but not forwarded",
                symbol
            );
            e
        })?;

    info!(
        user = %event.user,
        amount = %event.amount,
        destination = %event.destination,
        tx_hash = %transferred.tx_hash,
        fee = %transferred.fee,
        "{} transferred",
        symbol
    );

    Ok(())
}

/// Release locked funds on the source ledger to the event's destination
pub async fn unlock(
    ledger: Arc<dyn SourceLedger>,
    asset: Asset,
    symbol: String,
    event: TransferEvent,
) -> BridgeResult<()> {
    let unlocked = ledger
        .unlock(asset, &event.destination, event.amount)
        .await
        .map_err(|e| {
            error!(error = %e, "Unlock {} failed", symbol);
            e
        })?;

    info!(
        user = %event.user,
        amount = %event.amount,
        destination = %event.destination,
        tx_hash = %unlocked.tx_hash,
        fee = %unlocked.fee,
        "{} unlocked",
        symbol
    );

    Ok(())
}
