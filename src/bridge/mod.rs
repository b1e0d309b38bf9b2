//! Bridge loop - dispatches transfer events from both ledgers
//!
//! The loop multiplexes the four event kinds and both subscription error
//! channels. Every transfer event becomes one operation spawned into the
//! loop's task set, so slow ledger calls do not block ingestion. On shutdown
//! the loop stops dispatching and waits for in-flight operations to report
//! their outcomes, bounded by a grace period.

pub mod actions;
pub mod checker;

pub use checker::check_operation;

use crate::config::AssetsConfig;
use crate::coordination::{
    action, checker as make_checker, Action, AtomicCoordinator, CoordinatorConfig, OperationConfig,
    Outcome,
};
use crate::error::BridgeResult;
use crate::events::{Asset, EventKind, TransferEvent};
use crate::ledger::{DestinationLedger, SourceLedger};
use crate::metrics;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct Bridge {
    source: Arc<dyn SourceLedger>,
    destination: Arc<dyn DestinationLedger>,
    coordinator: AtomicCoordinator,
    assets: AssetsConfig,
    dispatched: AtomicU64,
    /// How long shutdown waits for in-flight operations
    shutdown_grace: Duration,
}

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

impl Bridge {
    /// Create a bridge whose operations are observed by [`check_operation`]
    pub fn new(
        source: Arc<dyn SourceLedger>,
        destination: Arc<dyn DestinationLedger>,
        assets: AssetsConfig,
    ) -> Self {
        let coordinator = AtomicCoordinator::new(CoordinatorConfig {
            checker: Some(make_checker(check_operation)),
        });
        Self::with_coordinator(source, destination, assets, coordinator)
    }

    pub fn with_coordinator(
        source: Arc<dyn SourceLedger>,
        destination: Arc<dyn DestinationLedger>,
        assets: AssetsConfig,
        coordinator: AtomicCoordinator,
    ) -> Self {
        Self {
            source,
            destination,
            coordinator,
            assets,
            dispatched: AtomicU64::new(0),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Number of operations launched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Subscribe to both ledgers and dispatch events until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BridgeResult<()> {
        let mut source_sub = self.source.subscribe(shutdown.clone()).await?;
        let mut destination_sub = self.destination.subscribe(shutdown.clone()).await?;
        let mut in_flight = JoinSet::new();

        info!("Bridge is watching");

        loop {
            tokio::select! {
                biased;

                // Break loop on shutdown
                _ = cancelled(&mut shutdown) => break,

                // Handle events from ledgers and act on the opposite ledger
                Some(event) = source_sub.native.recv() => self.dispatch(&mut in_flight, EventKind::NativeLocked, event),
                Some(event) = source_sub.token.recv() => self.dispatch(&mut in_flight, EventKind::TokenLocked, event),
                Some(event) = destination_sub.native.recv() => self.dispatch(&mut in_flight, EventKind::WrappedNativeBurned, event),
                Some(event) = destination_sub.token.recv() => self.dispatch(&mut in_flight, EventKind::WrappedTokenBurned, event),

                // Handle errors raised by the subscriptions
                Some(e) = source_sub.errors.recv() => {
                    error!(error = %e, retryable = e.is_retryable(), "Source subscription error");
                    metrics::record_subscription_error("source");
                }
                Some(e) = destination_sub.errors.recv() => {
                    error!(error = %e, retryable = e.is_retryable(), "Destination subscription error");
                    metrics::record_subscription_error("destination");
                }

                // Reap finished operations
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Operation task ended abnormally");
                    }
                }
            }
        }

        // Stop listeners from feeding a loop that no longer reads
        drop(source_sub);
        drop(destination_sub);

        self.drain(in_flight).await;
        info!(dispatched = self.dispatched(), "Bridge loop stopped");
        Ok(())
    }

    /// Wait for in-flight operations, aborting whatever outlives the grace period
    async fn drain(&self, mut in_flight: JoinSet<Outcome>) {
        if in_flight.is_empty() {
            return;
        }

        info!(
            in_flight = in_flight.len(),
            grace_secs = self.shutdown_grace.as_secs(),
            "Waiting for in-flight operations"
        );

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Operation task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            error!(
                abandoned = in_flight.len(),
                "Shutdown grace period elapsed, abandoning in-flight operations"
            );
            in_flight.shutdown().await;
        }
    }

    /// Build the operation for an event kind and launch it
    fn dispatch(&self, in_flight: &mut JoinSet<Outcome>, kind: EventKind, event: TransferEvent) {
        metrics::record_event(kind);

        let config = self.operation_for(kind);
        let name = config.name.clone();
        let operation = self.coordinator.new_operation(config);

        debug!(
            operation_id = %operation.id(),
            operation = %name,
            event = %event,
            "Dispatching operation"
        );

        metrics::record_operation_dispatched(&name);
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        in_flight.spawn(operation.run(event));
    }

    /// Perform/rollback pair for an event kind; rollback always inverts perform
    pub fn operation_for(&self, kind: EventKind) -> OperationConfig {
        let asset = kind.asset();
        let original = self.symbol(asset);
        let wrapped = self.wrapped_symbol(asset);

        match kind {
            EventKind::NativeLocked | EventKind::TokenLocked => OperationConfig {
                name: format!("swap {} to {}", original, wrapped),
                perform: self.mint_action(asset),
                rollback: self.unlock_action(asset),
            },
            EventKind::WrappedNativeBurned | EventKind::WrappedTokenBurned => OperationConfig {
                name: format!("swap {} to {}", wrapped, original),
                perform: self.unlock_action(asset),
                rollback: self.mint_action(asset),
            },
        }
    }

    fn mint_action(&self, asset: Asset) -> Action {
        let ledger = self.destination.clone();
        let symbol = self.wrapped_symbol(asset).to_string();
        action(move |event| actions::mint_and_forward(ledger.clone(), asset, symbol.clone(), event))
    }

    fn unlock_action(&self, asset: Asset) -> Action {
        let ledger = self.source.clone();
        let symbol = self.symbol(asset).to_string();
        action(move |event| actions::unlock(ledger.clone(), asset, symbol.clone(), event))
    }

    fn symbol(&self, asset: Asset) -> &str {
        match asset {
            Asset::Native => &self.assets.native_symbol,
            Asset::Token => &self.assets.token_symbol,
        }
    }

    fn wrapped_symbol(&self, asset: Asset) -> &str {
        match asset {
            Asset::Native => &self.assets.wrapped_native_symbol,
            Asset::Token => &self.assets.wrapped_token_symbol,
        }
    }
}

/// Resolves once shutdown is requested or the shutdown sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
