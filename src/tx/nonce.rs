//! Nonce management for reliable transaction submission
//!
//! Operations run concurrently and share one relayer wallet per ledger, so
//! nonces are allocated locally instead of being read from the chain for
//! every transaction.

use dashmap::DashMap;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct NonceState {
    /// Next never-used nonce
    current: u64,
    /// Allocated nonces returned unused, reused lowest first
    released: BTreeSet<u64>,
    /// Highest nonce known to be mined
    confirmed: Option<u64>,
}

/// Allocates nonces for one wallet on one chain
pub struct NonceManager {
    chain: String,
    state: Mutex<NonceState>,
    /// Broadcast transactions: nonce -> tx_hash
    pending: DashMap<u64, String>,
}

impl NonceManager {
    /// Create a manager starting at the wallet's on-chain transaction count
    pub fn new(chain: impl Into<String>, on_chain_nonce: u64) -> Self {
        let chain = chain.into();
        debug!("Initialized nonce for chain {}: {}", chain, on_chain_nonce);

        Self {
            chain,
            state: Mutex::new(NonceState {
                current: on_chain_nonce,
                released: BTreeSet::new(),
                confirmed: on_chain_nonce.checked_sub(1),
            }),
            pending: DashMap::new(),
        }
    }

    /// Allocate the next nonce
    pub async fn next(&self) -> u64 {
        let mut state = self.state.lock().await;

        let nonce = match state.released.pop_first() {
            Some(reused) => reused,
            None => {
                let nonce = state.current;
                state.current += 1;
                nonce
            }
        };

        debug!("Allocated nonce {} for chain {}", nonce, self.chain);
        nonce
    }

    /// Record a broadcast transaction
    pub fn mark_pending(&self, nonce: u64, tx_hash: &str) {
        self.pending.insert(nonce, tx_hash.to_string());
    }

    /// Confirm a nonce (transaction mined)
    pub async fn confirm(&self, nonce: u64) {
        self.pending.remove(&nonce);

        let mut state = self.state.lock().await;
        if state.confirmed.map_or(true, |confirmed| nonce > confirmed) {
            state.confirmed = Some(nonce);
        }
    }

    /// Return a nonce that was allocated but never broadcast
    pub async fn release(&self, nonce: u64) {
        self.pending.remove(&nonce);

        let mut state = self.state.lock().await;
        if nonce + 1 == state.current {
            state.current = nonce;
            // Trailing released nonces collapse into the counter
            while let Some(&last) = state.released.last() {
                if last + 1 != state.current {
                    break;
                }
                state.released.remove(&last);
                state.current = last;
            }
        } else if nonce < state.current {
            state.released.insert(nonce);
        }
    }

    /// Settle a broadcast nonce whose receipt never arrived
    ///
    /// `on_chain_nonce` is the wallet's pending transaction count. A nonce
    /// below it was taken by the chain; anything else was dropped and is
    /// handed out again. Returns whether the nonce was consumed.
    pub async fn reconcile(&self, nonce: u64, on_chain_nonce: u64) -> bool {
        if nonce < on_chain_nonce {
            self.pending.remove(&nonce);
            self.sync(on_chain_nonce).await;
            true
        } else {
            warn!(
                "Nonce {} on chain {} was dropped, reusing it",
                nonce, self.chain
            );
            self.release(nonce).await;
            false
        }
    }

    /// Stop tracking a broadcast nonce whose fate cannot be determined
    pub fn forget(&self, nonce: u64) {
        self.pending.remove(&nonce);
    }

    /// Align local state with the on-chain transaction count
    pub async fn sync(&self, on_chain_nonce: u64) {
        let mut state = self.state.lock().await;

        let expected = state.confirmed.map_or(0, |confirmed| confirmed + 1);
        if on_chain_nonce > expected {
            warn!(
                "Nonce gap detected on chain {}: expected {}, got {}",
                self.chain, expected, on_chain_nonce
            );
        }

        // Clear pending transactions that have been mined
        self.pending.retain(|nonce, _| *nonce >= on_chain_nonce);
        state.released.retain(|nonce| *nonce >= on_chain_nonce);
        state.confirmed = on_chain_nonce.checked_sub(1);

        if state.current < on_chain_nonce {
            state.current = on_chain_nonce;
        }
    }

    /// Number of broadcast transactions not yet confirmed
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocates_sequential_nonces() {
        let manager = NonceManager::new("test", 5);
        assert_eq!(manager.next().await, 5);
        assert_eq!(manager.next().await, 6);
        assert_eq!(manager.next().await, 7);
    }

    #[tokio::test]
    async fn test_released_nonce_is_reused_first() {
        let manager = NonceManager::new("test", 0);
        let first = manager.next().await;
        let _second = manager.next().await;

        manager.release(first).await;
        assert_eq!(manager.next().await, first);
        assert_eq!(manager.next().await, 2);
    }

    #[tokio::test]
    async fn test_releasing_the_tail_rewinds_the_counter() {
        let manager = NonceManager::new("test", 10);
        let a = manager.next().await;
        let b = manager.next().await;
        let c = manager.next().await;

        manager.release(b).await;
        manager.release(c).await;
        assert_eq!(manager.next().await, 11);
        assert_eq!(manager.next().await, 12);

        manager.release(a).await;
        assert_eq!(manager.next().await, 10);
    }

    #[tokio::test]
    async fn test_sync_skips_mined_nonces() {
        let manager = NonceManager::new("test", 0);
        for nonce in 0..3 {
            let allocated = manager.next().await;
            manager.mark_pending(allocated, &format!("0x{}", nonce));
        }
        assert_eq!(manager.pending_count(), 3);

        manager.sync(5).await;
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.next().await, 5);
    }

    #[tokio::test]
    async fn test_confirm_clears_pending() {
        let manager = NonceManager::new("test", 0);
        let nonce = manager.next().await;
        manager.mark_pending(nonce, "0xabc");

        manager.confirm(nonce).await;
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let manager = std::sync::Arc::new(NonceManager::new("test", 0));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.next().await }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort();
        assert_eq!(nonces, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dropped_nonce_fills_the_gap() {
        let manager = NonceManager::new("test", 0);
        let dropped = manager.next().await;
        manager.mark_pending(dropped, "0xdropped");
        let later = manager.next().await;
        manager.mark_pending(later, "0xlater");

        // The chain never saw nonce 0, so the later transaction is stuck
        assert!(!manager.reconcile(dropped, 0).await);
        assert_eq!(manager.pending_count(), 1);
        assert_eq!(manager.next().await, dropped);
        assert_eq!(manager.next().await, 2);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_consumed_nonce() {
        let manager = NonceManager::new("test", 3);
        let nonce = manager.next().await;
        manager.mark_pending(nonce, "0xslow");

        // Timed out but mined after all
        assert!(manager.reconcile(nonce, 4).await);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.next().await, 4);
    }

    #[tokio::test]
    async fn test_reverted_nonce_is_consumed() {
        let manager = NonceManager::new("test", 0);
        let nonce = manager.next().await;
        manager.mark_pending(nonce, "0xreverted");

        manager.confirm(nonce).await;
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.next().await, 1);
    }

    #[tokio::test]
    async fn test_forget_stops_tracking() {
        let manager = NonceManager::new("test", 0);
        let nonce = manager.next().await;
        manager.mark_pending(nonce, "0xunknown");

        manager.forget(nonce);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.next().await, 1);
    }
}
