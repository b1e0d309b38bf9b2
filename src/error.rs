//! Error types for the Bifrost Relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    #[error("Subscription error on {chain}: {message}")]
    Subscription { chain: String, message: String },

    #[error("Transaction error on {chain}: {message}")]
    Transaction { chain: String, message: String },

    #[error("Transaction {tx_hash} reverted on {chain}")]
    Reverted { chain: String, tx_hash: String },

    #[error("Nonce error on {chain}: {message}")]
    Nonce { chain: String, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Invalid destination {0}")]
    InvalidDestination(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Operation {operation} ended without reporting an outcome")]
    OperationAbandoned { operation: String },

    #[error("Operation {operation} panicked during {step}: {message}")]
    ActionPanicked {
        operation: String,
        step: String,
        message: String,
    },

    #[error("Operation {operation} stranded funds: perform failed ({perform}), rollback failed ({rollback})")]
    Stranded {
        operation: String,
        perform: String,
        rollback: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ChainConnection { .. }
                | BridgeError::Subscription { .. }
                | BridgeError::Timeout { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            BridgeError::Stranded { .. }
                | BridgeError::OperationAbandoned { .. }
                | BridgeError::ActionPanicked { .. }
                | BridgeError::Wallet(_)
        )
    }
}

/// Result type for relayer operations
pub type BridgeResult<T> = Result<T, BridgeError>;
