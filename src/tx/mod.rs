//! Vault transaction submission with local nonce allocation and gas buffering

mod gas;
mod nonce;
mod sender;

pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use sender::TransactionSender;
