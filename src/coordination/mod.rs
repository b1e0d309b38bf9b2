//! Atomic coordination of cross-ledger transfers
//!
//! The coordination layer:
//! 1. Builds one operation per observed transfer event
//! 2. Runs the operation's perform action, and its rollback on failure
//! 3. Reports exactly one terminal outcome per operation to a shared checker

pub mod atomic;
pub mod operation;

pub use atomic::{AtomicCoordinator, CoordinatorConfig, OperationConfig};
pub use operation::{action, checker, Action, Checker, Operation, OperationState, OperationWatch, Outcome};
