//! Atomic operation coordinator
//!
//! Factory that binds one shared checker to every operation it builds, so
//! outcomes are observed the same way regardless of the call site.

use super::operation::{Action, Checker, Operation};

/// Coordinator construction options
#[derive(Clone, Default)]
pub struct CoordinatorConfig {
    /// Observer run once per operation; never affects the outcome
    pub checker: Option<Checker>,
}

/// Operation construction options
pub struct OperationConfig {
    /// Label used in logs and metrics
    pub name: String,
    pub perform: Action,
    /// Compensation run only when `perform` fails
    pub rollback: Action,
}

pub struct AtomicCoordinator {
    checker: Option<Checker>,
}

impl AtomicCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            checker: config.checker,
        }
    }

    /// Build an operation bound to this coordinator's checker
    ///
    /// Nothing runs until [`Operation::run`] or [`Operation::spawn`].
    pub fn new_operation(&self, config: OperationConfig) -> Operation {
        Operation::new(
            config.name,
            config.perform,
            config.rollback,
            self.checker.clone(),
        )
    }
}
