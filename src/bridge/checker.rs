//! Default operation checker: logs and records every terminal outcome

use crate::coordination::{OperationWatch, Outcome};
use crate::events::TransferEvent;
use crate::metrics;

use std::time::Instant;
use tracing::{debug, error, info};

/// Log line emitted for each outcome
pub fn outcome_message(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Completed => "swap complete",
        Outcome::RolledBack { .. } => "swap rolled back",
        Outcome::Failed { .. } => "swap failed",
    }
}

/// Wait for the operation's outcome and report it
pub async fn check_operation(watch: OperationWatch, event: TransferEvent) {
    let started = Instant::now();
    let operation = watch.name().to_string();
    let operation_id = watch.id();
    debug!(%operation_id, state = ?watch.state(), "Checking operation {}", operation);

    let outcome = watch.outcome().await;
    metrics::record_operation_outcome(&operation, outcome.label(), started.elapsed().as_secs_f64());

    let message = outcome_message(&outcome);
    match &outcome {
        Outcome::Completed => info!(
            %operation_id,
            from = %event.user,
            to = %event.destination,
            amount = %event.amount,
            "{}", message
        ),
        Outcome::RolledBack { error } => info!(
            %operation_id,
            from = %event.user,
            to = %event.destination,
            amount = %event.amount,
            reason = %error,
            "{}", message
        ),
        // Funds are stranded until the contract owner mints or unlocks them manually
        Outcome::Failed { error } => error!(
            %operation_id,
            from = %event.user,
            to = %event.destination,
            amount = %event.amount,
            error = %error,
            alert = error.should_alert(),
            "{}", message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_outcome_messages() {
        let err = BridgeError::Internal("boom".to_string());

        assert_eq!(outcome_message(&Outcome::Completed), "swap complete");
        assert_eq!(
            outcome_message(&Outcome::RolledBack { error: err.clone() }),
            "swap rolled back"
        );
        assert_eq!(outcome_message(&Outcome::Failed { error: err }), "swap failed");
    }
}
