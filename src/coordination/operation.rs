//! Perform/rollback state machine for a single transfer
//!
//! An operation runs its perform action once. If that fails it runs the
//! rollback action once. It then reports exactly one [`Outcome`] through a
//! one-shot channel that is consumed by the send, so a second signal cannot
//! be expressed. A panicking action is caught and reported as a failure of
//! that operation only.

use crate::error::{BridgeError, BridgeResult};
use crate::events::TransferEvent;
use crate::metrics;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Remote action run against a ledger; `Ok(())` means success
pub type Action = Arc<dyn Fn(TransferEvent) -> BoxFuture<'static, BridgeResult<()>> + Send + Sync>;

/// Observer invoked once per operation with a handle to its outcome
pub type Checker = Arc<dyn Fn(OperationWatch, TransferEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`Action`]
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(TransferEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BridgeResult<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Wrap an async closure as a [`Checker`]
pub fn checker<F, Fut>(f: F) -> Checker
where
    F: Fn(OperationWatch, TransferEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |watch, event| Box::pin(f(watch, event)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Performing,
    RollingBack,
    Completed,
    RolledBack,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::RolledBack | OperationState::Failed
        )
    }
}

/// Terminal result of an operation
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Perform succeeded
    Completed,
    /// Perform failed with `error` and the rollback compensated it
    RolledBack { error: BridgeError },
    /// Perform and rollback both failed; funds need manual remediation
    Failed { error: BridgeError },
}

impl Outcome {
    pub fn state(&self) -> OperationState {
        match self {
            Outcome::Completed => OperationState::Completed,
            Outcome::RolledBack { .. } => OperationState::RolledBack,
            Outcome::Failed { .. } => OperationState::Failed,
        }
    }

    /// Label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::RolledBack { .. } => "rolled_back",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Read side of an operation handed to the checker
pub struct OperationWatch {
    id: Uuid,
    name: String,
    state: watch::Receiver<OperationState>,
    outcome: oneshot::Receiver<Outcome>,
}

impl OperationWatch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, possibly not yet terminal
    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Wait for the terminal outcome
    ///
    /// An operation whose task was aborted before signalling is reported as failed.
    pub async fn outcome(self) -> Outcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed {
                error: BridgeError::OperationAbandoned {
                    operation: self.name,
                },
            },
        }
    }
}

/// One perform/rollback pair bound to one event
pub struct Operation {
    id: Uuid,
    name: String,
    perform: Action,
    rollback: Action,
    checker: Option<Checker>,
    state: watch::Sender<OperationState>,
    outcome_tx: oneshot::Sender<Outcome>,
    outcome_rx: oneshot::Receiver<Outcome>,
}

impl Operation {
    pub(crate) fn new(name: String, perform: Action, rollback: Action, checker: Option<Checker>) -> Self {
        let (state, _) = watch::channel(OperationState::Pending);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        Self {
            id: Uuid::new_v4(),
            name,
            perform,
            rollback,
            checker,
            state,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Follow state transitions from outside the operation
    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    /// Launch the operation as an independent task
    pub fn spawn(self, event: TransferEvent) -> JoinHandle<Outcome> {
        tokio::spawn(self.run(event))
    }

    /// Run perform, and rollback if perform fails, then signal the outcome
    pub async fn run(self, event: TransferEvent) -> Outcome {
        let Operation {
            id,
            name,
            perform,
            rollback,
            checker,
            state,
            outcome_tx,
            outcome_rx,
        } = self;

        let _in_flight = metrics::InFlightGuard::new(&metrics::OPERATIONS_IN_FLIGHT);

        let checker = checker.map(|checker| {
            let watch = OperationWatch {
                id,
                name: name.clone(),
                state: state.subscribe(),
                outcome: outcome_rx,
            };
            tokio::spawn(checker(watch, event.clone()))
        });

        let span = info_span!("operation", operation_id = %id, operation = %name);
        let outcome = execute(&name, &perform, &rollback, &state, event)
            .instrument(span)
            .await;

        if outcome_tx.send(outcome.clone()).is_err() {
            debug!(operation_id = %id, "No observer for operation outcome");
        }

        // The operation is done once its outcome has been reported
        if let Some(checker) = checker {
            if let Err(e) = checker.await {
                warn!(operation_id = %id, error = %e, "Operation checker did not finish");
            }
        }

        outcome
    }
}

async fn execute(
    name: &str,
    perform: &Action,
    rollback: &Action,
    state: &watch::Sender<OperationState>,
    event: TransferEvent,
) -> Outcome {
    transition(state, OperationState::Performing);

    let perform_error = match guarded(perform, event.clone()).await {
        Ok(Ok(())) => {
            transition(state, OperationState::Completed);
            return Outcome::Completed;
        }
        Ok(Err(e)) => e,
        // Ledger state is unknown after a panic, so no compensation is attempted
        Err(message) => {
            transition(state, OperationState::Failed);
            return Outcome::Failed {
                error: BridgeError::ActionPanicked {
                    operation: name.to_string(),
                    step: "perform".to_string(),
                    message,
                },
            };
        }
    };

    warn!(error = %perform_error, "Perform failed, rolling back");
    transition(state, OperationState::RollingBack);

    let rollback_error = match guarded(rollback, event).await {
        Ok(Ok(())) => {
            transition(state, OperationState::RolledBack);
            return Outcome::RolledBack {
                error: perform_error,
            };
        }
        Ok(Err(e)) => e.to_string(),
        Err(message) => format!("panicked: {}", message),
    };

    transition(state, OperationState::Failed);
    Outcome::Failed {
        error: BridgeError::Stranded {
            operation: name.to_string(),
            perform: perform_error.to_string(),
            rollback: rollback_error,
        },
    }
}

/// Run an action, turning a panic into its message
async fn guarded(action: &Action, event: TransferEvent) -> Result<BridgeResult<()>, String> {
    AssertUnwindSafe(async move { action(event).await })
        .catch_unwind()
        .await
        .map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn transition(state: &watch::Sender<OperationState>, next: OperationState) {
    let previous = state.send_replace(next);
    debug!(from = ?previous, to = ?next, "Operation state transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use tokio::sync::mpsc;

    fn event() -> TransferEvent {
        TransferEvent::new("0xuser", 1_000u64, "tz1destination")
    }

    fn ledger_error(message: &str) -> BridgeError {
        BridgeError::Transaction {
            chain: "test".to_string(),
            message: message.to_string(),
        }
    }

    /// Action returning `result` and counting its invocations
    fn counting(result: BridgeResult<()>) -> (Action, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let action = action(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let result = result.clone();
            async move { result }
        });
        (action, calls)
    }

    fn operation(perform: Action, rollback: Action, checker: Option<Checker>) -> Operation {
        Operation::new("swap test".to_string(), perform, rollback, checker)
    }

    #[tokio::test]
    async fn test_successful_perform_completes_without_rollback() {
        let (perform, performed) = counting(Ok(()));
        let (rollback, rolled_back) = counting(Ok(()));

        let op = operation(perform, rollback, None);
        let state = op.subscribe_state();
        assert_eq!(op.state(), OperationState::Pending);

        let outcome = op.run(event()).await;

        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(*state.borrow(), OperationState::Completed);
        assert!(state.borrow().is_terminal());
        assert_eq!(performed.load(Ordering::SeqCst), 1);
        assert_eq!(rolled_back.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_perform_ignores_failing_rollback() {
        let (perform, _) = counting(Ok(()));
        let (rollback, rolled_back) = counting(Err(ledger_error("never called")));

        let outcome = operation(perform, rollback, None).run(event()).await;

        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(rolled_back.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_perform_rolls_back() {
        let (perform, performed) = counting(Err(ledger_error("mint reverted")));
        let (rollback, rolled_back) = counting(Ok(()));

        let op = operation(perform, rollback, None);
        let state = op.subscribe_state();
        let outcome = op.run(event()).await;

        match outcome {
            Outcome::RolledBack { error } => assert!(error.to_string().contains("mint reverted")),
            other => panic!("expected rollback, got {:?}", other),
        }
        assert_eq!(*state.borrow(), OperationState::RolledBack);
        assert_eq!(performed.load(Ordering::SeqCst), 1);
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_fails_with_both_errors() {
        let (perform, performed) = counting(Err(ledger_error("mint reverted")));
        let (rollback, rolled_back) = counting(Err(ledger_error("unlock timed out")));

        let outcome = operation(perform, rollback, None).run(event()).await;

        match &outcome {
            Outcome::Failed { error } => {
                let msg = error.to_string();
                assert!(msg.contains("mint reverted"));
                assert!(msg.contains("unlock timed out"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(outcome.state(), OperationState::Failed);
        assert_eq!(performed.load(Ordering::SeqCst), 1);
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_actions_observe_intermediate_states() {
        let state_rx: Arc<OnceLock<watch::Receiver<OperationState>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let perform = {
            let state_rx = state_rx.clone();
            let seen = seen.clone();
            action(move |_| {
                if let Some(rx) = state_rx.get() {
                    seen.lock().unwrap().push(*rx.borrow());
                }
                async { Err::<(), _>(ledger_error("transfer failed")) }
            })
        };
        let rollback = {
            let state_rx = state_rx.clone();
            let seen = seen.clone();
            action(move |_| {
                if let Some(rx) = state_rx.get() {
                    seen.lock().unwrap().push(*rx.borrow());
                }
                async { Ok::<(), BridgeError>(()) }
            })
        };

        let op = operation(perform, rollback, None);
        state_rx.set(op.subscribe_state()).unwrap();
        op.run(event()).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![OperationState::Performing, OperationState::RollingBack]
        );
    }

    #[tokio::test]
    async fn test_checker_sees_the_same_outcome_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let invocations = Arc::new(AtomicUsize::new(0));

        let check = {
            let invocations = invocations.clone();
            checker(move |watch, checked: TransferEvent| {
                invocations.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                async move {
                    let outcome = watch.outcome().await;
                    let _ = tx.send((outcome.state(), checked));
                }
            })
        };

        let (perform, _) = counting(Err(ledger_error("mint reverted")));
        let (rollback, _) = counting(Ok(()));
        let outcome = operation(perform, rollback, Some(check)).run(event()).await;

        let (observed, checked) = rx.recv().await.unwrap();
        assert_eq!(observed, outcome.state());
        assert_eq!(observed, OperationState::RolledBack);
        assert_eq!(checked, event());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_perform_fails_without_rollback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let check = checker(move |watch, _| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(watch.outcome().await);
            }
        });

        let perform = action(|_| async {
            let crashed = true;
            if crashed {
                panic!("ledger client crashed");
            }
            Ok::<(), BridgeError>(())
        });
        let (rollback, rolled_back) = counting(Ok(()));

        let op = operation(perform, rollback, Some(check));
        let state = op.subscribe_state();
        let outcome = op.spawn(event()).await.expect("panic stays inside the operation");

        match &outcome {
            Outcome::Failed {
                error: BridgeError::ActionPanicked { operation, step, message },
            } => {
                assert_eq!(operation, "swap test");
                assert_eq!(step, "perform");
                assert_eq!(message, "ledger client crashed");
            }
            other => panic!("expected panicked failure, got {:?}", other),
        }
        assert_eq!(*state.borrow(), OperationState::Failed);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outcome::Failed { error: BridgeError::ActionPanicked { .. } }
        ));
        assert_eq!(rolled_back.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_rollback_strands_with_both_failures() {
        let (perform, _) = counting(Err(ledger_error("mint reverted")));
        let rollback = action(|event: TransferEvent| async move {
            if event.amount > U256::zero() {
                panic!("unlock client crashed");
            }
            Ok::<(), BridgeError>(())
        });

        let outcome = operation(perform, rollback, None).run(event()).await;

        match outcome {
            Outcome::Failed { error } => {
                let msg = error.to_string();
                assert!(msg.contains("mint reverted"));
                assert!(msg.contains("panicked: unlock client crashed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_does_not_affect_sibling_operations() {
        let panicking = action(|_| async {
            let crashed = true;
            if crashed {
                panic!("boom");
            }
            Ok::<(), BridgeError>(())
        });
        let (rollback, _) = counting(Ok(()));
        let (healthy, performed) = counting(Ok(()));
        let (healthy_rollback, _) = counting(Ok(()));

        let failing = operation(panicking, rollback, None).spawn(event());
        let sibling = operation(healthy, healthy_rollback, None).spawn(event());

        assert!(matches!(failing.await.unwrap(), Outcome::Failed { .. }));
        assert!(matches!(sibling.await.unwrap(), Outcome::Completed));
        assert_eq!(performed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_operation_is_reported_as_abandoned() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let check = checker(move |watch, _| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(watch.outcome().await);
            }
        });

        let perform = action(|_| async {
            std::future::pending::<()>().await;
            Ok::<(), BridgeError>(())
        });
        let (rollback, rolled_back) = counting(Ok(()));

        let op = operation(perform, rollback, Some(check));
        let mut state = op.subscribe_state();
        let handle = op.spawn(event());

        // Performing is published after the checker is attached
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), OperationState::Performing);
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        match rx.recv().await.unwrap() {
            Outcome::Failed {
                error: BridgeError::OperationAbandoned { operation },
            } => assert_eq!(operation, "swap test"),
            other => panic!("expected abandoned failure, got {:?}", other),
        }
        assert_eq!(rolled_back.load(Ordering::SeqCst), 0);
    }
}
