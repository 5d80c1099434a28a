// ── Retry & cleanup supervisor ──
//
// Sits between the engine and the drivers. Transient failures are retried
// a bounded number of times; anything else is logged with switch context
// and returned wrapped in `OperationFailed`. Fan-out runs one call per
// switch with bounded concurrency and never stops early.
//
// `Compensations` is the undo log drivers use for multi-step mutations:
// steps are registered as the mutation progresses and replayed in reverse
// if it fails. Undo failures are logged, the original error is kept.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::RetryPolicy;
use crate::error::CoreError;
use crate::model::Operation;

#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    retry: RetryPolicy,
}

impl Supervisor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `call` against `switch`, retrying transient failures.
    pub async fn run<T, F, Fut>(
        &self,
        switch: &str,
        operation: Operation,
        target: &str,
        mut call: F,
    ) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        switch,
                        %operation,
                        resource = target,
                        attempt,
                        error = %e,
                        "transient device error; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    error!(
                        switch,
                        %operation,
                        resource = target,
                        attempt,
                        unknown_outcome = e.is_unknown_outcome(),
                        error = %e,
                        "operation failed"
                    );
                    return Err(CoreError::OperationFailed {
                        switch: switch.to_owned(),
                        operation,
                        target: target.to_owned(),
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Drive every job to completion, at most `concurrency` at a time.
    /// Failures are collected into one `Aggregate` error.
    pub async fn fan_out<I, Fut>(
        &self,
        operation: Operation,
        concurrency: usize,
        jobs: I,
    ) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<(), CoreError>>,
    {
        let failures: Vec<CoreError> = stream::iter(jobs)
            .buffered(concurrency.max(1))
            .filter_map(|outcome| async move { outcome.err() })
            .collect()
            .await;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Aggregate {
                operation,
                failures,
            })
        }
    }
}

type Step<'a> = (&'static str, BoxFuture<'a, Result<(), CoreError>>);

/// Undo log for a multi-step device mutation.
#[derive(Default)]
#[must_use = "compensations only run through `settle`"]
pub struct Compensations<'a> {
    steps: Vec<Step<'a>>,
}

impl std::fmt::Debug for Compensations<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.steps.iter().map(|(label, _)| *label).collect();
        f.debug_struct("Compensations").field("steps", &labels).finish()
    }
}

impl<'a> Compensations<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an undo step. It only runs if the mutation fails.
    pub fn push(
        &mut self,
        label: &'static str,
        step: impl Future<Output = Result<(), CoreError>> + Send + 'a,
    ) {
        self.steps.push((label, Box::pin(step)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Pass a success through, or undo every registered step in reverse
    /// and return the original error.
    pub async fn settle<T>(self, switch: &str, outcome: Result<T, CoreError>) -> Result<T, CoreError> {
        match outcome {
            Ok(value) => Ok(value),
            Err(original) => {
                self.unwind(switch, &original).await;
                Err(original)
            }
        }
    }

    async fn unwind(self, switch: &str, original: &CoreError) {
        for (label, step) in self.steps.into_iter().rev() {
            match step.await {
                Ok(()) => info!(switch, step = label, "compensation applied"),
                Err(e) => error!(
                    switch,
                    step = label,
                    error = %e,
                    original = %original,
                    "compensation failed"
                ),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    fn supervisor(attempts: u32) -> Supervisor {
        Supervisor::new(RetryPolicy {
            attempts,
            delay: Duration::from_millis(500),
        })
    }

    fn transient() -> CoreError {
        CoreError::TransientDevice {
            message: "system is busy".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let out = supervisor(3)
            .run("leaf1", Operation::PlugPort, "port 1", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let calls = &AtomicU32::new(0);
        let err = supervisor(2)
            .run("leaf1", Operation::AddNetwork, "vlan 10", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.switch(), Some("leaf1"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fatal_errors_are_wrapped_without_retry() {
        let calls = &AtomicU32::new(0);
        let err = supervisor(5)
            .run("sw9", Operation::UnplugPort, "port p 3 / vlan 20", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoreError::DeviceUnreachable {
                    message: "connection refused".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            CoreError::OperationFailed {
                switch,
                operation,
                target,
                source,
            } => {
                assert_eq!(switch, "sw9");
                assert_eq!(operation, Operation::UnplugPort);
                assert_eq!(target, "port p 3 / vlan 20");
                assert!(matches!(*source, CoreError::DeviceUnreachable { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_attempts_every_job() {
        let ran = AtomicU32::new(0);
        let jobs = (0..4).map(|i| {
            let ran = &ran;
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    Err(CoreError::OperationFailed {
                        switch: format!("sw{i}"),
                        operation: Operation::AddNetwork,
                        target: "vlan 5".into(),
                        source: Box::new(transient()),
                    })
                } else {
                    Ok(())
                }
            }
        });

        let err = supervisor(1)
            .fan_out(Operation::AddNetwork, 2, jobs)
            .await
            .unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        match err {
            CoreError::Aggregate { failures, .. } => {
                let names: Vec<_> = failures.iter().filter_map(CoreError::switch).collect();
                assert_eq!(names, vec!["sw0", "sw2"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn compensations_unwind_in_reverse_and_keep_original_error() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut undo = Compensations::new();
        for (label, fails) in [("first", false), ("second", true), ("third", false)] {
            let order = Arc::clone(&order);
            undo.push(label, async move {
                order.lock().unwrap().push(label);
                if fails {
                    Err(CoreError::Device {
                        message: "cleanup refused".into(),
                        status: Some(500),
                    })
                } else {
                    Ok(())
                }
            });
        }
        assert_eq!(undo.len(), 3);

        let err = undo
            .settle::<()>("corsa", Err(CoreError::BridgePoolExhausted { capacity: 63 }))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BridgePoolExhausted { capacity: 63 }));
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn compensations_are_skipped_on_success() {
        let ran = Arc::new(AtomicU32::new(0));
        let mut undo = Compensations::new();
        let counter = Arc::clone(&ran);
        undo.push("never", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(undo.settle("corsa", Ok(5)).await.unwrap(), 5);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
