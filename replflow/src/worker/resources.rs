//! Scoped resources closed in LIFO order.

use crate::errors::ReplicationError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

type Closer = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ReplicationError>> + Send>;

struct ScopedResource {
    name: &'static str,
    close: Closer,
}

/// Resources opened by one run, closed in reverse registration order.
///
/// Every registered closer runs exactly once, even if an earlier one fails
/// or panics. Failures are collected and returned.
#[derive(Default)]
pub struct ScopedResources {
    resources: Mutex<Vec<ScopedResource>>,
}

impl ScopedResources {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closer for the resource `name`.
    pub fn register<F, Fut>(&self, name: &'static str, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ReplicationError>> + Send + 'static,
    {
        self.resources.lock().push(ScopedResource {
            name,
            close: Box::new(move || Box::pin(close())),
        });
    }

    /// Returns the number of resources not yet closed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Closes every resource, last registered first.
    ///
    /// The scope is empty afterwards.
    pub async fn close_all(&self) -> Vec<ReplicationError> {
        let resources = std::mem::take(&mut *self.resources.lock());
        let mut failures = Vec::new();

        for resource in resources.into_iter().rev() {
            let name = resource.name;
            match tokio::spawn((resource.close)()).await {
                Ok(Ok(())) => debug!(resource = name, "Closed"),
                Ok(Err(e)) => {
                    warn!(resource = name, error = %e, "Close failed");
                    failures.push(e);
                }
                Err(join_err) => {
                    warn!(resource = name, error = %join_err, "Close panicked");
                    failures.push(ReplicationError::replication_with_cause(
                        format!("Closing {name} panicked"),
                        join_err,
                    ));
                }
            }
        }

        failures
    }
}

impl fmt::Debug for ScopedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedResources")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn panicking_close() -> Result<(), ReplicationError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_closes_in_lifo_order() {
        let scope = ScopedResources::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["source", "validator", "destination"] {
            let order = order.clone();
            scope.register(name, move || async move {
                order.lock().push(name);
                Ok::<(), ReplicationError>(())
            });
        }

        assert!(scope.close_all().await.is_empty());
        assert_eq!(*order.lock(), vec!["destination", "validator", "source"]);
        assert_eq!(scope.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_closers() {
        let scope = ScopedResources::new();
        let closed = Arc::new(Mutex::new(Vec::new()));

        let first = closed.clone();
        scope.register("source", move || async move {
            first.lock().push("source");
            Ok::<(), ReplicationError>(())
        });
        scope.register("destination", || async {
            Err::<(), _>(ReplicationError::destination(
                "Destination process close failed",
            ))
        });
        scope.register("panicking", panicking_close);

        let failures = scope.close_all().await;

        assert_eq!(failures.len(), 2);
        assert_eq!(*closed.lock(), vec!["source"]);
    }
}
