//! Transaction Coordinator (§4.5): wraps a database operation in an atomic
//! scope when the backing store supports it, degrading to sequential
//! best-effort execution otherwise. Callers must accept both a session
//! handle and `None` (§4.5: "Callers must accept both a session handle
//! and null").

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::error::JobError;

static DEGRADATION_WARNING: Once = Once::new();

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, JobError>> + Send + 'a>>;

/// `executeAtomic` (§4.5). If the pool supports transactions (Postgres
/// always does) the operation runs inside a `BEGIN`/`COMMIT`/`ROLLBACK`
/// scope; the transaction is rolled back automatically if `op` returns
/// an error or is dropped without committing.
pub struct TransactionCoordinator {
    pool: PgPool,
}

impl TransactionCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn execute_atomic<T, F>(&self, op: F) -> Result<T, JobError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, T> + Send,
    {
        let mut txn: Transaction<'_, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|error| JobError::new(crate::error::Kind::StoreFailure, error.to_string()))?;

        let result = op(&mut txn).await;

        match result {
            Ok(value) => {
                txn.commit().await.map_err(|error| {
                    JobError::new(crate::error::Kind::StoreFailure, error.to_string())
                })?;
                Ok(value)
            }
            Err(error) => {
                let _ = txn.rollback().await;
                Err(error)
            }
        }
    }
}

/// Marker used by stores that do not support transactions, so that the
/// degraded path is logged exactly once at process startup (§4.5).
pub struct NonTransactionalCoordinator;

impl NonTransactionalCoordinator {
    pub fn new() -> Self {
        DEGRADATION_WARNING.call_once(|| {
            tracing::warn!(
                "backing store does not support transactions; running in best-effort sequential mode"
            );
        });
        Self
    }

    /// Runs `op` sequentially with no transactional guarantee.
    pub async fn execute_atomic<T, Fut>(&self, op: impl FnOnce() -> Fut) -> Result<T, JobError>
    where
        Fut: Future<Output = Result<T, JobError>>,
    {
        op().await
    }
}

impl Default for NonTransactionalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_transactional_coordinator_runs_op_directly() {
        let coordinator = NonTransactionalCoordinator::new();
        let result: Result<i32, JobError> = coordinator.execute_atomic(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_non_transactional_coordinator_can_be_constructed_repeatedly() {
        let _a = NonTransactionalCoordinator::new();
        let _b = NonTransactionalCoordinator::new();
    }
}
