use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};

use crate::config::NestedSetConfig;
use crate::error::{NestedSetError, Result};
use crate::scope::Scope;

/// A transaction holding the per-scope tree lock.
///
/// Every mutating operation runs inside one of these. On PostgreSQL the lock is
/// a transaction-scoped advisory lock, released by commit or rollback. Dropping
/// the guard without finishing it rolls the transaction back.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
}

impl LockedTransaction {
    pub async fn acquire(
        config: &NestedSetConfig,
        db: &DatabaseConnection,
        scope: &Scope,
    ) -> Result<Self> {
        let backend = db.get_database_backend();

        let txn = match backend {
            DbBackend::Postgres => db.begin_with_config(config.isolation_level(), None).await?,
            DbBackend::Sqlite => db.begin().await?,
            _ => return Err(NestedSetError::UnsupportedBackend),
        };

        if backend == DbBackend::Postgres {
            if let Err(err) = prepare_postgres(&txn, config, scope).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        Ok(Self { txn })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }

    /// Commit on success, roll back on failure, and hand back the outcome.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "nested-set rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn prepare_postgres(
    txn: &DatabaseTransaction,
    config: &NestedSetConfig,
    scope: &Scope,
) -> Result<()> {
    if let Some(timeout) = config.lock_timeout() {
        // SET does not accept bind parameters.
        txn.execute(Statement::from_string(
            DbBackend::Postgres,
            format!("SET LOCAL lock_timeout = {}", timeout.as_millis()),
        ))
        .await?;
    }

    if let Some(key) = config.advisory_lock_strategy().key() {
        acquire_lock(txn, &key.scoped(scope.fingerprint())).await?;
    }

    Ok(())
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<()> {
    tracing::trace!(key, "acquiring nested-set advisory lock");
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}
