use std::time::Duration;

use crc32fast::Hasher;
use sea_orm::IsolationLevel;

/// Static configuration describing how a SeaORM model stores its nested set.
#[derive(Clone, Debug)]
pub struct NestedSetConfig {
    entity_name: String,
    table_name: String,
    lft_column: String,
    rgt_column: String,
    parent_column: String,
    scope_columns: Vec<String>,
    soft_delete_column: Option<String>,
    isolation_level: Option<IsolationLevel>,
    lock_timeout: Option<Duration>,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl NestedSetConfig {
    /// Create a new configuration using the logical entity name and backing table.
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let table_name = table_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &table_name,
        ));

        Self {
            entity_name,
            table_name,
            lft_column: "lft".to_string(),
            rgt_column: "rgt".to_string(),
            parent_column: "parent_id".to_string(),
            scope_columns: Vec::new(),
            soft_delete_column: None,
            // statements after the advisory lock must see the previous holder's commit
            isolation_level: Some(IsolationLevel::ReadCommitted),
            lock_timeout: None,
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`NestedSetOptions`].
    pub(crate) fn apply_options(mut self, options: NestedSetOptions) -> Self {
        if let Some(column) = options.lft_column {
            self.lft_column = column;
        }
        if let Some(column) = options.rgt_column {
            self.rgt_column = column;
        }
        if let Some(column) = options.parent_column {
            self.parent_column = column;
        }
        if let Some(columns) = options.scope_columns {
            self.scope_columns = columns;
        }
        if let Some(column) = options.soft_delete_column {
            self.soft_delete_column = Some(column);
        }
        if let Some(level) = options.isolation_level {
            self.isolation_level = level;
        }
        if let Some(timeout) = options.lock_timeout {
            self.lock_timeout = Some(timeout);
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable Rust struct name for the entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Table holding the tree rows.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn lft_column(&self) -> &str {
        &self.lft_column
    }

    pub fn rgt_column(&self) -> &str {
        &self.rgt_column
    }

    /// Column name storing the parent foreign key.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    /// Columns whose values partition the table into independent trees.
    pub fn scope_columns(&self) -> &[String] {
        &self.scope_columns
    }

    /// Tombstone column, when the model soft-deletes.
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete_column.as_deref()
    }

    pub fn uses_soft_delete(&self) -> bool {
        self.soft_delete_column.is_some()
    }

    /// Isolation level requested for mutating transactions (PostgreSQL only).
    ///
    /// Defaults to `ReadCommitted`, which lets the per-scope advisory lock order
    /// writers. A snapshot isolation level fixes its snapshot at the lock query,
    /// so a writer that waited on the lock fails with a retryable
    /// [`Contention`](crate::NestedSetError::Contention) instead.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Lock wait limit applied to mutating transactions (PostgreSQL only).
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style options consumed by the derive macro.
#[derive(Clone, Debug, Default)]
pub struct NestedSetOptions {
    lft_column: Option<String>,
    rgt_column: Option<String>,
    parent_column: Option<String>,
    scope_columns: Option<Vec<String>>,
    soft_delete_column: Option<String>,
    isolation_level: Option<Option<IsolationLevel>>,
    lock_timeout: Option<Duration>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl NestedSetOptions {
    pub fn lft_column(mut self, value: impl Into<String>) -> Self {
        self.lft_column = Some(value.into());
        self
    }

    pub fn rgt_column(mut self, value: impl Into<String>) -> Self {
        self.rgt_column = Some(value.into());
        self
    }

    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn scope_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn soft_delete_column(mut self, value: impl Into<String>) -> Self {
        self.soft_delete_column = Some(value.into());
        self
    }

    /// `None` leaves the connection default in place.
    pub fn isolation_level(mut self, level: Option<IsolationLevel>) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: NestedSetConfig) -> NestedSetConfig {
        base.apply_options(self)
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Qualify the key with a scope fingerprint so each tree locks independently.
    pub fn scoped(&self, scope_fingerprint: Option<u32>) -> String {
        match scope_fingerprint {
            Some(fingerprint) => format!("{}::{fingerprint:08x}", self.0),
            None => self.0.clone(),
        }
    }

    fn derived_from(entity: &str, table: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(table.as_bytes());
        let crc = hasher.finalize();
        Self(format!("nested-set::{entity}::{table}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_defaults() {
        let config = NestedSetOptions::default()
            .lft_column("_lft")
            .rgt_column("_rgt")
            .scope_columns(["menu_id"])
            .soft_delete_column("deleted_at")
            .isolation_level(None)
            .apply(NestedSetConfig::new("MenuItem", "menu_items"));

        assert_eq!(config.lft_column(), "_lft");
        assert_eq!(config.rgt_column(), "_rgt");
        assert_eq!(config.parent_column(), "parent_id");
        assert_eq!(config.scope_columns(), ["menu_id".to_string()]);
        assert!(config.uses_soft_delete());
        assert!(config.isolation_level().is_none());
    }

    #[test]
    fn derived_lock_key_is_scoped_per_tree() {
        let config = NestedSetConfig::new("MenuItem", "menu_items");
        let key = config.advisory_lock_strategy().key().expect("default strategy has a key");

        assert!(key.as_str().starts_with("nested-set::MenuItem::menu_items::"));
        assert_ne!(key.scoped(Some(1)), key.scoped(Some(2)));
        assert_eq!(key.scoped(None), key.as_str());
    }

    #[test]
    fn namespaced_lock_runs_under_read_committed() {
        let config = NestedSetConfig::new("MenuItem", "menu_items");
        assert!(config.advisory_lock_strategy().key().is_some());
        assert!(matches!(
            config.isolation_level(),
            Some(IsolationLevel::ReadCommitted)
        ));

        let config = NestedSetOptions::default()
            .isolation_level(Some(IsolationLevel::Serializable))
            .lock_timeout(Duration::from_millis(250))
            .apply(NestedSetConfig::new("MenuItem", "menu_items"));
        assert!(matches!(
            config.isolation_level(),
            Some(IsolationLevel::Serializable)
        ));
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(250)));
    }
}
