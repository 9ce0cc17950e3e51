use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, PaginatorTrait, QueryFilter,
    QueryOrder,
};

use crate::batch::{TreeBatch, WorkingSet};
use crate::bounds::Bounds;
use crate::checker::{self, ErrorCounts};
use crate::config::NestedSetConfig;
use crate::error::{NestedSetError, Result};
use crate::lock::LockedTransaction;
use crate::mutation::{Position, TreeMutator};
use crate::rebuild::{HierarchyNode, TreeRebuilder};
use crate::scope::Scope;
use crate::store::{NodeStore, Trashed};
use crate::traits::NestedSetModel;

/// Repository exposing the nested-set operations for a given model.
///
/// Every mutating call takes the scope lock and runs in its own transaction;
/// use [`NestedSetRepository::batch`] to group several of them.
#[derive(Debug)]
pub struct NestedSetRepository<M>
where
    M: NestedSetModel,
{
    store: NodeStore<M>,
    mutator: TreeMutator<M>,
    rebuilder: TreeRebuilder<M>,
}

impl<M> Default for NestedSetRepository<M>
where
    M: NestedSetModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> NestedSetRepository<M>
where
    M: NestedSetModel,
{
    pub fn new() -> Self {
        Self {
            store: NodeStore::new(),
            mutator: TreeMutator::new(),
            rebuilder: TreeRebuilder::new(),
        }
    }

    pub fn config(&self) -> &'static NestedSetConfig {
        M::nested_set_config()
    }

    fn ensure_supported(conn: &impl ConnectionTrait) -> Result<()> {
        match conn.get_database_backend() {
            DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
            _ => Err(NestedSetError::UnsupportedBackend),
        }
    }

    async fn begin(&self, conn: &DatabaseConnection, scope: &Scope) -> Result<LockedTransaction> {
        scope.validate::<M>()?;
        LockedTransaction::acquire(self.config(), conn, scope).await
    }

    /// Open a transaction over `scope` in which tracked handles are kept up to
    /// date across operations.
    pub async fn batch(&self, conn: &DatabaseConnection, scope: Scope) -> Result<TreeBatch<M>> {
        TreeBatch::begin(conn, scope).await
    }

    /// Open room for a subtree of `height` at `position` and return the bounds
    /// its root must take.
    pub async fn insert(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        position: &Position<M::Id>,
        height: i64,
    ) -> Result<Bounds> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .insert(
                guard.connection(),
                scope,
                position,
                height,
                &mut WorkingSet::new(),
            )
            .await
            .map(|(bounds, _)| bounds);
        guard.finish(result).await
    }

    /// Insert `active` as a new leaf at `position`.
    pub async fn create(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        active: M::ActiveModel,
        position: &Position<M::Id>,
    ) -> Result<M> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .create(
                guard.connection(),
                scope,
                active,
                position,
                &mut WorkingSet::new(),
            )
            .await;
        guard.finish(result).await
    }

    /// Move the subtree rooted at `key` to `position`.
    ///
    /// Returns the number of rows whose bounds or parent changed; zero when the
    /// node already sits there. Moving a node under itself or one of its
    /// descendants fails with [`NestedSetError::CyclicMove`].
    pub async fn move_node(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        position: &Position<M::Id>,
    ) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .move_node(
                guard.connection(),
                scope,
                key,
                position,
                &mut WorkingSet::new(),
            )
            .await;
        guard.finish(result).await
    }

    pub async fn append_to(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        parent: &M::Id,
    ) -> Result<u64> {
        let position = Position::AppendTo(parent.clone());
        self.move_node(conn, scope, key, &position).await
    }

    pub async fn prepend_to(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        parent: &M::Id,
    ) -> Result<u64> {
        let position = Position::PrependTo(parent.clone());
        self.move_node(conn, scope, key, &position).await
    }

    pub async fn insert_before(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        sibling: &M::Id,
    ) -> Result<u64> {
        let position = Position::Before(sibling.clone());
        self.move_node(conn, scope, key, &position).await
    }

    pub async fn insert_after(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        sibling: &M::Id,
    ) -> Result<u64> {
        let position = Position::After(sibling.clone());
        self.move_node(conn, scope, key, &position).await
    }

    /// Detach `key` from its parent and place it after the last root.
    pub async fn make_root(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .make_root(guard.connection(), scope, key, &mut WorkingSet::new())
            .await;
        guard.finish(result).await
    }

    /// Move `key` before the `amount`-th previous sibling.
    pub async fn up(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        amount: u64,
    ) -> Result<bool> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .shift(
                guard.connection(),
                scope,
                key,
                amount,
                false,
                &mut WorkingSet::new(),
            )
            .await;
        guard.finish(result).await
    }

    /// Move `key` after the `amount`-th next sibling.
    pub async fn down(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        amount: u64,
    ) -> Result<bool> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .shift(
                guard.connection(),
                scope,
                key,
                amount,
                true,
                &mut WorkingSet::new(),
            )
            .await;
        guard.finish(result).await
    }

    /// Delete `key` and its descendants, returning how many rows were removed
    /// or tombstoned.
    pub async fn delete_subtree(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        key: &M::Id,
        hard: bool,
    ) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .mutator
            .delete_subtree(guard.connection(), scope, key, hard, &mut WorkingSet::new())
            .await;
        guard.finish(result).await
    }

    pub async fn restore(&self, conn: &DatabaseConnection, scope: &Scope, key: &M::Id) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self.mutator.restore(guard.connection(), scope, key).await;
        guard.finish(result).await
    }

    /// Recompute bounds from parent links, for the whole scope or below `root`.
    pub async fn fix_tree(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        root: Option<&M::Id>,
    ) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .rebuilder
            .fix_tree(guard.connection(), scope, root)
            .await;
        guard.finish(result).await
    }

    pub async fn fix_subtree(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        root: &M::Id,
    ) -> Result<u64> {
        self.fix_tree(conn, scope, Some(root)).await
    }

    /// Replace the structure of the scope, or of the descendants of `root`,
    /// with `data`.
    pub async fn rebuild_tree(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        data: Vec<HierarchyNode<M>>,
        delete_missing: bool,
        root: Option<&M::Id>,
    ) -> Result<u64> {
        let guard = self.begin(conn, scope).await?;
        let result = self
            .rebuilder
            .rebuild_tree(guard.connection(), scope, data, delete_missing, root)
            .await;
        guard.finish(result).await
    }

    pub async fn rebuild_subtree(
        &self,
        conn: &DatabaseConnection,
        scope: &Scope,
        root: &M::Id,
        data: Vec<HierarchyNode<M>>,
        delete_missing: bool,
    ) -> Result<u64> {
        self.rebuild_tree(conn, scope, data, delete_missing, Some(root))
            .await
    }

    pub async fn count_errors<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
    ) -> Result<ErrorCounts> {
        Self::ensure_supported(conn)?;
        checker::count_errors::<M, C>(conn, scope).await
    }

    pub async fn is_broken<C: ConnectionTrait>(&self, conn: &C, scope: &Scope) -> Result<bool> {
        Ok(self.count_errors(conn, scope).await?.is_broken())
    }

    /// Current bounds of `key`, read from storage.
    pub async fn node_bounds<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Bounds> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        self.store.get_bounds(conn, scope, key).await
    }

    /// The node `key`, tombstoned or not.
    pub async fn node<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<M> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        self.store.find_in_scope(conn, scope, key).await
    }

    /// Every live node of the scope in pre-order.
    pub async fn tree<C: ConnectionTrait>(&self, conn: &C, scope: &Scope) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        self.store.nodes(conn, scope, None, Trashed::Exclude).await
    }

    pub async fn roots<C: ConnectionTrait>(&self, conn: &C, scope: &Scope) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let rows = self
            .store
            .scoped(scope, Trashed::Exclude)
            .filter(M::parent_column().is_null())
            .order_by_asc(M::lft_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    pub async fn leaves<C: ConnectionTrait>(&self, conn: &C, scope: &Scope) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let rows = self
            .store
            .scoped(scope, Trashed::Exclude)
            .filter(Expr::col(M::rgt_column()).eq(Expr::col(M::lft_column()).add(1)))
            .order_by_asc(M::lft_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let rows = self
            .store
            .scoped(scope, Trashed::Exclude)
            .filter(M::parent_column().eq(M::id_to_value(key)))
            .order_by_asc(M::lft_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Live descendants of `key` in pre-order, optionally preceded by the node.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        and_self: bool,
    ) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let Bounds { lft, rgt } = self.store.get_bounds(conn, scope, key).await?;
        let from = if and_self { lft } else { lft + 1 };
        let rows = self
            .store
            .scoped(scope, Trashed::Exclude)
            .filter(M::lft_column().between(from, rgt))
            .order_by_asc(M::lft_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Live ancestors of `key` from the root down, optionally followed by the node.
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        and_self: bool,
    ) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let Bounds { lft, rgt } = self.store.get_bounds(conn, scope, key).await?;
        let mut query = self.store.scoped(scope, Trashed::Exclude);
        query = if and_self {
            query
                .filter(M::lft_column().lte(lft))
                .filter(M::rgt_column().gte(rgt))
        } else {
            query
                .filter(M::lft_column().lt(lft))
                .filter(M::rgt_column().gt(rgt))
        };
        let rows = query.order_by_asc(M::lft_column()).all(conn).await?;
        Ok(rows)
    }

    /// Live nodes sharing the parent of `key`.
    pub async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        and_self: bool,
    ) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let node = self.store.find_in_scope(conn, scope, key).await?;
        let mut query = self.store.scoped(scope, Trashed::Exclude);
        query = match node.parent_id() {
            Some(parent) => query.filter(M::parent_column().eq(M::id_to_value(&parent))),
            None => query.filter(M::parent_column().is_null()),
        };
        if !and_self {
            query = query.filter(M::id_column().ne(M::id_to_value(key)));
        }
        let rows = query.order_by_asc(M::lft_column()).all(conn).await?;
        Ok(rows)
    }

    /// Live siblings before `key`, in tree order.
    pub async fn prev_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Vec<M>> {
        self.siblings_on_side(conn, scope, key, false).await
    }

    /// Live siblings after `key`, in tree order.
    pub async fn next_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Vec<M>> {
        self.siblings_on_side(conn, scope, key, true).await
    }

    /// The nearest live sibling before `key`.
    pub async fn prev_sibling<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Option<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let node = self.store.find_in_scope(conn, scope, key).await?;
        self.store.siblings_toward(conn, scope, &node, false, 0).await
    }

    /// The nearest live sibling after `key`.
    pub async fn next_sibling<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Option<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let node = self.store.find_in_scope(conn, scope, key).await?;
        self.store.siblings_toward(conn, scope, &node, true, 0).await
    }

    async fn siblings_on_side<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        after: bool,
    ) -> Result<Vec<M>> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let node = self.store.find_in_scope(conn, scope, key).await?;
        let rows = self
            .store
            .sibling_side(scope, &node, after)
            .order_by_asc(M::lft_column())
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Number of live ancestors of `key`; 0 for a root.
    ///
    /// Tombstoned ancestors are not counted, matching [`Self::ancestors`].
    pub async fn depth<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<u64> {
        Self::ensure_supported(conn)?;
        scope.validate::<M>()?;
        let Bounds { lft, rgt } = self.store.get_bounds(conn, scope, key).await?;
        let depth = self
            .store
            .scoped(scope, Trashed::Exclude)
            .filter(M::lft_column().lt(lft))
            .filter(M::rgt_column().gt(rgt))
            .count(conn)
            .await?;
        Ok(depth)
    }
}
