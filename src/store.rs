//! Row access for nested-set models. Nothing else in the crate talks to storage.

use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use sea_orm::sea_query::{Expr, Keyword, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IdenStatic, QueryFilter,
    QueryOrder, QuerySelect, Select, Value,
};

use crate::bounds::{Bounds, Patch};
use crate::error::{NestedSetError, Result};
use crate::scope::{integer_forms, same_value, Scope};
use crate::traits::NestedSetModel;

/// Whether a query sees tombstoned rows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trashed {
    Exclude,
    Include,
}

#[derive(Debug)]
pub(crate) struct NodeStore<M>
where
    M: NestedSetModel,
{
    _marker: PhantomData<M>,
}

impl<M> NodeStore<M>
where
    M: NestedSetModel,
{
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Base query confined to `scope`.
    pub(crate) fn scoped(&self, scope: &Scope, trashed: Trashed) -> Select<M::Entity> {
        let mut query = M::Entity::find().filter(scope.condition::<M>());
        if trashed == Trashed::Exclude {
            if let Some(column) = M::deleted_at_column() {
                query = query.filter(column.is_null());
            }
        }
        query
    }

    /// Fetch a row by key, failing when it is absent or lives in another scope.
    ///
    /// Tombstoned rows are returned: they keep their bounds and take part in
    /// every range shift.
    pub(crate) async fn find_in_scope<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<M> {
        let model = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(key)))
            .one(conn)
            .await?
            .ok_or_else(|| NestedSetError::not_found(key))?;
        scope.ensure_contains(&model)?;
        Ok(model)
    }

    /// Like [`Self::find_in_scope`] but treats tombstoned rows as absent.
    pub(crate) async fn find_live<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<M> {
        let model = self.find_in_scope(conn, scope, key).await?;
        if model.is_trashed() {
            return Err(NestedSetError::not_found(key));
        }
        Ok(model)
    }

    pub(crate) async fn get_bounds<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<Bounds> {
        Ok(self.find_in_scope(conn, scope, key).await?.bounds())
    }

    /// Rows of the scope in `lft` order, optionally restricted to the strict
    /// descendants of `within`.
    pub(crate) async fn nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        within: Option<Bounds>,
        trashed: Trashed,
    ) -> Result<Vec<M>> {
        let mut query = self.scoped(scope, trashed);
        if let Some(bounds) = within {
            query = query.filter(M::lft_column().between(bounds.lft + 1, bounds.rgt));
        }
        let rows = query.order_by_asc(M::lft_column()).all(conn).await?;
        Ok(rows)
    }

    /// Largest `rgt` in the scope, tombstones included; 0 for an empty tree.
    pub(crate) async fn max_rgt<C: ConnectionTrait>(&self, conn: &C, scope: &Scope) -> Result<i64> {
        let last = self
            .scoped(scope, Trashed::Include)
            .order_by_desc(M::rgt_column())
            .one(conn)
            .await?;
        Ok(last.map(|model| model.rgt()).unwrap_or(0))
    }

    /// Apply a bounds patch to every affected row of the scope in one statement.
    pub(crate) async fn apply_patch<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        patch: Patch,
    ) -> Result<u64> {
        let result = M::Entity::update_many()
            .col_expr(M::lft_column(), patch.column_expr(M::lft_column()))
            .col_expr(M::rgt_column(), patch.column_expr(M::rgt_column()))
            .filter(scope.condition::<M>())
            .filter(patch.row_filter(M::lft_column(), M::rgt_column()))
            .exec(conn)
            .await?;

        tracing::debug!(
            entity = M::nested_set_config().entity_name(),
            ?patch,
            rows = result.rows_affected,
            "applied bounds patch"
        );
        Ok(result.rows_affected)
    }

    pub(crate) async fn set_parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &M::Id,
        parent: Option<&M::Id>,
    ) -> Result<u64> {
        let result = M::Entity::update_many()
            .col_expr(M::parent_column(), parent_value::<M>(parent))
            .filter(M::id_column().eq(M::id_to_value(key)))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Write bounds and parent of a single row.
    pub(crate) async fn write_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &M::Id,
        bounds: Bounds,
        parent: Option<&M::Id>,
    ) -> Result<u64> {
        let result = M::Entity::update_many()
            .col_expr(M::lft_column(), Expr::value(bounds.lft))
            .col_expr(M::rgt_column(), Expr::value(bounds.rgt))
            .col_expr(M::parent_column(), parent_value::<M>(parent))
            .filter(M::id_column().eq(M::id_to_value(key)))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Insert a new row, filling unset scope columns and rejecting foreign ones.
    pub(crate) async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        mut active: M::ActiveModel,
    ) -> Result<M> {
        for (column, value) in M::scope_columns().into_iter().zip(scope.values()) {
            match active.get(column).into_value() {
                Some(current) if !same_value(&current, value) => {
                    return Err(NestedSetError::ScopeMismatch(format!(
                        "{} = {current:?}",
                        column.as_str()
                    )));
                }
                Some(_) => {}
                None => set_scope_value(&mut active, column, value)?,
            }
        }
        let model = active.insert(conn).await?;
        Ok(model)
    }

    /// Physically remove every row whose `lft` lies in `bounds`.
    pub(crate) async fn delete_range<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        bounds: Bounds,
    ) -> Result<u64> {
        let result = M::Entity::delete_many()
            .filter(scope.condition::<M>())
            .filter(M::lft_column().between(bounds.lft, bounds.rgt))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Physically remove the given rows.
    pub(crate) async fn delete_keys<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        keys: &[M::Id],
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = M::Entity::delete_many()
            .filter(scope.condition::<M>())
            .filter(M::id_column().is_in(keys.iter().map(M::id_to_value)))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Tombstone stamp for trashing `bounds`, later than every tombstone already inside it.
    ///
    /// Restore relies on that order, so two deletes within one clock tick still
    /// get distinct stamps.
    pub(crate) async fn next_tombstone<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        bounds: Bounds,
    ) -> Result<i64> {
        let column = M::deleted_at_column().ok_or(NestedSetError::SoftDeleteUnsupported)?;
        let latest = self
            .scoped(scope, Trashed::Include)
            .filter(M::lft_column().between(bounds.lft, bounds.rgt))
            .filter(column.is_not_null())
            .order_by_desc(column)
            .one(conn)
            .await?
            .and_then(|model| model.deleted_at());
        let now = now_millis();
        Ok(match latest {
            Some(latest) if latest >= now => latest + 1,
            _ => now,
        })
    }

    /// Tombstone live rows whose `lft` lies in `bounds`.
    pub(crate) async fn trash_range<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        bounds: Bounds,
        deleted_at: i64,
    ) -> Result<u64> {
        let column = M::deleted_at_column().ok_or(NestedSetError::SoftDeleteUnsupported)?;
        let result = M::Entity::update_many()
            .col_expr(column, Expr::value(deleted_at))
            .filter(scope.condition::<M>())
            .filter(M::lft_column().between(bounds.lft, bounds.rgt))
            .filter(column.is_null())
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Tombstone the given live rows.
    pub(crate) async fn trash_keys<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        keys: &[M::Id],
        deleted_at: i64,
    ) -> Result<u64> {
        let column = M::deleted_at_column().ok_or(NestedSetError::SoftDeleteUnsupported)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let result = M::Entity::update_many()
            .col_expr(column, Expr::value(deleted_at))
            .filter(scope.condition::<M>())
            .filter(M::id_column().is_in(keys.iter().map(M::id_to_value)))
            .filter(column.is_null())
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Clear tombstones in `bounds` set at or after `since`.
    pub(crate) async fn untrash_range<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        bounds: Bounds,
        since: i64,
    ) -> Result<u64> {
        let column = M::deleted_at_column().ok_or(NestedSetError::SoftDeleteUnsupported)?;
        let result = M::Entity::update_many()
            .col_expr(column, SimpleExpr::Keyword(Keyword::Null))
            .filter(scope.condition::<M>())
            .filter(M::lft_column().between(bounds.lft, bounds.rgt))
            .filter(column.gte(since))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Live siblings on one side of `node`, unordered.
    pub(crate) fn sibling_side(&self, scope: &Scope, node: &M, after: bool) -> Select<M::Entity> {
        let query = self.scoped(scope, Trashed::Exclude);
        let query = match node.parent_id() {
            Some(parent) => query.filter(M::parent_column().eq(M::id_to_value(&parent))),
            None => query.filter(M::parent_column().is_null()),
        };
        if after {
            query.filter(M::lft_column().gt(node.lft()))
        } else {
            query.filter(M::lft_column().lt(node.lft()))
        }
    }

    /// Siblings on one side of `node`, nearest first.
    pub(crate) async fn siblings_toward<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        node: &M,
        after: bool,
        skip: u64,
    ) -> Result<Option<M>> {
        let query = self.sibling_side(scope, node, after);
        let query = if after {
            query.order_by_asc(M::lft_column())
        } else {
            query.order_by_desc(M::lft_column())
        };
        let sibling = query.offset(skip).one(conn).await?;
        Ok(sibling)
    }
}

/// Parent assignment; roots get an untyped `NULL` so any key type accepts it.
fn parent_value<M: NestedSetModel>(parent: Option<&M::Id>) -> SimpleExpr {
    match parent {
        Some(id) => Expr::value(M::id_to_value(id)),
        None => SimpleExpr::Keyword(Keyword::Null),
    }
}

/// Write a scope value, retrying integers at the widths the column may use.
fn set_scope_value<A: ActiveModelTrait>(
    active: &mut A,
    column: <A::Entity as EntityTrait>::Column,
    value: &Value,
) -> Result<()> {
    let err = match active.try_set(column, value.clone()) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    for form in integer_forms(value) {
        if active.try_set(column, form).is_ok() {
            return Ok(());
        }
    }
    Err(err.into())
}

/// Current time as a tombstone value.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
