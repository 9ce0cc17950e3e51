//! Insert, move and delete expressed as bounds patches.
//!
//! Every operation here runs on a connection the caller already holds inside a
//! locked transaction. Structural preconditions are checked before the first
//! write, so a rejected operation leaves storage untouched.

use sea_orm::ConnectionTrait;

use crate::batch::WorkingSet;
use crate::bounds::{Bounds, GapShift, Patch, RangeMove};
use crate::error::{NestedSetError, Result};
use crate::scope::Scope;
use crate::store::NodeStore;
use crate::traits::NestedSetModel;

/// Where a node goes, relative to another node of the same scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position<Id> {
    /// After every existing root.
    Root,
    /// Last child of the given node.
    AppendTo(Id),
    /// First child of the given node.
    PrependTo(Id),
    /// Previous sibling of the given node.
    Before(Id),
    /// Next sibling of the given node.
    After(Id),
}

/// A resolved position: the cut point the node will start at and its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Target<Id> {
    cut: i64,
    parent: Option<Id>,
}

#[derive(Debug)]
pub(crate) struct TreeMutator<M>
where
    M: NestedSetModel,
{
    store: NodeStore<M>,
}

impl<M> TreeMutator<M>
where
    M: NestedSetModel,
{
    pub(crate) fn new() -> Self {
        Self {
            store: NodeStore::new(),
        }
    }

    /// Bounds and parent of a live anchor node, from the working set when it
    /// holds a fresh copy.
    async fn anchor<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        working: &WorkingSet<M::Id>,
    ) -> Result<(Bounds, Option<M::Id>)> {
        if let Some(handle) = working.fresh(key) {
            return Ok((handle.bounds(), handle.parent().cloned()));
        }
        let model = self.store.find_live(conn, scope, key).await?;
        Ok((model.bounds(), model.parent_id()))
    }

    async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        position: &Position<M::Id>,
        working: &WorkingSet<M::Id>,
    ) -> Result<Target<M::Id>> {
        let target = match position {
            Position::Root => Target {
                cut: self.store.max_rgt(conn, scope).await? + 1,
                parent: None,
            },
            Position::AppendTo(key) => {
                let (bounds, _) = self.anchor(conn, scope, key, working).await?;
                Target {
                    cut: bounds.rgt,
                    parent: Some(key.clone()),
                }
            }
            Position::PrependTo(key) => {
                let (bounds, _) = self.anchor(conn, scope, key, working).await?;
                Target {
                    cut: bounds.lft + 1,
                    parent: Some(key.clone()),
                }
            }
            Position::Before(key) => {
                let (bounds, parent) = self.anchor(conn, scope, key, working).await?;
                Target {
                    cut: bounds.lft,
                    parent,
                }
            }
            Position::After(key) => {
                let (bounds, parent) = self.anchor(conn, scope, key, working).await?;
                Target {
                    cut: bounds.rgt + 1,
                    parent,
                }
            }
        };
        Ok(target)
    }

    /// Open room for a subtree of `height` at `position`.
    ///
    /// Returns the bounds the subtree root must take and its parent. No row is
    /// assigned those bounds here; the caller writes them.
    pub(crate) async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        position: &Position<M::Id>,
        height: i64,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<(Bounds, Option<M::Id>)> {
        if height < 2 || height % 2 != 0 {
            return Err(NestedSetError::InvalidHeight(height));
        }

        let target = self.resolve(conn, scope, position, working).await?;
        let patch = Patch::from(GapShift::new(target.cut, height));
        self.store.apply_patch(conn, scope, patch).await?;
        working.observe(&patch);

        Ok((Bounds::spanning(target.cut, height), target.parent))
    }

    /// Insert `active` as a new leaf at `position`.
    pub(crate) async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        mut active: M::ActiveModel,
        position: &Position<M::Id>,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<M> {
        let (bounds, parent) = self.insert(conn, scope, position, 2, working).await?;
        M::set_bounds(&mut active, bounds.lft, bounds.rgt)?;
        M::set_parent(&mut active, parent);
        self.store.insert(conn, scope, active).await
    }

    /// Relocate the subtree rooted at `key`.
    ///
    /// Bounds of the moved node are always re-read; only the anchor may come
    /// from the working set.
    pub(crate) async fn move_node<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        position: &Position<M::Id>,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<u64> {
        let node = self.store.find_live(conn, scope, key).await?;
        let target = self.resolve(conn, scope, position, working).await?;
        let plan = RangeMove::plan(node.bounds(), target.cut)?;
        let parent_changed = node.parent_id() != target.parent;

        let mut affected = 0;
        if let Some(mv) = plan {
            let patch = Patch::from(mv);
            affected = self.store.apply_patch(conn, scope, patch).await?;
            working.observe(&patch);
            working.place(key, mv.destination(), target.parent.clone());
        }

        if parent_changed {
            self.store
                .set_parent(conn, key, target.parent.as_ref())
                .await?;
            working.reparent(key, target.parent.clone());
            affected = affected.max(1);
        }

        tracing::debug!(
            entity = M::nested_set_config().entity_name(),
            key = ?key,
            cut = target.cut,
            rows = affected,
            "moved node"
        );
        Ok(affected)
    }

    /// Move `key` after the last root unless it is a root already.
    pub(crate) async fn make_root<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<u64> {
        let node = self.store.find_live(conn, scope, key).await?;
        if node.is_root() {
            return Ok(0);
        }
        self.move_node(conn, scope, key, &Position::Root, working)
            .await
    }

    /// Remove the subtree rooted at `key`.
    ///
    /// A hard delete drops the rows and closes the gap. A soft delete only
    /// stamps tombstones; the interval stays reserved until a hard delete or a
    /// rebuild reclaims it. Models without a tombstone column are always
    /// deleted hard.
    pub(crate) async fn delete_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        hard: bool,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<u64> {
        let node = self.store.find_in_scope(conn, scope, key).await?;
        let bounds = node.bounds();

        let removed = if hard || !M::nested_set_config().uses_soft_delete() {
            let removed = self.store.delete_range(conn, scope, bounds).await?;
            working.invalidate_within(bounds);
            let patch = Patch::from(GapShift::closing(bounds));
            self.store.apply_patch(conn, scope, patch).await?;
            working.observe(&patch);
            removed
        } else {
            let deleted_at = self.store.next_tombstone(conn, scope, bounds).await?;
            let trashed = self
                .store
                .trash_range(conn, scope, bounds, deleted_at)
                .await?;
            working.invalidate_within(bounds);
            trashed
        };

        tracing::debug!(
            entity = M::nested_set_config().entity_name(),
            key = ?key,
            hard,
            rows = removed,
            "deleted subtree"
        );
        Ok(removed)
    }

    /// Clear the tombstone of `key` and of descendants trashed with or after it.
    pub(crate) async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
    ) -> Result<u64> {
        if !M::nested_set_config().uses_soft_delete() {
            return Err(NestedSetError::SoftDeleteUnsupported);
        }
        let node = self.store.find_in_scope(conn, scope, key).await?;
        let Some(deleted_at) = node.deleted_at() else {
            return Ok(0);
        };
        self.store
            .untrash_range(conn, scope, node.bounds(), deleted_at)
            .await
    }

    /// Swap `key` past `amount` siblings; `false` when there are not that many.
    pub(crate) async fn shift<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        key: &M::Id,
        amount: u64,
        forward: bool,
        working: &mut WorkingSet<M::Id>,
    ) -> Result<bool> {
        if amount == 0 {
            return Ok(false);
        }
        let node = self.store.find_live(conn, scope, key).await?;
        let Some(sibling) = self
            .store
            .siblings_toward(conn, scope, &node, forward, amount - 1)
            .await?
        else {
            return Ok(false);
        };

        let position = if forward {
            Position::After(sibling.id())
        } else {
            Position::Before(sibling.id())
        };
        self.move_node(conn, scope, key, &position, working).await?;
        Ok(true)
    }
}
