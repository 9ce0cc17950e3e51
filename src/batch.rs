//! Opt-in working set of caller-held node handles.
//!
//! Plain repository calls always re-read bounds from storage. A [`TreeBatch`]
//! instead keeps the handles a caller asked to track and replays every patch
//! it sends to storage on them, so a sequence of operations (say, appending
//! several children to one parent) can resolve positions from memory.

use std::collections::HashMap;
use std::hash::Hash;

use sea_orm::{DatabaseConnection, DatabaseTransaction};
use serde::Serialize;

use crate::bounds::{Bounds, Patch};
use crate::checker::{self, ErrorCounts};
use crate::error::Result;
use crate::lock::LockedTransaction;
use crate::mutation::{Position, TreeMutator};
use crate::rebuild::{HierarchyNode, TreeRebuilder};
use crate::scope::Scope;
use crate::store::NodeStore;
use crate::traits::NestedSetModel;

/// Cached position of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeHandle<Id> {
    key: Id,
    parent: Option<Id>,
    bounds: Bounds,
    fresh: bool,
}

impl<Id> NodeHandle<Id> {
    pub fn new(key: Id, parent: Option<Id>, bounds: Bounds) -> Self {
        Self {
            key,
            parent,
            bounds,
            fresh: true,
        }
    }

    pub fn from_model<M>(model: &M) -> Self
    where
        M: NestedSetModel<Id = Id>,
    {
        Self::new(model.id(), model.parent_id(), model.bounds())
    }

    pub fn key(&self) -> &Id {
        &self.key
    }

    pub fn parent(&self) -> Option<&Id> {
        self.parent.as_ref()
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn lft(&self) -> i64 {
        self.bounds.lft
    }

    pub fn rgt(&self) -> i64 {
        self.bounds.rgt
    }

    /// `false` once an operation touched the node in a way the batch could not
    /// replay; the handle must be refreshed before its numbers mean anything.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Handles keyed by node id. An empty set is what plain calls run with.
#[derive(Debug)]
pub(crate) struct WorkingSet<Id> {
    handles: HashMap<Id, NodeHandle<Id>>,
}

impl<Id> Default for WorkingSet<Id> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }
}

impl<Id> WorkingSet<Id>
where
    Id: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&mut self, handle: NodeHandle<Id>) {
        self.handles.insert(handle.key.clone(), handle);
    }

    pub(crate) fn get(&self, key: &Id) -> Option<&NodeHandle<Id>> {
        self.handles.get(key)
    }

    /// The handle for `key`, if it is tracked and still trustworthy.
    pub(crate) fn fresh(&self, key: &Id) -> Option<&NodeHandle<Id>> {
        self.handles.get(key).filter(|handle| handle.fresh)
    }

    /// Replay a patch that was just written to storage.
    pub(crate) fn observe(&mut self, patch: &Patch) {
        for handle in self.handles.values_mut().filter(|h| h.fresh) {
            handle.bounds = patch.apply_bounds(handle.bounds);
        }
    }

    /// Record where an inserted or moved node ended up.
    pub(crate) fn place(&mut self, key: &Id, bounds: Bounds, parent: Option<Id>) {
        if let Some(handle) = self.handles.get_mut(key) {
            handle.bounds = bounds;
            handle.parent = parent;
            handle.fresh = true;
        }
    }

    pub(crate) fn reparent(&mut self, key: &Id, parent: Option<Id>) {
        if let Some(handle) = self.handles.get_mut(key).filter(|h| h.fresh) {
            handle.parent = parent;
        }
    }

    /// Mark every handle whose node lies in `bounds` as stale.
    pub(crate) fn invalidate_within(&mut self, bounds: Bounds) {
        for handle in self.handles.values_mut() {
            if handle.bounds.lft >= bounds.lft && handle.bounds.lft <= bounds.rgt {
                handle.fresh = false;
            }
        }
    }

    pub(crate) fn invalidate_all(&mut self) {
        for handle in self.handles.values_mut() {
            handle.fresh = false;
        }
    }
}

/// A sequence of operations over one scope inside a single locked transaction.
///
/// Nothing is visible to other connections until [`TreeBatch::commit`];
/// dropping the batch rolls everything back.
pub struct TreeBatch<M>
where
    M: NestedSetModel,
{
    guard: LockedTransaction,
    scope: Scope,
    store: NodeStore<M>,
    mutator: TreeMutator<M>,
    working: WorkingSet<M::Id>,
}

impl<M> TreeBatch<M>
where
    M: NestedSetModel,
{
    pub(crate) async fn begin(db: &DatabaseConnection, scope: Scope) -> Result<Self> {
        scope.validate::<M>()?;
        let guard = LockedTransaction::acquire(M::nested_set_config(), db, &scope).await?;
        Ok(Self {
            guard,
            scope,
            store: NodeStore::new(),
            mutator: TreeMutator::new(),
            working: WorkingSet::new(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The batch transaction, for reads that must see uncommitted changes.
    pub fn connection(&self) -> &DatabaseTransaction {
        self.guard.connection()
    }

    /// Start tracking `key`, reading its current position.
    pub async fn track(&mut self, key: &M::Id) -> Result<NodeHandle<M::Id>> {
        let model = self
            .store
            .find_live(self.guard.connection(), &self.scope, key)
            .await?;
        let handle = NodeHandle::from_model(&model);
        self.working.track(handle.clone());
        Ok(handle)
    }

    /// Re-read a tracked handle, making it fresh again.
    pub async fn refresh(&mut self, key: &M::Id) -> Result<NodeHandle<M::Id>> {
        self.track(key).await
    }

    pub fn handle(&self, key: &M::Id) -> Option<&NodeHandle<M::Id>> {
        self.working.get(key)
    }

    pub async fn insert(&mut self, position: &Position<M::Id>, height: i64) -> Result<Bounds> {
        let conn = self.guard.connection();
        let (bounds, _) = self
            .mutator
            .insert(conn, &self.scope, position, height, &mut self.working)
            .await?;
        Ok(bounds)
    }

    /// Insert a new row at `position`; the new node is tracked.
    pub async fn create(
        &mut self,
        active: M::ActiveModel,
        position: &Position<M::Id>,
    ) -> Result<M> {
        let conn = self.guard.connection();
        let model = self
            .mutator
            .create(conn, &self.scope, active, position, &mut self.working)
            .await?;
        self.working.track(NodeHandle::from_model(&model));
        Ok(model)
    }

    pub async fn move_node(&mut self, key: &M::Id, position: &Position<M::Id>) -> Result<u64> {
        let conn = self.guard.connection();
        self.mutator
            .move_node(conn, &self.scope, key, position, &mut self.working)
            .await
    }

    pub async fn make_root(&mut self, key: &M::Id) -> Result<u64> {
        let conn = self.guard.connection();
        self.mutator
            .make_root(conn, &self.scope, key, &mut self.working)
            .await
    }

    pub async fn delete_subtree(&mut self, key: &M::Id, hard: bool) -> Result<u64> {
        let conn = self.guard.connection();
        self.mutator
            .delete_subtree(conn, &self.scope, key, hard, &mut self.working)
            .await
    }

    pub async fn restore(&mut self, key: &M::Id) -> Result<u64> {
        let conn = self.guard.connection();
        self.mutator.restore(conn, &self.scope, key).await
    }

    pub async fn fix_tree(&mut self, root: Option<&M::Id>) -> Result<u64> {
        let conn = self.guard.connection();
        let changed = TreeRebuilder::<M>::new()
            .fix_tree(conn, &self.scope, root)
            .await?;
        self.working.invalidate_all();
        Ok(changed)
    }

    pub async fn rebuild_tree(
        &mut self,
        data: Vec<HierarchyNode<M>>,
        delete_missing: bool,
        root: Option<&M::Id>,
    ) -> Result<u64> {
        let conn = self.guard.connection();
        let changed = TreeRebuilder::<M>::new()
            .rebuild_tree(conn, &self.scope, data, delete_missing, root)
            .await?;
        self.working.invalidate_all();
        Ok(changed)
    }

    pub async fn count_errors(&self) -> Result<ErrorCounts> {
        checker::count_errors::<M, _>(self.guard.connection(), &self.scope).await
    }

    pub async fn commit(self) -> Result<()> {
        self.guard.commit().await
    }

    pub async fn rollback(self) -> Result<()> {
        self.guard.rollback().await
    }
}
