//! Recomputing bounds from parent links.
//!
//! Both repair (`fix_tree`) and bulk import (`rebuild_tree`) end in the same
//! place: an adjacency of `parent -> children` that is renumbered in pre-order,
//! writing back only the rows whose bounds or parent changed.

use std::collections::HashMap;
use std::hash::Hash;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, Value,
};

use crate::bounds::{Bounds, GapShift, Patch};
use crate::error::{NestedSetError, Result};
use crate::scope::Scope;
use crate::store::{now_millis, NodeStore, Trashed};
use crate::traits::NestedSetModel;

/// One node of a hierarchy handed to [`crate::NestedSetRepository::rebuild_tree`].
///
/// A node without a key is created; a node with a key must already exist in
/// the scope and is moved under its new parent. `attributes` are written to
/// the row either way.
pub struct HierarchyNode<M>
where
    M: NestedSetModel,
{
    pub key: Option<M::Id>,
    pub attributes: Vec<(<M::Entity as EntityTrait>::Column, Value)>,
    pub children: Vec<HierarchyNode<M>>,
}

impl<M> Clone for HierarchyNode<M>
where
    M: NestedSetModel,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            attributes: self.attributes.clone(),
            children: self.children.clone(),
        }
    }
}

impl<M> Default for HierarchyNode<M>
where
    M: NestedSetModel,
{
    fn default() -> Self {
        Self {
            key: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl<M> HierarchyNode<M>
where
    M: NestedSetModel,
{
    /// A node to be created.
    pub fn new() -> Self {
        Self::default()
    }

    /// A node matching an existing row.
    pub fn existing(key: M::Id) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn with<V: Into<Value>>(
        mut self,
        column: <M::Entity as EntityTrait>::Column,
        value: V,
    ) -> Self {
        self.attributes.push((column, value.into()));
        self
    }

    pub fn child(mut self, child: HierarchyNode<M>) -> Self {
        self.children.push(child);
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = HierarchyNode<M>>,
    {
        self.children.extend(children);
        self
    }
}

/// A row as the renumbering sees it: its key and the parent it is listed under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry<Id> {
    pub key: Id,
    pub parent: Option<Id>,
}

/// The outcome of renumbering one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Placement<Id> {
    pub key: Id,
    pub parent: Option<Id>,
    pub bounds: Bounds,
}

/// Children grouped by parent. Groups remember the order their parent was
/// first seen in, which decides where orphaned groups end up.
#[derive(Debug)]
pub(crate) struct Adjacency<Id> {
    order: Vec<Option<Id>>,
    groups: HashMap<Option<Id>, Vec<Entry<Id>>>,
}

impl<Id> Default for Adjacency<Id> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            groups: HashMap::new(),
        }
    }
}

struct Frame<Id> {
    /// Parent assigned to the rows of `pending`.
    parent: Option<Id>,
    pending: std::vec::IntoIter<Entry<Id>>,
    /// The row whose children `pending` holds, with its new `lft`.
    open: Option<(Entry<Id>, i64)>,
}

impl<Id> Adjacency<Id>
where
    Id: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to the children of `parent`.
    pub(crate) fn push(&mut self, parent: Option<Id>, entry: Entry<Id>) {
        if !self.groups.contains_key(&parent) {
            self.order.push(parent.clone());
        }
        self.groups.entry(parent).or_default().push(entry);
    }

    #[cfg(test)]
    pub(crate) fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Entry<Id>>,
    {
        let mut adjacency = Self::new();
        for entry in entries {
            adjacency.push(entry.parent.clone(), entry);
        }
        adjacency
    }

    fn take(&mut self, parent: &Option<Id>) -> Vec<Entry<Id>> {
        self.groups.remove(parent).unwrap_or_default()
    }

    /// The earliest group nothing has claimed yet.
    fn next_orphan_group(&mut self) -> Option<Vec<Entry<Id>>> {
        let parent = self
            .order
            .iter()
            .find(|parent| self.groups.contains_key(*parent))?
            .clone();
        Some(self.take(&parent))
    }

    /// Renumber everything below `top` starting at `cut`.
    ///
    /// Groups whose parent is never reached (missing parents, cycles) are
    /// attached to `top` in the order they were first seen. Returns the next
    /// free bound and where every row ended up.
    pub(crate) fn renumber(mut self, top: Option<Id>, cut: i64) -> (i64, Vec<Placement<Id>>) {
        let mut changes = Vec::new();
        let first = self.take(&top);
        let mut cut = self.assign(&top, first, cut, &mut changes);
        while let Some(orphans) = self.next_orphan_group() {
            cut = self.assign(&top, orphans, cut, &mut changes);
        }
        (cut, changes)
    }

    fn assign(
        &mut self,
        top: &Option<Id>,
        rows: Vec<Entry<Id>>,
        mut cut: i64,
        changes: &mut Vec<Placement<Id>>,
    ) -> i64 {
        let mut stack = vec![Frame {
            parent: top.clone(),
            pending: rows.into_iter(),
            open: None,
        }];

        while let Some(frame) = stack.last_mut() {
            if let Some(entry) = frame.pending.next() {
                let parent = frame.parent.clone();
                let children = self.take(&Some(entry.key.clone()));
                stack.push(Frame {
                    parent: Some(entry.key.clone()),
                    pending: children.into_iter(),
                    open: Some((Entry { key: entry.key, parent }, cut)),
                });
                cut += 1;
                continue;
            }

            let Some(done) = stack.pop() else { break };
            if let Some((entry, lft)) = done.open {
                let placement = Placement {
                    key: entry.key,
                    parent: entry.parent,
                    bounds: Bounds::new(lft, cut),
                };
                cut += 1;
                changes.push(placement);
            }
        }
        cut
    }
}

/// Drop placements identical to what is stored, once `shift` has been applied
/// to the stored bounds.
fn changed<Id: Clone + Eq + Hash>(
    placements: Vec<Placement<Id>>,
    stored: &HashMap<Id, (Bounds, Option<Id>)>,
    shift: Option<Patch>,
) -> Vec<Placement<Id>> {
    placements
        .into_iter()
        .filter(|placement| {
            let current = stored.get(&placement.key).map(|(bounds, parent)| {
                let bounds = shift.map_or(*bounds, |patch| patch.apply_bounds(*bounds));
                (bounds, parent.clone())
            });
            current != Some((placement.bounds, placement.parent.clone()))
        })
        .collect()
}

#[derive(Debug)]
pub(crate) struct TreeRebuilder<M>
where
    M: NestedSetModel,
{
    store: NodeStore<M>,
}

impl<M> TreeRebuilder<M>
where
    M: NestedSetModel,
{
    pub(crate) fn new() -> Self {
        Self {
            store: NodeStore::new(),
        }
    }

    /// Recompute bounds for the whole scope or for the descendants of `root`.
    pub(crate) async fn fix_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        root: Option<&M::Id>,
    ) -> Result<u64> {
        let root = match root {
            Some(key) => Some(self.store.find_in_scope(conn, scope, key).await?),
            None => None,
        };
        let within = root.as_ref().map(|model| model.bounds());
        let rows = self
            .store
            .nodes(conn, scope, within, Trashed::Include)
            .await?;

        let mut stored = HashMap::with_capacity(rows.len());
        let mut adjacency = Adjacency::new();
        for model in &rows {
            stored.insert(model.id(), (model.bounds(), model.parent_id()));
            adjacency.push(
                model.parent_id(),
                Entry {
                    key: model.id(),
                    parent: model.parent_id(),
                },
            );
        }

        let changed = self
            .fix_nodes(conn, scope, adjacency, &stored, root.as_ref())
            .await?;
        tracing::info!(
            entity = M::nested_set_config().entity_name(),
            scope = ?scope.values(),
            rows = changed,
            "fixed nested set"
        );
        Ok(changed)
    }

    /// Renumber `adjacency` below `root` (or from 1) and persist the rows
    /// that changed. When repairing under a root whose span changed, the rest
    /// of the scope is shifted and the root's `rgt` follows.
    async fn fix_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        adjacency: Adjacency<M::Id>,
        stored: &HashMap<M::Id, (Bounds, Option<M::Id>)>,
        root: Option<&M>,
    ) -> Result<u64> {
        let (top, start) = match root {
            Some(model) => (Some(model.id()), model.lft() + 1),
            None => (None, 1),
        };
        let (cut, placements) = adjacency.renumber(top, start);

        let mut written = 0;
        let mut shift = None;
        if let Some(model) = root {
            let grown = cut - model.rgt();
            if grown != 0 {
                let patch = Patch::from(GapShift::new(model.rgt() + 1, grown));
                written += self.store.apply_patch(conn, scope, patch).await?;
                written += self
                    .store
                    .write_node(
                        conn,
                        &model.id(),
                        Bounds::new(model.lft(), cut),
                        model.parent_id().as_ref(),
                    )
                    .await?;
                shift = Some(patch);
            }
        }

        let placements = changed(placements, stored, shift);
        for placement in &placements {
            written += self
                .store
                .write_node(
                    conn,
                    &placement.key,
                    placement.bounds,
                    placement.parent.as_ref(),
                )
                .await?;
        }
        Ok(written)
    }

    /// Replace the structure of the scope (or of the descendants of `root`)
    /// with `data`.
    ///
    /// Existing rows the input does not mention are deleted when
    /// `delete_missing` is set (tombstoned for soft-delete models), and kept
    /// under their current parent otherwise.
    pub(crate) async fn rebuild_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        data: Vec<HierarchyNode<M>>,
        delete_missing: bool,
        root: Option<&M::Id>,
    ) -> Result<u64> {
        let root = match root {
            Some(key) => Some(self.store.find_in_scope(conn, scope, key).await?),
            None => None,
        };
        let within = root.as_ref().map(|model| model.bounds());
        let rows = self
            .store
            .nodes(conn, scope, within, Trashed::Include)
            .await?;

        let order: Vec<M::Id> = rows.iter().map(|model| model.id()).collect();
        let mut existing: HashMap<M::Id, M> =
            rows.into_iter().map(|model| (model.id(), model)).collect();
        let mut stored = HashMap::with_capacity(existing.len());
        let mut adjacency = Adjacency::new();
        let top = root.as_ref().map(|model| model.id());

        let mut created = 0u64;
        let mut stack: Vec<(Option<M::Id>, HierarchyNode<M>)> = data
            .into_iter()
            .rev()
            .map(|node| (top.clone(), node))
            .collect();

        while let Some((parent, node)) = stack.pop() {
            let HierarchyNode {
                key,
                attributes,
                children,
            } = node;

            let entry = match key {
                None => {
                    let model = self
                        .create_detached(conn, scope, parent.clone(), attributes)
                        .await?;
                    created += 1;
                    Entry {
                        key: model.id(),
                        parent: parent.clone(),
                    }
                }
                Some(key) => {
                    let model = existing
                        .remove(&key)
                        .ok_or_else(|| NestedSetError::not_found(&key))?;
                    self.update_attributes(conn, &key, attributes).await?;
                    stored.insert(key.clone(), (model.bounds(), model.parent_id()));
                    Entry {
                        key,
                        parent: parent.clone(),
                    }
                }
            };

            let key = entry.key.clone();
            adjacency.push(parent, entry);
            stack.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| (Some(key.clone()), child)),
            );
        }

        let leftover: Vec<M> = order
            .iter()
            .filter_map(|key| existing.remove(key))
            .collect();
        let mut removed = 0u64;
        if !leftover.is_empty() {
            let keys: Vec<M::Id> = leftover.iter().map(|model| model.id()).collect();
            let soft = M::nested_set_config().uses_soft_delete();

            if delete_missing && !soft {
                removed = self.store.delete_keys(conn, scope, &keys).await?;
            } else {
                if delete_missing {
                    removed = self
                        .store
                        .trash_keys(conn, scope, &keys, now_millis())
                        .await?;
                }
                for model in leftover {
                    stored.insert(model.id(), (model.bounds(), model.parent_id()));
                    adjacency.push(
                        model.parent_id(),
                        Entry {
                            key: model.id(),
                            parent: model.parent_id(),
                        },
                    );
                }
            }
        }

        let changed = self
            .fix_nodes(conn, scope, adjacency, &stored, root.as_ref())
            .await?;
        tracing::info!(
            entity = M::nested_set_config().entity_name(),
            scope = ?scope.values(),
            created,
            removed,
            rows = changed,
            "rebuilt nested set"
        );
        Ok(changed)
    }

    /// Insert a row with placeholder bounds; the renumbering assigns real ones.
    async fn create_detached<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &Scope,
        parent: Option<M::Id>,
        attributes: Vec<(<M::Entity as EntityTrait>::Column, Value)>,
    ) -> Result<M> {
        let mut active = <M::ActiveModel as ActiveModelBehavior>::new();
        for (column, value) in attributes {
            active.try_set(column, value)?;
        }
        M::set_parent(&mut active, parent);
        M::set_bounds(&mut active, 0, 0)?;
        self.store.insert(conn, scope, active).await
    }

    async fn update_attributes<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &M::Id,
        attributes: Vec<(<M::Entity as EntityTrait>::Column, Value)>,
    ) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let update = attributes
            .into_iter()
            .fold(M::Entity::update_many(), |update, (column, value)| {
                update.col_expr(column, Expr::value(value))
            });
        update
            .filter(M::id_column().eq(M::id_to_value(key)))
            .exec(conn)
            .await?;
        Ok(())
    }
}
