//! Nested set trees for SeaORM.
//!
//! Each row stores `lft`/`rgt` interval bounds and a parent reference so that
//! the descendants of a node are exactly the rows whose bounds fall inside its
//! own. Descendant and ancestor lookups become single range queries; in
//! exchange every insert, move and delete renumbers part of the tree. This
//! crate owns that renumbering: it expresses each mutation as one set-based
//! `UPDATE`, runs it inside a scope-locked transaction, and can detect and
//! repair a tree whose bounds drifted from its parent links.
//!
//! PostgreSQL is the production backend; SQLite is accepted as well.

pub mod batch;
pub mod bounds;
pub mod checker;
pub mod config;
pub mod error;
pub mod lock;
pub mod mutation;
pub mod rebuild;
pub mod repository;
pub mod scope;
mod store;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::batch::{NodeHandle, TreeBatch};
    pub use crate::bounds::Bounds;
    pub use crate::checker::ErrorCounts;
    pub use crate::config::{AdvisoryLockStrategy, NestedSetConfig, NestedSetOptions};
    pub use crate::error::NestedSetError;
    pub use crate::mutation::Position;
    pub use crate::rebuild::HierarchyNode;
    pub use crate::repository::NestedSetRepository;
    pub use crate::scope::Scope;
    pub use crate::traits::NestedSetModel;
}

pub use batch::{NodeHandle, TreeBatch};
pub use bounds::{Bounds, GapShift, Patch, RangeMove};
pub use checker::{count_errors, ErrorCounts};
pub use config::{AdvisoryLockKey, AdvisoryLockStrategy, NestedSetConfig, NestedSetOptions};
pub use error::{NestedSetError, Result};
pub use mutation::Position;
#[doc(hidden)]
pub use nested_set_macros::NestedSetModel;
pub use nested_set_macros::NestedSetModel as NestedSetModelDerive;
pub use rebuild::HierarchyNode;
pub use repository::NestedSetRepository;
pub use scope::Scope;
pub use store::Trashed;
pub use traits::NestedSetModel;
