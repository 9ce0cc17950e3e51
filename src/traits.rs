use std::fmt::Debug;
use std::hash::Hash;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::bounds::Bounds;
use crate::config::NestedSetConfig;
use crate::error::{NestedSetError, Result};

/// Trait implemented by SeaORM `Model` types stored as a nested set.
///
/// Implementations are normally provided by the `#[derive(NestedSetModel)]` macro.
pub trait NestedSetModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn nested_set_config() -> &'static NestedSetConfig;

    fn id(&self) -> Self::Id;
    fn parent_id(&self) -> Option<Self::Id>;
    fn lft(&self) -> i64;
    fn rgt(&self) -> i64;
    /// Values of the scope columns, in [`Self::scope_columns`] order.
    fn scope_values(&self) -> Vec<Value>;
    /// Tombstone timestamp (unix milliseconds); always `None` without soft delete.
    fn deleted_at(&self) -> Option<i64>;

    fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>);
    /// Fails when a bound does not fit the model's bound columns.
    fn set_bounds(active: &mut Self::ActiveModel, lft: i64, rgt: i64) -> Result<()>;
    fn id_to_value(id: &Self::Id) -> Value;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn parent_column() -> <Self::Entity as EntityTrait>::Column;
    fn lft_column() -> <Self::Entity as EntityTrait>::Column;
    fn rgt_column() -> <Self::Entity as EntityTrait>::Column;
    fn scope_columns() -> Vec<<Self::Entity as EntityTrait>::Column>;
    fn deleted_at_column() -> Option<<Self::Entity as EntityTrait>::Column>;

    fn bounds(&self) -> Bounds {
        Bounds::new(self.lft(), self.rgt())
    }

    fn is_root(&self) -> bool {
        self.parent_id().is_none()
    }

    fn is_trashed(&self) -> bool {
        self.deleted_at().is_some()
    }

    fn is_descendant_of(&self, other: &Self) -> bool {
        other.bounds().contains(&self.bounds())
    }

    fn is_ancestor_of(&self, other: &Self) -> bool {
        other.is_descendant_of(self)
    }

    fn is_child_of(&self, other: &Self) -> bool {
        self.parent_id() == Some(other.id())
    }

    fn is_sibling_of(&self, other: &Self) -> bool {
        self.parent_id() == other.parent_id()
    }
}

/// Convert a computed bound to the integer type of a bound column.
#[doc(hidden)]
pub fn narrow_bound<T: TryFrom<i64>>(entity: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        NestedSetError::invariant(format!(
            "bound {value} does not fit the {entity} bound columns"
        ))
    })
}
