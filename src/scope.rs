//! Partitioning of one table into independent trees.
//!
//! Every query issued by the crate is filtered through a [`Scope`]; bounds are
//! only ever compared between rows whose scope columns hold identical values.

use crc32fast::Hasher;
use sea_orm::sea_query::{Alias, Condition, Expr};
use sea_orm::{ColumnTrait, Value};

use crate::error::{NestedSetError, Result};
use crate::traits::NestedSetModel;

/// Values of the scope columns identifying one tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scope {
    values: Vec<Value>,
}

impl Scope {
    /// The scope of a model without scope columns.
    pub fn global() -> Self {
        Self::default()
    }

    /// Scope values in the order the model declares its scope columns.
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The scope `model` lives in.
    pub fn of<M: NestedSetModel>(model: &M) -> Self {
        Self {
            values: model.scope_values(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_global(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether `model` lives in this tree.
    ///
    /// Integers compare by value, as the SQL filter does, so a scope built
    /// from `i64` values matches rows whose scope columns are `i32`.
    pub fn contains<M: NestedSetModel>(&self, model: &M) -> bool {
        let values = model.scope_values();
        values.len() == self.values.len()
            && values
                .iter()
                .zip(&self.values)
                .all(|(stored, wanted)| same_value(stored, wanted))
    }

    /// Reject a scope whose arity does not match the model's scope columns.
    pub(crate) fn validate<M: NestedSetModel>(&self) -> Result<()> {
        let expected = M::scope_columns().len();
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(NestedSetError::invariant(format!(
                "{} expects {expected} scope value(s), got {}",
                M::nested_set_config().entity_name(),
                self.values.len()
            )))
        }
    }

    /// Fail with `ScopeMismatch` when `model` belongs to another tree.
    pub(crate) fn ensure_contains<M: NestedSetModel>(&self, model: &M) -> Result<()> {
        if self.contains(model) {
            Ok(())
        } else {
            Err(NestedSetError::scope_mismatch(&model.id()))
        }
    }

    /// Filter restricting a query on the entity table to this scope.
    pub fn condition<M: NestedSetModel>(&self) -> Condition {
        M::scope_columns()
            .into_iter()
            .zip(self.values.iter().cloned())
            .fold(Condition::all(), |cond, (col, value)| {
                cond.add(col.eq(value))
            })
    }

    /// Same filter for a self-joined table reference.
    pub fn aliased_condition<M: NestedSetModel>(&self, alias: &Alias) -> Condition {
        M::scope_columns()
            .into_iter()
            .zip(self.values.iter().cloned())
            .fold(Condition::all(), |cond, (col, value)| {
                cond.add(Expr::col((alias.clone(), col)).eq(value))
            })
    }

    /// Stable hash used to key per-scope advisory locks.
    pub(crate) fn fingerprint(&self) -> Option<u32> {
        if self.values.is_empty() {
            return None;
        }
        let mut hasher = Hasher::new();
        for value in &self.values {
            let text = match as_integer(value) {
                Some(number) => format!("Integer({number})"),
                None => format!("{value:?}"),
            };
            hasher.update(text.as_bytes());
            hasher.update(b"\x1f");
        }
        Some(hasher.finalize())
    }
}

fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::TinyInt(Some(v)) => Some((*v).into()),
        Value::SmallInt(Some(v)) => Some((*v).into()),
        Value::Int(Some(v)) => Some((*v).into()),
        Value::BigInt(Some(v)) => Some((*v).into()),
        Value::TinyUnsigned(Some(v)) => Some((*v).into()),
        Value::SmallUnsigned(Some(v)) => Some((*v).into()),
        Value::Unsigned(Some(v)) => Some((*v).into()),
        Value::BigUnsigned(Some(v)) => Some((*v).into()),
        _ => None,
    }
}

/// Scope value equality with integer widths ignored.
pub(crate) fn same_value(a: &Value, b: &Value) -> bool {
    match (as_integer(a), as_integer(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// `value` under every integer width that can hold it, narrowest signed first.
pub(crate) fn integer_forms(value: &Value) -> Vec<Value> {
    let Some(number) = as_integer(value) else {
        return Vec::new();
    };
    [
        i32::try_from(number).ok().map(|v| Value::Int(Some(v))),
        i64::try_from(number).ok().map(|v| Value::BigInt(Some(v))),
        i16::try_from(number).ok().map(|v| Value::SmallInt(Some(v))),
        i8::try_from(number).ok().map(|v| Value::TinyInt(Some(v))),
        u32::try_from(number).ok().map(|v| Value::Unsigned(Some(v))),
        u64::try_from(number).ok().map(|v| Value::BigUnsigned(Some(v))),
        u16::try_from(number).ok().map(|v| Value::SmallUnsigned(Some(v))),
        u8::try_from(number).ok().map(|v| Value::TinyUnsigned(Some(v))),
    ]
    .into_iter()
    .flatten()
    .collect()
}
