//! Structural health report for one scope.
//!
//! Each category is a single `COUNT` query over the table (self-joined where a
//! category compares rows). The report is a diagnostic: a broken tree is a
//! normal result here, and [`crate::NestedSetRepository::fix_tree`] is the way
//! back.

use sea_orm::sea_query::{Alias, Condition, Expr, Query, SelectStatement, SimpleExpr};
use sea_orm::{ConnectionTrait, EntityName, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scope::Scope;
use crate::traits::NestedSetModel;

/// Error count per corruption category; all zero for a valid tree.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorCounts {
    /// Rows with `lft >= rgt` or an odd height.
    pub oddness: u64,
    /// Pairs of rows sharing a bound value.
    pub duplicates: u64,
    /// Rows whose parent is not their nearest enclosing interval.
    pub wrong_parent: u64,
    /// Rows pointing at a parent that does not exist in the scope.
    pub missing_parent: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.oddness + self.duplicates + self.wrong_parent + self.missing_parent
    }

    pub fn is_broken(&self) -> bool {
        self.total() > 0
    }
}

const COUNT_ALIAS: &str = "errors";

fn table<M: NestedSetModel>() -> Alias {
    Alias::new(<M::Entity as Default>::default().table_name())
}

fn col<M: NestedSetModel>(
    alias: &Alias,
    column: <M::Entity as EntityTrait>::Column,
) -> Expr {
    Expr::col((alias.clone(), column))
}

fn counting<M: NestedSetModel>(alias: &Alias) -> SelectStatement {
    let mut select = Query::select();
    select
        .expr_as(col::<M>(alias, M::id_column()).count(), Alias::new(COUNT_ALIAS))
        .from_as(table::<M>(), alias.clone());
    select
}

/// `a BETWEEN b.lft AND b.rgt`.
fn within<M: NestedSetModel>(value: Expr, outer: &Alias) -> SimpleExpr {
    value.between(
        col::<M>(outer, M::lft_column()),
        col::<M>(outer, M::rgt_column()),
    )
}

pub(crate) fn oddness_query<M: NestedSetModel>(scope: &Scope) -> SelectStatement {
    let c = Alias::new("c");
    let lft = col::<M>(&c, M::lft_column());
    let rgt = col::<M>(&c, M::rgt_column());

    let mut select = counting::<M>(&c);
    select.cond_where(
        Condition::all().add(scope.aliased_condition::<M>(&c)).add(
            Condition::any()
                .add(col::<M>(&c, M::lft_column()).gte(col::<M>(&c, M::rgt_column())))
                .add(Expr::cust_with_exprs(
                    "($1 - $2) % 2 = 0",
                    [SimpleExpr::from(rgt), SimpleExpr::from(lft)],
                )),
        ),
    );
    select
}

pub(crate) fn duplicates_query<M: NestedSetModel>(scope: &Scope) -> SelectStatement {
    let c1 = Alias::new("c1");
    let c2 = Alias::new("c2");
    let bound = |alias: &Alias, lft: bool| {
        if lft {
            col::<M>(alias, M::lft_column())
        } else {
            col::<M>(alias, M::rgt_column())
        }
    };

    let mut select = counting::<M>(&c1);
    select.from_as(table::<M>(), c2.clone()).cond_where(
        Condition::all()
            .add(col::<M>(&c1, M::id_column()).lt(col::<M>(&c2, M::id_column())))
            .add(scope.aliased_condition::<M>(&c1))
            .add(scope.aliased_condition::<M>(&c2))
            .add(
                Condition::any()
                    .add(bound(&c1, true).eq(bound(&c2, true)))
                    .add(bound(&c1, false).eq(bound(&c2, false)))
                    .add(bound(&c1, true).eq(bound(&c2, false)))
                    .add(bound(&c1, false).eq(bound(&c2, true))),
            ),
    );
    select
}

/// A child is misparented when it lies outside its parent, or when some third
/// row sits between the two.
pub(crate) fn wrong_parent_query<M: NestedSetModel>(scope: &Scope) -> SelectStatement {
    let c = Alias::new("c");
    let p = Alias::new("p");
    let i = Alias::new("i");

    let mut intermediate = Query::select();
    intermediate
        .expr(Expr::val(1))
        .from_as(table::<M>(), i.clone())
        .cond_where(
            Condition::all()
                .add(scope.aliased_condition::<M>(&i))
                .add(col::<M>(&i, M::id_column()).ne(col::<M>(&p, M::id_column())))
                .add(col::<M>(&i, M::id_column()).ne(col::<M>(&c, M::id_column())))
                .add(within::<M>(col::<M>(&c, M::lft_column()), &i))
                .add(within::<M>(col::<M>(&i, M::lft_column()), &p)),
        );

    let mut select = counting::<M>(&c);
    select.from_as(table::<M>(), p.clone()).cond_where(
        Condition::all()
            .add(scope.aliased_condition::<M>(&c))
            .add(scope.aliased_condition::<M>(&p))
            .add(col::<M>(&c, M::parent_column()).equals((p.clone(), M::id_column())))
            .add(
                Condition::any()
                    .add(within::<M>(col::<M>(&c, M::lft_column()), &p).not())
                    .add(Expr::exists(intermediate)),
            ),
    );
    select
}

pub(crate) fn missing_parent_query<M: NestedSetModel>(scope: &Scope) -> SelectStatement {
    let c = Alias::new("c");
    let p = Alias::new("p");

    let mut parent = Query::select();
    parent
        .expr(Expr::val(1))
        .from_as(table::<M>(), p.clone())
        .cond_where(
            Condition::all()
                .add(scope.aliased_condition::<M>(&p))
                .add(col::<M>(&p, M::id_column()).equals((c.clone(), M::parent_column()))),
        );

    let mut select = counting::<M>(&c);
    select.cond_where(
        Condition::all()
            .add(scope.aliased_condition::<M>(&c))
            .add(col::<M>(&c, M::parent_column()).is_not_null())
            .add(Expr::exists(parent).not()),
    );
    select
}

async fn count<C: ConnectionTrait>(conn: &C, select: &SelectStatement) -> Result<u64> {
    let statement = conn.get_database_backend().build(select);
    let count = match conn.query_one(statement).await? {
        Some(row) => row.try_get::<i64>("", COUNT_ALIAS)?,
        None => 0,
    };
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Run every category over `scope`. Tombstoned rows are included: they keep
/// their bounds and must stay consistent with the live ones.
pub async fn count_errors<M, C>(conn: &C, scope: &Scope) -> Result<ErrorCounts>
where
    M: NestedSetModel,
    C: ConnectionTrait,
{
    scope.validate::<M>()?;

    let counts = ErrorCounts {
        oddness: count(conn, &oddness_query::<M>(scope)).await?,
        duplicates: count(conn, &duplicates_query::<M>(scope)).await?,
        wrong_parent: count(conn, &wrong_parent_query::<M>(scope)).await?,
        missing_parent: count(conn, &missing_parent_query::<M>(scope)).await?,
    };

    if counts.is_broken() {
        tracing::warn!(
            entity = M::nested_set_config().entity_name(),
            scope = ?scope.values(),
            oddness = counts.oddness,
            duplicates = counts.duplicates,
            wrong_parent = counts.wrong_parent,
            missing_parent = counts.missing_parent,
            "nested set is broken"
        );
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_totals_every_category() {
        let counts = ErrorCounts {
            oddness: 1,
            duplicates: 0,
            wrong_parent: 2,
            missing_parent: 1,
        };
        assert_eq!(counts.total(), 4);
        assert!(counts.is_broken());
        assert!(!ErrorCounts::default().is_broken());
    }

    #[test]
    fn report_serializes_with_category_names() {
        let value = serde_json::to_value(ErrorCounts {
            missing_parent: 1,
            ..ErrorCounts::default()
        })
        .unwrap();
        assert_eq!(value["missing_parent"], 1);
        assert_eq!(value["wrong_parent"], 0);
        assert_eq!(value.as_object().map(|o| o.len()), Some(4));
    }
}
