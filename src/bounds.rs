//! Interval arithmetic shared by every mutating operation.
//!
//! A mutation never rewrites rows one at a time. It is described as a [`Patch`]
//! which is rendered once into a `CASE WHEN` column expression and a row filter,
//! and applied to both bound columns in a single `UPDATE`. The same patch can be
//! replayed on in-memory [`Bounds`] so cached copies stay in sync with storage.

use sea_orm::sea_query::{Condition, Expr, IntoColumnRef, SimpleExpr};
use serde::{Deserialize, Serialize};

use crate::error::{NestedSetError, Result};

/// The `lft`/`rgt` pair of a node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub lft: i64,
    pub rgt: i64,
}

impl Bounds {
    pub fn new(lft: i64, rgt: i64) -> Self {
        Self { lft, rgt }
    }

    /// Bounds of a fresh leaf starting at `cut`.
    pub fn leaf(cut: i64) -> Self {
        Self::new(cut, cut + 1)
    }

    /// Bounds of a subtree of `height` starting at `cut`.
    pub fn spanning(cut: i64, height: i64) -> Self {
        Self::new(cut, cut + height - 1)
    }

    /// `rgt - lft + 1`; even for every valid node.
    pub fn height(&self) -> i64 {
        self.rgt - self.lft + 1
    }

    pub fn is_leaf(&self) -> bool {
        self.rgt == self.lft + 1
    }

    /// Whether `other` is a strict descendant of `self`.
    pub fn contains(&self, other: &Bounds) -> bool {
        other.lft > self.lft && other.lft < self.rgt
    }

    /// Whether inserting at `position` would land inside this subtree.
    pub fn encloses_position(&self, position: i64) -> bool {
        self.lft < position && position <= self.rgt
    }

    /// Number of descendants. Only defined for even heights.
    pub fn descendant_count(&self) -> Result<i64> {
        let height = self.height();
        if height < 2 || height % 2 != 0 {
            return Err(NestedSetError::InvalidHeight(height));
        }
        Ok(height / 2 - 1)
    }
}

/// Open (`height > 0`) or close (`height < 0`) a gap starting at `cut`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GapShift {
    pub cut: i64,
    pub height: i64,
}

impl GapShift {
    pub fn new(cut: i64, height: i64) -> Self {
        Self { cut, height }
    }

    /// The shift that reclaims the space of a removed subtree.
    pub fn closing(bounds: Bounds) -> Self {
        Self::new(bounds.rgt + 1, -bounds.height())
    }

    pub fn apply(&self, value: i64) -> i64 {
        if value >= self.cut {
            value + self.height
        } else {
            value
        }
    }
}

/// Relocation of the subtree `[lft, rgt]` so that it starts at a new position.
///
/// Values inside the subtree travel by `distance`; values in the window
/// `[from, to]` outside the subtree shift by `height` to fill the vacated
/// space. Everything else is untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangeMove {
    pub lft: i64,
    pub rgt: i64,
    pub from: i64,
    pub to: i64,
    pub height: i64,
    pub distance: i64,
}

impl RangeMove {
    /// Plan moving `bounds` so the node is placed before the current `position`.
    ///
    /// Returns `Ok(None)` when the node already sits there.
    pub fn plan(bounds: Bounds, position: i64) -> Result<Option<Self>> {
        let Bounds { lft, rgt } = bounds;

        if bounds.encloses_position(position) {
            return Err(NestedSetError::CyclicMove);
        }

        let from = lft.min(position);
        let to = rgt.max(position - 1);
        let mut height = rgt - lft + 1;
        let mut distance = to - from + 1 - height;

        if distance == 0 {
            return Ok(None);
        }

        if position > lft {
            height = -height;
        } else {
            distance = -distance;
        }

        Ok(Some(Self {
            lft,
            rgt,
            from,
            to,
            height,
            distance,
        }))
    }

    pub fn apply(&self, value: i64) -> i64 {
        if (self.lft..=self.rgt).contains(&value) {
            value + self.distance
        } else if (self.from..=self.to).contains(&value) {
            value + self.height
        } else {
            value
        }
    }

    /// Where the moved node ends up.
    pub fn destination(&self) -> Bounds {
        Bounds::new(self.lft + self.distance, self.rgt + self.distance)
    }
}

/// A set-based bounds update.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Patch {
    Gap(GapShift),
    Move(RangeMove),
}

impl Patch {
    pub fn apply(&self, value: i64) -> i64 {
        match self {
            Patch::Gap(gap) => gap.apply(value),
            Patch::Move(mv) => mv.apply(value),
        }
    }

    pub fn apply_bounds(&self, bounds: Bounds) -> Bounds {
        Bounds::new(self.apply(bounds.lft), self.apply(bounds.rgt))
    }

    /// Rows the patch can change; everything else is skipped by the `UPDATE`.
    pub fn row_filter<L, R>(&self, lft: L, rgt: R) -> Condition
    where
        L: IntoColumnRef + Clone,
        R: IntoColumnRef + Clone,
    {
        match self {
            Patch::Gap(gap) => Condition::any()
                .add(Expr::col(lft).gte(gap.cut))
                .add(Expr::col(rgt).gte(gap.cut)),
            Patch::Move(mv) => Condition::any()
                .add(Expr::col(lft).between(mv.from, mv.to))
                .add(Expr::col(rgt).between(mv.from, mv.to)),
        }
    }

    /// The `CASE` expression assigned to one bound column.
    pub fn column_expr<C>(&self, col: C) -> SimpleExpr
    where
        C: IntoColumnRef + Clone,
    {
        match self {
            Patch::Gap(gap) => Expr::case(
                Expr::col(col.clone()).gte(gap.cut),
                Expr::col(col.clone()).add(gap.height),
            )
            .finally(Expr::col(col))
            .into(),
            Patch::Move(mv) => Expr::case(
                Expr::col(col.clone()).between(mv.lft, mv.rgt),
                Expr::col(col.clone()).add(mv.distance),
            )
            .case(
                Expr::col(col.clone()).between(mv.from, mv.to),
                Expr::col(col.clone()).add(mv.height),
            )
            .finally(Expr::col(col))
            .into(),
        }
    }
}

impl From<GapShift> for Patch {
    fn from(gap: GapShift) -> Self {
        Patch::Gap(gap)
    }
}

impl From<RangeMove> for Patch {
    fn from(mv: RangeMove) -> Self {
        Patch::Move(mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sea_orm::sea_query::{Alias, PostgresQueryBuilder, Query};

    fn sample_tree() -> Vec<Bounds> {
        // 1 [1,10] -> 2 [2,5] -> 3 [3,4]; 1 -> 4 [6,9] -> 5 [7,8]
        vec![
            Bounds::new(1, 10),
            Bounds::new(2, 5),
            Bounds::new(3, 4),
            Bounds::new(6, 9),
            Bounds::new(7, 8),
        ]
    }

    fn patched(tree: &[Bounds], patch: Patch) -> Vec<Bounds> {
        tree.iter().map(|b| patch.apply_bounds(*b)).collect()
    }

    #[test]
    fn gap_opens_room_for_a_leaf() {
        let tree = vec![Bounds::new(1, 2)];
        let tree = patched(&tree, GapShift::new(2, 2).into());
        assert_eq!(tree, vec![Bounds::new(1, 4)]);
    }

    #[test]
    fn closing_gap_restores_span() {
        let tree = sample_tree();
        let removed = tree[3];
        let rest: Vec<Bounds> = tree
            .iter()
            .copied()
            .filter(|b| !(b.lft >= removed.lft && b.lft <= removed.rgt))
            .collect();
        let rest = patched(&rest, GapShift::closing(removed).into());
        assert_eq!(
            rest,
            vec![Bounds::new(1, 6), Bounds::new(2, 5), Bounds::new(3, 4)]
        );
    }

    #[test]
    fn moving_forward_places_subtree_before_position() {
        // move [2,5] to be the last child of [6,9] (position = its rgt = 9)
        let mv = RangeMove::plan(Bounds::new(2, 5), 9)
            .expect("valid move")
            .expect("not a no-op");
        assert_eq!(mv.from, 2);
        assert_eq!(mv.to, 8);
        assert_eq!(mv.height, -4);
        assert_eq!(mv.distance, 3);

        let tree = patched(&sample_tree(), mv.into());
        assert_eq!(
            tree,
            vec![
                Bounds::new(1, 10),
                Bounds::new(5, 8),
                Bounds::new(6, 7),
                Bounds::new(2, 9),
                Bounds::new(3, 4),
            ]
        );
        assert_eq!(mv.destination(), Bounds::new(5, 8));
    }

    #[test]
    fn moving_backward_places_subtree_before_position() {
        // move [6,9] to be the first child of root (position = lft + 1 = 2)
        let mv = RangeMove::plan(Bounds::new(6, 9), 2)
            .expect("valid move")
            .expect("not a no-op");
        assert_eq!(mv.height, 4);
        assert_eq!(mv.distance, -4);

        let tree = patched(&sample_tree(), mv.into());
        assert_eq!(
            tree,
            vec![
                Bounds::new(1, 10),
                Bounds::new(6, 9),
                Bounds::new(7, 8),
                Bounds::new(2, 5),
                Bounds::new(3, 4),
            ]
        );
    }

    #[test]
    fn move_to_current_position_is_noop() {
        assert_eq!(RangeMove::plan(Bounds::new(2, 5), 2).unwrap(), None);
        assert_eq!(RangeMove::plan(Bounds::new(2, 5), 6).unwrap(), None);
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        for position in 3..=5 {
            let err = RangeMove::plan(Bounds::new(2, 5), position).unwrap_err();
            assert!(matches!(err, NestedSetError::CyclicMove));
        }
    }

    #[test]
    fn descendant_count_requires_even_height() {
        assert_eq!(Bounds::new(1, 10).descendant_count().unwrap(), 4);
        assert_eq!(Bounds::leaf(3).descendant_count().unwrap(), 0);
        assert!(matches!(
            Bounds::new(1, 3).descendant_count(),
            Err(NestedSetError::InvalidHeight(3))
        ));
    }

    #[test]
    fn renders_single_update_with_case_expressions() {
        let lft = Alias::new("lft");
        let rgt = Alias::new("rgt");
        let patch = Patch::from(GapShift::new(4, -2));

        let sql = Query::update()
            .table(Alias::new("nodes"))
            .value(lft.clone(), patch.column_expr(lft.clone()))
            .value(rgt.clone(), patch.column_expr(rgt.clone()))
            .cond_where(patch.row_filter(lft, rgt))
            .to_string(PostgresQueryBuilder);

        assert!(sql.starts_with(r#"UPDATE "nodes" SET "lft" = (CASE WHEN ("#));
        assert!(sql.contains(r#"ELSE "lft" END), "rgt" = (CASE WHEN ("#));
        assert!(sql.contains(r#"ELSE "rgt" END) WHERE "#));
    }
}
