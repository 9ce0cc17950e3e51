mod common;

use common::{all_nodes, new_node, node, node_state, setup_database};
use nested_set::{Bounds, ErrorCounts, NestedSetError, NestedSetRepository, Position, Scope};
use sea_orm::ActiveValue::Set;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};

mod badge {
    use nested_set::NestedSetModelDerive as NestedSetModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, NestedSetModel)]
    #[sea_orm(table_name = "badges")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub lft: i8,
        pub rgt: i8,
        pub label: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

type Repo = NestedSetRepository<node::Model>;

async fn assert_valid(repo: &Repo, db: &DatabaseConnection) -> Result<(), NestedSetError> {
    let counts = repo.count_errors(db, &Scope::global()).await?;
    assert_eq!(counts, ErrorCounts::default());
    Ok(())
}

async fn max_rgt(db: &DatabaseConnection) -> Result<i32, sea_orm::DbErr> {
    Ok(all_nodes(db)
        .await?
        .iter()
        .map(|model| model.rgt)
        .max()
        .unwrap_or(0))
}

async fn child_names(
    repo: &Repo,
    db: &DatabaseConnection,
    parent: i32,
) -> Result<Vec<String>, NestedSetError> {
    Ok(repo
        .children(db, &Scope::global(), &parent)
        .await?
        .into_iter()
        .map(|model| model.name)
        .collect())
}

#[tokio::test]
async fn append_move_and_delete_keep_bounds_consistent() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    assert_eq!((root.lft, root.rgt, root.parent_id), (1, 2, None));

    let a = repo
        .create(&db, &scope, new_node("a"), &Position::AppendTo(root.id))
        .await?;
    assert_eq!((a.lft, a.rgt, a.parent_id), (2, 3, Some(root.id)));
    assert_eq!(node_state(&db, root.id).await?, (1, 4, None));

    let b = repo
        .create(&db, &scope, new_node("b"), &Position::AppendTo(root.id))
        .await?;
    assert_eq!((b.lft, b.rgt), (4, 5));
    assert_eq!(node_state(&db, root.id).await?, (1, 6, None));

    let moved = repo.append_to(&db, &scope, &a.id, &b.id).await?;
    assert!(moved > 0);
    assert_eq!(node_state(&db, b.id).await?, (2, 5, Some(root.id)));
    assert_eq!(node_state(&db, a.id).await?, (3, 4, Some(b.id)));
    assert_eq!(node_state(&db, root.id).await?, (1, 6, None));
    assert_valid(&repo, &db).await?;

    let removed = repo.delete_subtree(&db, &scope, &b.id, true).await?;
    assert_eq!(removed, 2);
    assert_eq!(node_state(&db, root.id).await?, (1, 2, None));
    let remaining = all_nodes(&db).await?;
    assert_eq!(remaining.len(), 1);
    assert_valid(&repo, &db).await?;

    Ok(())
}

#[tokio::test]
async fn every_step_of_a_mutation_sequence_leaves_a_valid_tree(
) -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    let a = repo
        .create(&db, &scope, new_node("a"), &Position::AppendTo(root.id))
        .await?;
    let b = repo
        .create(&db, &scope, new_node("b"), &Position::AppendTo(root.id))
        .await?;
    let c = repo
        .create(&db, &scope, new_node("c"), &Position::AppendTo(root.id))
        .await?;
    let d = repo
        .create(&db, &scope, new_node("d"), &Position::AppendTo(a.id))
        .await?;
    assert_valid(&repo, &db).await?;

    let e = repo
        .create(&db, &scope, new_node("e"), &Position::PrependTo(b.id))
        .await?;
    assert_eq!((e.lft, e.rgt), (7, 8));
    assert_eq!(node_state(&db, root.id).await?, (1, 12, None));
    assert_valid(&repo, &db).await?;

    repo.insert_before(&db, &scope, &c.id, &a.id).await?;
    assert_eq!(node_state(&db, c.id).await?, (2, 3, Some(root.id)));
    assert_eq!(node_state(&db, a.id).await?, (4, 7, Some(root.id)));
    assert_valid(&repo, &db).await?;

    repo.insert_after(&db, &scope, &a.id, &b.id).await?;
    assert_eq!(node_state(&db, b.id).await?, (4, 7, Some(root.id)));
    assert_eq!(node_state(&db, a.id).await?, (8, 11, Some(root.id)));
    assert_eq!(node_state(&db, d.id).await?, (9, 10, Some(a.id)));
    assert_valid(&repo, &db).await?;

    repo.make_root(&db, &scope, &d.id).await?;
    assert_eq!(node_state(&db, d.id).await?, (11, 12, None));
    assert_eq!(node_state(&db, a.id).await?, (8, 9, Some(root.id)));
    assert_eq!(node_state(&db, root.id).await?, (1, 10, None));
    assert_valid(&repo, &db).await?;

    let names: Vec<String> = repo
        .tree(&db, &scope)
        .await?
        .into_iter()
        .map(|model| model.name)
        .collect();
    assert_eq!(names, vec!["root", "c", "b", "e", "a", "d"]);

    repo.delete_subtree(&db, &scope, &b.id, true).await?;
    assert_eq!(node_state(&db, root.id).await?, (1, 6, None));
    assert_eq!(node_state(&db, c.id).await?, (2, 3, Some(root.id)));
    assert_eq!(node_state(&db, a.id).await?, (4, 5, Some(root.id)));
    assert_eq!(node_state(&db, d.id).await?, (7, 8, None));
    assert_valid(&repo, &db).await?;

    Ok(())
}

#[tokio::test]
async fn insert_and_delete_change_the_span_by_the_subtree_height(
) -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    let a = repo
        .create(&db, &scope, new_node("a"), &Position::AppendTo(root.id))
        .await?;
    let before = max_rgt(&db).await?;

    let reserved = repo
        .insert(&db, &scope, &Position::AppendTo(root.id), 4)
        .await?;
    assert_eq!(reserved, Bounds::new(4, 7));
    assert_eq!(max_rgt(&db).await?, before + 4);

    let before = max_rgt(&db).await?;
    repo.delete_subtree(&db, &scope, &a.id, true).await?;
    assert_eq!(max_rgt(&db).await?, before - 2);

    for height in [0, 3, -2] {
        let err = repo
            .insert(&db, &scope, &Position::Root, height)
            .await
            .unwrap_err();
        assert!(matches!(err, NestedSetError::InvalidHeight(h) if h == height));
    }

    Ok(())
}

#[tokio::test]
async fn moving_to_the_current_position_is_a_noop() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    let a = repo
        .create(&db, &scope, new_node("a"), &Position::AppendTo(root.id))
        .await?;
    let b = repo
        .create(&db, &scope, new_node("b"), &Position::AppendTo(root.id))
        .await?;
    let snapshot = all_nodes(&db).await?;

    assert_eq!(repo.insert_before(&db, &scope, &a.id, &a.id).await?, 0);
    assert_eq!(repo.insert_before(&db, &scope, &a.id, &b.id).await?, 0);
    assert_eq!(repo.insert_after(&db, &scope, &b.id, &a.id).await?, 0);
    assert_eq!(repo.append_to(&db, &scope, &b.id, &root.id).await?, 0);
    assert_eq!(repo.prepend_to(&db, &scope, &a.id, &root.id).await?, 0);
    assert_eq!(repo.make_root(&db, &scope, &root.id).await?, 0);

    assert_eq!(all_nodes(&db).await?, snapshot);
    Ok(())
}

#[tokio::test]
async fn moving_into_own_subtree_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    let a = repo
        .create(&db, &scope, new_node("a"), &Position::AppendTo(root.id))
        .await?;
    let d = repo
        .create(&db, &scope, new_node("d"), &Position::AppendTo(a.id))
        .await?;
    let snapshot = all_nodes(&db).await?;

    let attempts = [
        (root.id, Position::AppendTo(d.id)),
        (a.id, Position::AppendTo(a.id)),
        (a.id, Position::PrependTo(a.id)),
        (a.id, Position::PrependTo(d.id)),
        (a.id, Position::Before(d.id)),
        (a.id, Position::After(d.id)),
    ];
    for (key, position) in attempts {
        let err = repo
            .move_node(&db, &scope, &key, &position)
            .await
            .unwrap_err();
        assert!(
            matches!(err, NestedSetError::CyclicMove),
            "{position:?} gave {err:?}"
        );
    }

    assert_eq!(all_nodes(&db).await?, snapshot);
    Ok(())
}

#[tokio::test]
async fn unknown_keys_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;

    let err = repo
        .append_to(&db, &scope, &root.id, &999)
        .await
        .unwrap_err();
    assert!(matches!(err, NestedSetError::NotFound(_)));

    let err = repo
        .create(&db, &scope, new_node("x"), &Position::After(999))
        .await
        .unwrap_err();
    assert!(matches!(err, NestedSetError::NotFound(_)));
    assert_eq!(all_nodes(&db).await?.len(), 1);

    let err = repo.restore(&db, &scope, &root.id).await.unwrap_err();
    assert!(matches!(err, NestedSetError::SoftDeleteUnsupported));

    Ok(())
}

#[tokio::test]
async fn up_and_down_reorder_siblings() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();
    let scope = Scope::global();

    let root = repo
        .create(&db, &scope, new_node("root"), &Position::Root)
        .await?;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let child = repo
            .create(&db, &scope, new_node(name), &Position::AppendTo(root.id))
            .await?;
        ids.push(child.id);
    }
    let (a, c) = (ids[0], ids[2]);

    assert!(repo.down(&db, &scope, &a, 1).await?);
    assert_eq!(child_names(&repo, &db, root.id).await?, vec!["b", "a", "c"]);

    assert!(repo.up(&db, &scope, &c, 2).await?);
    assert_eq!(child_names(&repo, &db, root.id).await?, vec!["c", "b", "a"]);
    assert_eq!(node_state(&db, c).await?, (2, 3, Some(root.id)));

    assert!(!repo.down(&db, &scope, &a, 1).await?);
    assert!(!repo.up(&db, &scope, &c, 1).await?);
    assert!(!repo.up(&db, &scope, &a, 0).await?);
    assert!(!repo.up(&db, &scope, &a, 5).await?);
    assert_valid(&repo, &db).await?;

    Ok(())
}

#[tokio::test]
async fn batch_keeps_tracked_handles_current() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let repo = Repo::new();

    let mut batch = repo.batch(&db, Scope::global()).await?;
    let root = batch.create(new_node("root"), &Position::Root).await?;
    let a = batch
        .create(new_node("a"), &Position::AppendTo(root.id))
        .await?;
    let b = batch
        .create(new_node("b"), &Position::AppendTo(root.id))
        .await?;

    assert_eq!(
        batch.handle(&root.id).map(|handle| handle.bounds()),
        Some(Bounds::new(1, 6))
    );
    assert_eq!(
        batch.handle(&b.id).map(|handle| handle.bounds()),
        Some(Bounds::new(4, 5))
    );

    batch.delete_subtree(&a.id, true).await?;
    let stale = batch.handle(&a.id).expect("tracked");
    assert!(!stale.is_fresh());
    assert_eq!(
        batch.handle(&root.id).map(|handle| handle.bounds()),
        Some(Bounds::new(1, 4))
    );
    assert_eq!(
        batch.handle(&b.id).map(|handle| (handle.bounds(), handle.is_fresh())),
        Some((Bounds::new(2, 3), true))
    );
    assert!(!batch.count_errors().await?.is_broken());
    batch.commit().await?;

    assert_eq!(node_state(&db, root.id).await?, (1, 4, None));
    assert_eq!(node_state(&db, b.id).await?, (2, 3, Some(root.id)));

    let mut batch = repo.batch(&db, Scope::global()).await?;
    batch.track(&root.id).await?;
    batch
        .create(new_node("discarded"), &Position::AppendTo(root.id))
        .await?;
    assert_eq!(
        batch.handle(&root.id).map(|handle| handle.rgt()),
        Some(6)
    );
    batch.rollback().await?;

    assert_eq!(all_nodes(&db).await?.len(), 2);
    assert_eq!(node_state(&db, root.id).await?, (1, 4, None));
    Ok(())
}

#[tokio::test]
async fn bounds_too_large_for_the_columns_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "CREATE TABLE badges (id INTEGER PRIMARY KEY AUTOINCREMENT, parent_id INTEGER NULL, \
         lft TINYINT NOT NULL, rgt TINYINT NOT NULL, label TEXT NOT NULL)",
    ))
    .await?;
    let repo = NestedSetRepository::<badge::Model>::new();
    let scope = Scope::global();
    let new_badge = |label: String| badge::ActiveModel {
        label: Set(label),
        ..Default::default()
    };

    for i in 0..63 {
        repo.create(&db, &scope, new_badge(format!("badge {i}")), &Position::Root)
            .await?;
    }
    let last = repo.roots(&db, &scope).await?.pop().map(|model| (model.lft, model.rgt));
    assert_eq!(last, Some((125, 126)));

    let err = repo
        .create(&db, &scope, new_badge("overflow".to_owned()), &Position::Root)
        .await
        .unwrap_err();
    assert!(matches!(err, NestedSetError::Invariant(_)));
    assert_eq!(repo.tree(&db, &scope).await?.len(), 63);
    assert!(!repo.is_broken(&db, &scope).await?);
    Ok(())
}
