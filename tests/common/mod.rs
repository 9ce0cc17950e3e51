#![allow(dead_code)]

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend, QueryOrder, Statement};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub mod node {
    use nested_set::NestedSetModelDerive as NestedSetModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, NestedSetModel)]
    #[sea_orm(table_name = "nodes")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub lft: i32,
        pub rgt: i32,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod menu_item {
    use nested_set::NestedSetModelDerive as NestedSetModel;
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, NestedSetModel)]
    #[sea_orm(table_name = "menu_items")]
    #[nested_set(scope = "menu_id", soft_delete = "deleted_at", entity_name = "MenuItem")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub menu_id: i32,
        pub parent_id: Option<i32>,
        pub lft: i32,
        pub rgt: i32,
        pub title: String,
        pub deleted_at: Option<i64>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        lft INTEGER NOT NULL,
        rgt INTEGER NOT NULL,
        name TEXT NOT NULL
    )
    "#,
    "CREATE INDEX nodes_lft_idx ON nodes (lft)",
    "CREATE INDEX nodes_parent_idx ON nodes (parent_id)",
    r#"
    CREATE TABLE menu_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        menu_id INTEGER NOT NULL,
        parent_id INTEGER NULL,
        lft INTEGER NOT NULL,
        rgt INTEGER NOT NULL,
        title TEXT NOT NULL,
        deleted_at BIGINT NULL
    )
    "#,
    "CREATE INDEX menu_items_scope_idx ON menu_items (menu_id, lft)",
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory database. A single pooled connection keeps it alive.
pub async fn setup_database() -> Result<DatabaseConnection, DbErr> {
    init_tracing();

    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    create_schema(&db).await?;
    Ok(db)
}

pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    for statement in SCHEMA {
        db.execute(Statement::from_string(DbBackend::Sqlite, *statement))
            .await?;
    }
    Ok(())
}

/// A connection to an SQLite file that fails at once instead of waiting on a lock.
pub async fn connect_file(path: &Path) -> Result<DatabaseConnection, DbErr> {
    init_tracing();

    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false)
        .map_sqlx_sqlite_opts(|opts| opts.busy_timeout(Duration::ZERO));
    Database::connect(options).await
}

pub fn new_node(name: &str) -> node::ActiveModel {
    node::ActiveModel {
        name: Set(name.to_owned()),
        ..Default::default()
    }
}

pub fn new_item(title: &str) -> menu_item::ActiveModel {
    menu_item::ActiveModel {
        title: Set(title.to_owned()),
        ..Default::default()
    }
}

/// `(lft, rgt, parent_id)` of a node, read back from storage.
pub async fn node_state(db: &DatabaseConnection, id: i32) -> Result<(i32, i32, Option<i32>), DbErr> {
    let model = node::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("node {id}")))?;
    Ok((model.lft, model.rgt, model.parent_id))
}

pub async fn all_nodes(db: &DatabaseConnection) -> Result<Vec<node::Model>, DbErr> {
    node::Entity::find()
        .order_by_asc(node::Column::Id)
        .all(db)
        .await
}

pub async fn menu_snapshot(
    db: &DatabaseConnection,
    menu_id: i32,
) -> Result<Vec<menu_item::Model>, DbErr> {
    menu_item::Entity::find()
        .filter(menu_item::Column::MenuId.eq(menu_id))
        .order_by_asc(menu_item::Column::Id)
        .all(db)
        .await
}

pub fn names(models: &[node::Model]) -> Vec<&str> {
    models.iter().map(|model| model.name.as_str()).collect()
}
