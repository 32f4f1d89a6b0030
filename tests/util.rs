use rathdown::Store;
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory document store for tests. One connection, so every query sees
/// the same database.
pub async fn memory_store() -> Store {
    rathdown::logging::init();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory pool");
    Store::open(pool).await.expect("create documents table")
}
