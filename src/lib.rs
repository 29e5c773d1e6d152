use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

pub mod config;
pub mod error;
pub mod helper;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;

/// Every pooled connection enforces foreign keys so that link rows cascade.
pub fn build_pool(manager: SqliteConnectionManager) -> Result<DbPool, r2d2::Error> {
    let manager = manager.with_init(|conn| conn.execute_batch(setup::db_setup::CONNECTION_PRAGMAS));
    Pool::builder().build(manager)
}

/// A single-connection in-memory database with the schema applied.
pub fn memory_pool() -> Result<DbPool, Box<dyn std::error::Error>> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch(setup::db_setup::CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(1).build(manager)?;
    {
        let mut conn = pool.get()?;
        setup::db_setup::setup_kb_db(&mut conn)?;
    }
    Ok(pool)
}
