use manimai_db::{create_pool, run_migrations, DbPool};
use tempfile::TempDir;

/// A fresh, migrated database in its own temporary directory.
///
/// The directory must outlive the pool, so both are returned.
pub async fn test_pool() -> (DbPool, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = create_pool(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    (pool, dir)
}
