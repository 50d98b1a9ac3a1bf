use log::{debug, error, info};
use sqlx::SqlitePool;

use crate::errors::{DbError, DbResult};
use crate::globals;

// Embed all migration SQL files at compile time
const MIGRATION_MIRROR_DOCUMENTS: &str = include_str!("../migrations/20250601000000_mirror_documents.sql");
const MIGRATION_IDENTITY_PROMOTIONS: &str = include_str!("../migrations/20250601000001_identity_promotions.sql");

// List of migrations with their names and SQL content
const MIGRATIONS: &[(&str, &str)] = &[
    ("20250601000000_mirror_documents.sql", MIGRATION_MIRROR_DOCUMENTS),
    ("20250601000001_identity_promotions.sql", MIGRATION_IDENTITY_PROMOTIONS),
];

/// Run migrations against the global pool
pub async fn initialize_database() -> DbResult<()> {
    let pool = globals::get_db_pool()
        .map_err(|e| DbError::ConnectionPool(format!("Failed to get database pool: {}", e)))?;
    run_migrations(&pool).await
}

/// Apply every migration not yet recorded in the `migrations` table
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Starting database migration process");

    create_migrations_table(pool).await?;

    let last_migration = get_last_migration(pool).await?;
    match &last_migration {
        Some(name) => debug!("Last applied migration: {}", name),
        None => debug!("No migrations applied yet"),
    }

    apply_pending_migrations(pool, last_migration).await?;
    info!("Database migration process completed");
    Ok(())
}

/// Create migrations table if it doesn't exist
async fn create_migrations_table(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| DbError::Migration(format!("Failed to create migrations table: {}", e)))?;

    Ok(())
}

/// Get the last applied migration
async fn get_last_migration(pool: &SqlitePool) -> DbResult<Option<String>> {
    let result = sqlx::query_scalar::<_, String>("SELECT name FROM migrations ORDER BY id DESC LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| DbError::Migration(format!("Failed to get last migration: {}", e)))?;

    Ok(result)
}

/// Apply pending migrations in one transaction
async fn apply_pending_migrations(pool: &SqlitePool, last_migration: Option<String>) -> DbResult<()> {
    let pending_migrations = get_pending_migrations(last_migration.as_deref());
    if pending_migrations.is_empty() {
        debug!("No pending migrations to apply");
        return Ok(());
    }

    info!("Applying {} pending migrations", pending_migrations.len());
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to begin transaction: {}", e)))?;

    for (migration_name, migration_sql) in pending_migrations {
        debug!("Applying migration: {}", migration_name);

        sqlx::raw_sql(migration_sql).execute(&mut *tx).await.map_err(|e| {
            error!("Failed to apply migration {}: {}", migration_name, e);
            DbError::Migration(format!("Failed to apply migration {}: {}", migration_name, e))
        })?;

        sqlx::query("INSERT INTO migrations (name, applied_at) VALUES (?, ?)")
            .bind(migration_name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("Failed to record migration {}: {}", migration_name, e)))?;
    }

    tx.commit()
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to commit migrations: {}", e)))?;

    info!("All migrations applied and committed");
    Ok(())
}

/// Migrations listed after the last applied one; all of them on a fresh database
fn get_pending_migrations(last_migration: Option<&str>) -> Vec<(&'static str, &'static str)> {
    let mut pending = Vec::new();
    let mut should_include = last_migration.is_none();

    for &(migration_name, migration_sql) in MIGRATIONS {
        if should_include {
            pending.push((migration_name, migration_sql));
        } else if Some(migration_name) == last_migration {
            should_include = true;
        }
    }

    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    #[test]
    fn test_pending_migrations_follow_last_applied() {
        assert_eq!(get_pending_migrations(None).len(), MIGRATIONS.len());
        let after_first = get_pending_migrations(Some(MIGRATIONS[0].0));
        assert_eq!(after_first.len(), MIGRATIONS.len() - 1);
        assert_eq!(after_first[0].0, MIGRATIONS[1].0);
        assert!(get_pending_migrations(Some(MIGRATIONS[MIGRATIONS.len() - 1].0)).is_empty());
    }

    #[tokio::test]
    async fn test_migrations_apply_once_per_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("road_sync.db"))
            .create_if_missing(true);

        for _ in 0..2 {
            let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options.clone()).await.unwrap();
            run_migrations(&pool).await.unwrap();

            let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations")
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(applied, MIGRATIONS.len() as i64);

            let tables: Vec<String> = sqlx::query_scalar(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('mirror_documents', 'identity_promotions') ORDER BY name",
            )
            .fetch_all(&pool)
            .await
            .unwrap();
            assert_eq!(tables, vec!["identity_promotions".to_string(), "mirror_documents".to_string()]);
            pool.close().await;
        }
    }
}
