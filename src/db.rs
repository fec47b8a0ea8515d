use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::migration::Migrator;

/// Connects and brings the schema up to date.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(url.to_owned());
    opts.sqlx_logging(false);
    // every pooled connection to an in-memory SQLite database would see its own empty schema
    if url.starts_with("sqlite::memory:") {
        opts.max_connections(1).min_connections(1);
    }
    let db = Database::connect(opts).await?;
    Migrator::up(&db, None).await?;
    info!(backend = ?db.get_database_backend(), "database ready");
    Ok(db)
}
