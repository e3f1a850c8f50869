// todo_web/src/db.rs
use crate::config::AppConfig;
use anyhow::anyhow;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{error, info};
use rocket::fairing::AdHoc;

// an R2D2 connection pool
pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Applied to every pooled connection when it is opened.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Initialize the database pool.
pub fn init_pool(database_url: &str) -> Result<DbPool, r2d2::PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    r2d2::Pool::builder()
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
}

/// Brings the schema up to date. Safe to call on an already migrated
/// database.
pub fn run_migrations(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
    info!(
        "event=db_migrate module=db status=ok applied={}",
        applied.len()
    );
    Ok(())
}

fn bootstrap(config: &AppConfig) -> anyhow::Result<DbPool> {
    config.validate()?;
    let pool = init_pool(&config.database_url)?;
    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;
    Ok(pool)
}

// Fairing for attaching the pool to Rocket's managed state
pub fn stage() -> AdHoc {
    AdHoc::try_on_ignite("Diesel SQLite Pool", |rocket| async {
        let config = match rocket.state::<AppConfig>() {
            Some(config) => config.clone(),
            None => {
                error!("event=db_open module=db status=error error_code=missing_config");
                return Err(rocket);
            }
        };

        match bootstrap(&config) {
            Ok(pool) => {
                info!(
                    "event=db_open module=db status=ok url={}",
                    config.database_url
                );
                Ok(rocket.manage(pool))
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error url={} error={:#}",
                    config.database_url, err
                );
                Err(rocket)
            }
        }
    })
}
