//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module to create the shared SQLx pool and enforce schema
//! migrations before accepting websocket traffic. The pool backs `PgStore`,
//! the only persistence gateway the room actors talk to.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// Every connection carries a server-side `statement_timeout`, so a stuck
/// statement is aborted by Postgres and an aborted write never commits.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(
    database_url: &str,
    max_connections: u32,
    statement_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    let set_timeout = format!("SET statement_timeout = {}", statement_timeout.as_millis().max(1));
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(statement_timeout)
        .after_connect(move |conn, _meta| {
            let sql = set_timeout.clone();
            Box::pin(async move {
                conn.execute(sql.as_str()).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
