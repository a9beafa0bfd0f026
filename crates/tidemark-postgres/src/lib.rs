//! PostgreSQL backend for Tidemark.
//!
//! Serializes migration runs across processes with a session-level
//! `pg_try_advisory_lock` keyed on the current database and schema.

pub mod dialect;
pub mod session;

use postgres::{Client, NoTls};
use tidemark_common::{Error, Result};
use tidemark_config::{Config, ConnectionUrl};
use tidemark_driver::{Driver, Registry, SqlDriver};
use tracing::info;

pub use dialect::PostgresDialect;
pub use session::PostgresSession;

pub type PostgresDriver = SqlDriver<PostgresSession>;

/// Connect with the `x-` parameters stripped and bind a driver to the client.
pub fn open(url: &str) -> Result<PostgresDriver> {
    let url = ConnectionUrl::parse(url)?;
    let config = Config::from_url(&url)?;

    info!(url = %url.redacted(), "connecting to postgres");
    let client = Client::connect(&url.filtered(), NoTls)
        .map_err(|e| Error::connection("failed to connect to postgres", e))?;

    with_instance(client, config)
}

/// Bind a driver to a client the caller already connected.
pub fn with_instance(client: Client, config: Config) -> Result<PostgresDriver> {
    SqlDriver::with_session(PostgresSession::new(client), config)
}

fn open_boxed(url: &str) -> Result<Box<dyn Driver>> {
    Ok(Box::new(open(url)?))
}

/// Register the `postgres` and `postgresql` schemes.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register("postgres", open_boxed)?;
    registry.register("postgresql", open_boxed)
}
