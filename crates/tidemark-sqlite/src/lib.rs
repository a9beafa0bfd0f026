//! SQLite backend for Tidemark.
//!
//! Accepts `sqlite://<path>`, `sqlite3://<path>`, `sqlite://:memory:` and
//! `sqlite::memory:`. Every migration and version write runs in a transaction.

pub mod dialect;
pub mod session;

use rusqlite::Connection;
use tidemark_common::{Error, Result};
use tidemark_config::{Config, ConnectionUrl};
use tidemark_driver::{Driver, Registry, SqlDriver};
use tracing::info;

pub use dialect::SqliteDialect;
pub use session::SqliteSession;

pub type SqliteDriver = SqlDriver<SqliteSession>;

const MEMORY_LOCATION: &str = ":memory:";

/// Open a dedicated connection from a URL and bind a driver to it.
///
/// Query parameters other than the `x-` ones are handed to SQLite as URI
/// parameters, e.g. `sqlite://app.db?mode=ro` or `sqlite::memory:?cache=shared`.
pub fn open(url: &str) -> Result<SqliteDriver> {
    let url = ConnectionUrl::parse(url)?;
    let config = Config::from_url(&url)?;

    let filtered = url.filtered();
    let query = filtered.split_once('?').map(|(_, query)| query);
    let location = url.location();
    if location.is_empty() {
        return Err(Error::Url(format!("no database path in {}", url.redacted())));
    }

    let conn = match query {
        None if location == MEMORY_LOCATION => {
            info!("opening in-memory sqlite database");
            Connection::open_in_memory()
                .map_err(|e| Error::connection("failed to open in-memory database", e))?
        }
        None => {
            info!("opening sqlite database at {location}");
            Connection::open(location)
                .map_err(|e| Error::connection("failed to open database", e))?
        }
        Some(query) => {
            info!("opening sqlite database at {location} with {query}");
            Connection::open(format!("file:{location}?{query}"))
                .map_err(|e| Error::connection("failed to open database", e))?
        }
    };

    let on_disk = conn.path().is_some_and(|path| !path.is_empty());
    let read_only = url.param("mode") == Some("ro");
    if on_disk && !read_only {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::connection("failed to set pragmas", e))?;
    }

    with_instance(conn, config)
}

/// Bind a driver to a connection the caller already opened.
pub fn with_instance(conn: Connection, config: Config) -> Result<SqliteDriver> {
    SqlDriver::with_session(SqliteSession::new(conn), config)
}

pub fn in_memory() -> Result<SqliteDriver> {
    open("sqlite::memory:")
}

fn open_boxed(url: &str) -> Result<Box<dyn Driver>> {
    Ok(Box::new(open(url)?))
}

/// Register the `sqlite` and `sqlite3` schemes.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register("sqlite", open_boxed)?;
    registry.register("sqlite3", open_boxed)
}
