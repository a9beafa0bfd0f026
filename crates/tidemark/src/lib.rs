//! Schema migration drivers behind one contract.
//!
//! ```no_run
//! let registry = tidemark::default_registry()?;
//! let mut driver = registry.open("sqlite://./app.db")?;
//! driver.lock()?;
//! let (version, dirty) = driver.version()?;
//! driver.unlock()?;
//! driver.close()?;
//! # let _ = (version, dirty);
//! # Ok::<(), tidemark::Error>(())
//! ```

use tracing::debug;

pub use tidemark_common::{Error, Result};
pub use tidemark_config::{Config, ConfigLoader, ConnectionUrl, TargetConfig};
pub use tidemark_driver::{
    Capabilities, Context, Driver, LockSupport, NIL_VERSION, Registry, TransactionSupport,
};
pub use {tidemark_mongo as mongo, tidemark_postgres as postgres, tidemark_sqlite as sqlite};

use tidemark_config::{MIGRATIONS_TABLE_PARAM, TRANSACTION_MODE_PARAM};

/// A registry with every bundled backend: `sqlite`, `sqlite3`, `postgres`,
/// `postgresql` and `mongodb`, in that order.
pub fn default_registry() -> Result<Registry> {
    let mut registry = Registry::new();
    tidemark_sqlite::register(&mut registry)?;
    tidemark_postgres::register(&mut registry)?;
    tidemark_mongo::register(&mut registry)?;
    debug!(schemes = ?registry.schemes().collect::<Vec<_>>(), "default registry built");
    Ok(registry)
}

/// Open the driver for a target loaded from a config file.
///
/// Values from the file override the URL's `x-` parameters.
pub fn open_target(registry: &Registry, target: &TargetConfig) -> Result<Box<dyn Driver>> {
    let (url, config) = target.resolve()?;
    let url = url.with_params(&[
        (MIGRATIONS_TABLE_PARAM, config.migrations_table.as_str()),
        (
            TRANSACTION_MODE_PARAM,
            if config.transaction_mode { "true" } else { "false" },
        ),
    ]);
    registry.open(&url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_order() {
        let registry = default_registry().unwrap();
        assert_eq!(
            registry.schemes().collect::<Vec<_>>(),
            ["sqlite", "sqlite3", "postgres", "postgresql", "mongodb"]
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let registry = default_registry().unwrap();
        let err = registry.open("cassandra://localhost/ks").err().unwrap();
        assert!(matches!(err, Error::UnknownDriver(ref scheme) if scheme == "cassandra"));
    }

    #[test]
    fn opens_sqlite_through_registry() {
        let registry = default_registry().unwrap();
        let mut driver = registry.open("sqlite::memory:").unwrap();
        assert_eq!(driver.capabilities().lock, LockSupport::Instance);
        assert_eq!(driver.version().unwrap(), (NIL_VERSION, false));
        driver.close().unwrap();
    }

    #[test]
    fn file_target_overrides_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yaml");
        let db = dir.path().join("app.db");
        std::fs::write(
            &path,
            format!(
                "url: \"sqlite://{}?x-migrations-table=from_url\"\nmigrations_table: from_file\n",
                db.display()
            ),
        )
        .unwrap();

        let target = ConfigLoader::load(&path).unwrap();
        let mut driver = open_target(&default_registry().unwrap(), &target).unwrap();
        driver.set_version(3, false).unwrap();
        driver.close().unwrap();

        assert_eq!(row_count(&db, "from_file"), 1);
    }

    fn row_count(db: &std::path::Path, table: &str) -> i64 {
        let driver = sqlite::open(&format!("sqlite://{}", db.display())).unwrap();
        driver
            .session()
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }
}
