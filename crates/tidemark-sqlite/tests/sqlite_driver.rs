use std::io::Cursor;
use std::time::Duration;

use tidemark_common::Error;
use tidemark_config::Config;
use tidemark_driver::{Context, Driver, NIL_VERSION, Registry, testing};

const MIGRATION: &[u8] = b"CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
INSERT INTO users (name) VALUES ('ada');";

const BROKEN: &[u8] = b"CREATE TABLE orders (id INTEGER); INSERT INTO nowhere VALUES (1);";

/// Recursive CTE that never terminates on its own.
const ENDLESS: &[u8] =
    b"WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c;";

fn count(driver: &tidemark_sqlite::SqliteDriver, sql: &str) -> i64 {
    driver
        .session()
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .unwrap()
}

#[test]
fn in_memory_driver_conforms() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    testing::test_all(&mut driver, MIGRATION);
}

#[test]
fn file_driver_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("app.db").display());
    let mut driver = tidemark_sqlite::open(&url).unwrap();
    testing::test_all(&mut driver, MIGRATION);
    Box::new(driver).close().unwrap();
}

#[test]
fn failed_migration_leaves_version_dirty() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    testing::test_dirty_scenario(&mut driver, BROKEN);
}

#[test]
fn failed_migration_is_rolled_back() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    let err = driver.run(&mut Cursor::new(BROKEN.to_vec())).unwrap_err();
    assert!(err.to_string().contains("no such table: nowhere"));
    assert_eq!(
        count(&driver, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'orders'"),
        0
    );
}

#[test]
fn set_version_keeps_a_single_row() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    driver.set_version(1, false).unwrap();
    driver.set_version(2, true).unwrap();
    assert_eq!(count(&driver, "SELECT COUNT(*) FROM schema_migrations"), 1);
    assert_eq!(driver.version().unwrap(), (2, true));
}

#[test]
fn custom_table_from_url() {
    let mut driver = tidemark_sqlite::open("sqlite::memory:?x-migrations-table=versions").unwrap();
    assert_eq!(driver.config().migrations_table, "versions");
    assert_eq!(driver.config().schema_name, "main");
    driver.set_version(5, false).unwrap();
    assert_eq!(count(&driver, "SELECT version FROM versions"), 5);
}

#[test]
fn with_instance_binds_existing_connection() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE legacy (id INTEGER)").unwrap();
    let mut driver = tidemark_sqlite::with_instance(conn, Config::default()).unwrap();
    assert_eq!(driver.version().unwrap(), (NIL_VERSION, false));

    driver.drop_all().unwrap();
    assert_eq!(
        count(&driver, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'"),
        0
    );
}

#[test]
fn two_drivers_on_one_file_contend() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("shared.db").display());
    let mut first = tidemark_sqlite::open(&url).unwrap();
    let mut second = tidemark_sqlite::open(&url).unwrap();

    first.lock().unwrap();
    assert!(matches!(second.lock(), Err(Error::LockContended { .. })));

    first.unlock().unwrap();
    second.lock().unwrap();
    second.unlock().unwrap();
}

#[test]
fn closing_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("closed.db").display());
    let mut first = tidemark_sqlite::open(&url).unwrap();
    let mut second = tidemark_sqlite::open(&url).unwrap();

    first.lock().unwrap();
    Box::new(first).close().unwrap();
    second.lock().unwrap();
}

#[test]
fn deadline_interrupts_long_migration() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    driver.set_context(Context::with_timeout(Duration::from_millis(100)));

    let err = driver.run(&mut Cursor::new(ENDLESS.to_vec())).unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "got {err}");

    driver.set_context(Context::new());
    assert_eq!(driver.version().unwrap(), (NIL_VERSION, false));
}

#[test]
fn cancellation_interrupts_long_migration() {
    let mut driver = tidemark_sqlite::in_memory().unwrap();
    let ctx = Context::new();
    let canceller = ctx.clone();
    driver.set_context(ctx);

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });
    let err = driver.run(&mut Cursor::new(ENDLESS.to_vec())).unwrap_err();
    handle.join().unwrap();
    assert!(matches!(err, Error::Cancelled), "got {err}");
}

#[test]
fn registry_opens_both_schemes() {
    let mut registry = Registry::new();
    tidemark_sqlite::register(&mut registry).unwrap();
    assert_eq!(registry.schemes().collect::<Vec<_>>(), ["sqlite", "sqlite3"]);

    let mut driver = registry.open("sqlite3://:memory:").unwrap();
    assert_eq!(driver.version().unwrap(), (NIL_VERSION, false));
    driver.close().unwrap();
}

#[test]
fn missing_path_is_rejected() {
    assert!(matches!(tidemark_sqlite::open("sqlite://"), Err(Error::Url(_))));
}

#[test]
fn deferred_constraint_failure_keeps_payload() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON; CREATE TABLE p (id INTEGER PRIMARY KEY);")
        .unwrap();
    let mut driver = tidemark_sqlite::with_instance(conn, Config::default()).unwrap();

    let migration = b"CREATE TABLE c (p_id INTEGER REFERENCES p (id) DEFERRABLE INITIALLY DEFERRED);
INSERT INTO c VALUES (7);";
    let err = driver.run(&mut Cursor::new(migration.to_vec())).unwrap_err();
    assert_eq!(err.payload(), Some(&migration[..]));
    assert!(err.to_string().contains("FOREIGN KEY constraint failed"), "got {err}");
    assert_eq!(
        count(&driver, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'c'"),
        0
    );
}

#[test]
fn drop_ignores_foreign_key_order() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE p (id INTEGER PRIMARY KEY);
         CREATE TABLE c (p_id INTEGER REFERENCES p (id));
         INSERT INTO p VALUES (1);
         INSERT INTO c VALUES (1);",
    )
    .unwrap();
    let mut driver = tidemark_sqlite::with_instance(conn, Config::default()).unwrap();

    driver.drop_all().unwrap();
    assert_eq!(
        count(&driver, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'"),
        0
    );
    assert_eq!(count(&driver, "PRAGMA foreign_keys"), 1);
}

#[test]
fn uri_params_reach_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let absent = dir.path().join("absent.db");
    let url = format!("sqlite://{}?mode=ro", absent.display());
    assert!(matches!(
        tidemark_sqlite::open(&url),
        Err(Error::Connection { .. })
    ));
    assert!(!absent.exists());

    let url = format!(
        "sqlite://{}?cache=private&x-migrations-table=versions",
        dir.path().join("app.db").display()
    );
    let mut driver = tidemark_sqlite::open(&url).unwrap();
    assert_eq!(driver.config().migrations_table, "versions");
    driver.set_version(3, false).unwrap();
    assert_eq!(driver.version().unwrap(), (3, false));
}
