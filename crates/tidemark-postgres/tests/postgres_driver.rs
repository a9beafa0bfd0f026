//! Runs against a live server named by `TIDEMARK_TEST_POSTGRES_URL`; skipped otherwise.
//! The database is dropped clean by the tests, so point it at a scratch database.

use std::io::Cursor;
use std::time::Duration;

use tidemark_common::Error;
use tidemark_driver::{Context, Driver, NIL_VERSION, testing};

const URL_VAR: &str = "TIDEMARK_TEST_POSTGRES_URL";

const MIGRATION: &[u8] = b"CREATE TABLE IF NOT EXISTS users (id serial PRIMARY KEY, name text);
INSERT INTO users (name) VALUES ('ada');";

fn server_url() -> Option<String> {
    let url = std::env::var(URL_VAR).ok().filter(|u| !u.is_empty());
    if url.is_none() {
        eprintln!("{URL_VAR} not set, skipping");
    }
    url
}

/// Fresh driver on an emptied database.
fn fresh(url: &str) -> tidemark_postgres::PostgresDriver {
    let mut driver = tidemark_postgres::open(url).unwrap();
    driver.drop_all().unwrap();
    Box::new(driver).close().unwrap();
    tidemark_postgres::open(url).unwrap()
}

// One test body so the shared database is never used concurrently.
#[test]
fn live_postgres_driver() {
    let Some(url) = server_url() else {
        return;
    };

    let mut driver = fresh(&url);
    testing::test_all(&mut driver, MIGRATION);
    Box::new(driver).close().unwrap();

    let mut driver = fresh(&url);
    testing::test_dirty_scenario(&mut driver, b"CREATE TABLE orders (id int); SELECT * FROM nowhere;");
    let err = driver
        .run(&mut Cursor::new(b"SELEC 1".to_vec()))
        .unwrap_err();
    assert!(err.to_string().contains("(code 42601)"), "got {err}");
    Box::new(driver).close().unwrap();

    // The server-side lock is visible to a second session.
    let mut first = fresh(&url);
    let mut second = tidemark_postgres::open(&url).unwrap();
    first.lock().unwrap();
    assert!(matches!(second.lock(), Err(Error::LockContended { .. })));
    Box::new(first).close().unwrap();
    second.lock().unwrap();
    second.unlock().unwrap();

    // statement_timeout follows the context deadline.
    second.set_context(Context::with_timeout(Duration::from_millis(200)));
    let err = second
        .run(&mut Cursor::new(b"SELECT pg_sleep(5)".to_vec()))
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "got {err}");
    second.set_context(Context::new());
    assert_eq!(second.version().unwrap(), (NIL_VERSION, false));
    Box::new(second).close().unwrap();

    let separator = if url.contains('?') { '&' } else { '?' };
    let custom = format!("{url}{separator}x-migrations-table=tidemark_custom_versions");
    let mut driver = tidemark_postgres::open(&custom).unwrap();
    assert_eq!(driver.config().migrations_table, "tidemark_custom_versions");
    assert!(!driver.config().schema_name.is_empty());
    driver.set_version(4, false).unwrap();
    assert_eq!(driver.version().unwrap(), (4, false));
    driver.drop_all().unwrap();
    Box::new(driver).close().unwrap();
}
