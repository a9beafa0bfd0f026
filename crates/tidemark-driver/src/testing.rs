//! Conformance checks every backend runs against a live driver.
//!
//! Each check panics on the first violated expectation and leaves the driver
//! unlocked, so backends can call them back to back on one instance.

use std::io::Cursor;

use tidemark_common::Error;

use crate::driver::{Driver, NIL_VERSION};

/// Run every check except [`test_dirty_scenario`], which needs a failing payload.
pub fn test_all(driver: &mut dyn Driver, migration: &[u8]) {
    test_nil_version(driver);
    test_lock_and_unlock(driver);
    test_run(driver, migration);
    test_set_version(driver);
    test_drop(driver);
}

/// A fresh store reports no version.
pub fn test_nil_version(driver: &mut dyn Driver) {
    let (version, dirty) = driver.version().expect("version on a fresh store");
    assert_eq!(version, NIL_VERSION, "fresh store must report the nil version");
    assert!(!dirty, "fresh store must not be dirty");
}

pub fn test_lock_and_unlock(driver: &mut dyn Driver) {
    driver.lock().expect("first lock");
    assert!(
        matches!(driver.lock(), Err(Error::Locked)),
        "second lock on the same driver must fail"
    );
    driver.unlock().expect("unlock");
    driver.unlock().expect("unlock when not held");
    driver.lock().expect("lock after unlock");
    driver.unlock().expect("final unlock");
}

pub fn test_run(driver: &mut dyn Driver, migration: &[u8]) {
    driver
        .run(&mut Cursor::new(migration.to_vec()))
        .expect("run a valid migration");
}

pub fn test_set_version(driver: &mut dyn Driver) {
    for (version, dirty) in [(1, true), (2, false), (0, false), (2, true)] {
        driver
            .set_version(version, dirty)
            .unwrap_or_else(|e| panic!("set_version({version}, {dirty}): {e}"));
        assert_eq!(driver.version().expect("version"), (version, dirty));
    }

    driver.set_version(NIL_VERSION, false).expect("clear version");
    assert_eq!(driver.version().expect("version"), (NIL_VERSION, false));
}

/// After dropping everything the store reads as never migrated.
pub fn test_drop(driver: &mut dyn Driver) {
    driver.set_version(7, false).expect("set_version before drop");
    driver.drop_all().expect("drop_all");
    assert_eq!(driver.version().expect("version after drop"), (NIL_VERSION, false));
}

/// The sequence the orchestration engine runs around a failing migration.
pub fn test_dirty_scenario(driver: &mut dyn Driver, broken: &[u8]) {
    driver.lock().expect("lock");
    driver.set_version(3, true).expect("mark dirty");

    let err = driver
        .run(&mut Cursor::new(broken.to_vec()))
        .expect_err("broken migration must fail");
    assert_eq!(err.payload(), Some(broken), "failure must carry the payload");

    assert_eq!(driver.version().expect("version"), (3, true));
    driver.unlock().expect("unlock");
}
