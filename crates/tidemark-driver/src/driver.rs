use std::io::Read;

use tidemark_common::{Error, Result};

use crate::capability::Capabilities;
use crate::context::Context;

/// Version reported when no migration has been applied yet.
pub const NIL_VERSION: i64 = -1;

/// The uniform contract every backend implements.
///
/// A driver owns one dedicated connection. It is a passive executor: the
/// orchestration engine decides which migration to apply and calls
/// [`lock`](Driver::lock), [`version`](Driver::version),
/// [`run`](Driver::run) and [`set_version`](Driver::set_version) in that order.
///
/// A single driver is not safe for concurrent use; serialization across
/// drivers is only as strong as [`Capabilities::lock`] says.
pub trait Driver: Send {
    /// Transactional and locking primitives this backend provides.
    fn capabilities(&self) -> Capabilities;

    /// Deadline and cancellation signal applied to every following operation.
    fn set_context(&mut self, ctx: Context);

    /// Take the advisory lock without blocking.
    ///
    /// Fails with [`Error::Locked`] if this driver already holds it and with
    /// [`Error::LockContended`] if another session does.
    fn lock(&mut self) -> Result<()>;

    /// Release the advisory lock. Succeeds if the lock is not held.
    fn unlock(&mut self) -> Result<()>;

    /// Apply one migration payload, read to completion before execution.
    fn run(&mut self, migration: &mut dyn Read) -> Result<()>;

    /// Replace the version record. A negative version leaves no record.
    fn set_version(&mut self, version: i64, dirty: bool) -> Result<()>;

    /// Current `(version, dirty)`; `(NIL_VERSION, false)` when nothing is recorded.
    fn version(&mut self) -> Result<(i64, bool)>;

    /// Delete every table or collection owned by the configured database.
    fn drop_all(&mut self) -> Result<()>;

    /// Release the lock, the session and the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Drain a migration source into memory.
pub fn read_payload(migration: &mut dyn Read) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    migration.read_to_end(&mut payload).map_err(Error::Read)?;
    Ok(payload)
}
