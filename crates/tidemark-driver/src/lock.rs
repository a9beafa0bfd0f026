use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use ring::digest::{Context as DigestContext, SHA256};
use tidemark_common::{Error, Result};
use tracing::debug;

use crate::capability::LockSupport;

/// Lock ids held by `LockSupport::Process` drivers in this process.
static PROCESS_LOCKS: LazyLock<Mutex<HashSet<i64>>> = LazyLock::new(Default::default);

fn process_locks() -> MutexGuard<'static, HashSet<i64>> {
    // The set holds plain ids and is never left half-updated.
    PROCESS_LOCKS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Derive a stable lock id from a database identity.
///
/// Each name is separated by a NUL byte before hashing, so `("ab", "c")` and
/// `("a", "bc")` map to different ids.
pub fn advisory_lock_id(database: &str, additional: &[&str]) -> i64 {
    let mut digest = DigestContext::new(&SHA256);
    digest.update(database.as_bytes());
    for name in additional {
        digest.update(&[0]);
        digest.update(name.as_bytes());
    }
    let digest = digest.finish();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_ref()[..8]);
    i64::from_be_bytes(bytes)
}

/// Non-blocking, non-reentrant advisory lock owned by one driver.
///
/// Native locks are taken through the callbacks handed to
/// [`acquire`](LockState::acquire) and [`release`](LockState::release); the
/// other kinds are handled here.
#[derive(Debug)]
pub struct LockState {
    id: i64,
    support: LockSupport,
    held: bool,
}

impl LockState {
    pub fn new(id: i64, support: LockSupport) -> Self {
        Self {
            id,
            support,
            held: false,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn support(&self) -> LockSupport {
        self.support
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn acquire<F>(&mut self, try_native: F) -> Result<()>
    where
        F: FnOnce(i64) -> Result<bool>,
    {
        if self.held {
            return Err(Error::Locked);
        }

        let acquired = match self.support {
            LockSupport::Native => try_native(self.id)?,
            LockSupport::Process => process_locks().insert(self.id),
            LockSupport::Instance => true,
        };
        if !acquired {
            return Err(Error::LockContended {
                resource: self.id.to_string(),
            });
        }

        self.held = true;
        debug!(lock_id = self.id, support = ?self.support, "advisory lock acquired");
        Ok(())
    }

    pub fn release<F>(&mut self, native_unlock: F) -> Result<()>
    where
        F: FnOnce(i64) -> Result<()>,
    {
        if !self.held {
            return Ok(());
        }

        match self.support {
            LockSupport::Native => native_unlock(self.id)?,
            LockSupport::Process => {
                process_locks().remove(&self.id);
            }
            LockSupport::Instance => {}
        }

        self.held = false;
        debug!(lock_id = self.id, "advisory lock released");
        Ok(())
    }
}

impl Drop for LockState {
    fn drop(&mut self) {
        // Native locks die with their session; process entries must be freed here.
        if self.held && self.support == LockSupport::Process {
            process_locks().remove(&self.id);
        }
    }
}
