pub mod capability;
pub mod context;
pub mod driver;
pub mod lock;
pub mod registry;
pub mod sql;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vendor;

pub use capability::{Capabilities, LockSupport, TransactionSupport};
pub use context::Context;
pub use driver::{Driver, NIL_VERSION, read_payload};
pub use lock::{LockState, advisory_lock_id};
pub use registry::{Opener, Registry};
pub use sql::{AtomicFailure, AtomicStage, Dialect, ErrorClass, SqlDriver, SqlSession};
pub use vendor::{GENERIC_MIGRATION_FAILURE, VendorDetail, migration_error};
