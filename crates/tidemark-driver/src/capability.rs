/// How a backend scopes the effects of one migration payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSupport {
    /// The whole payload always runs in one backend transaction.
    Always,
    /// One transaction per payload only when `transaction_mode` is set.
    OptIn,
    /// Instructions run independently; a failure cannot be rolled back.
    Unsupported,
}

impl TransactionSupport {
    /// Whether a payload runs inside a transaction under the given mode.
    pub fn wraps(self, transaction_mode: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OptIn => transaction_mode,
            Self::Unsupported => false,
        }
    }
}

/// Strength of the mutual exclusion behind `Driver::lock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockSupport {
    /// Server-side advisory lock on the dedicated session.
    Native,
    /// Held-lock table shared by drivers in this process only. Drivers in
    /// other processes are not serialized against this one.
    Process,
    /// Only the driver's own flag; used when no other connection can reach
    /// the same database.
    Instance,
}

/// Capability descriptor of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub transactions: TransactionSupport,
    pub drop_if_exists: bool,
    pub lock: LockSupport,
}
