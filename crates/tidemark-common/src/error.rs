use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed native error kept as the `source` of a driver error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Bytes of a failing migration shown in an error message.
const PAYLOAD_PREVIEW: usize = 256;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no config")]
    NilConfig,

    #[error("no database name")]
    NoDatabaseName,

    #[error("no schema")]
    NoSchema,

    #[error("can't acquire lock")]
    Locked,

    #[error("lock {resource} is held by another session")]
    LockContended { resource: String },

    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid connection url: {0}")]
    Url(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read migration: {0}")]
    Read(#[source] std::io::Error),

    #[error("{message} in migration: {}", preview(.payload))]
    Migration {
        message: String,
        payload: Vec<u8>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("query failed: {query}: {source}")]
    Query {
        query: String,
        #[source]
        source: BoxError,
    },

    #[error("transaction {stage} failed: {source}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{}", join(.0))]
    Multiple(Vec<Error>),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("driver already registered: {0}")]
    DuplicateDriver(String),
}

impl Error {
    pub fn connection(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn query(query: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Query {
            query: query.into(),
            source: source.into(),
        }
    }

    /// Whether the error reports a cancelled or timed-out operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Raw bytes of the migration that failed, if this is a run failure.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Migration { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Fold several independent failures into one error.
    ///
    /// Returns `Ok(())` when the list is empty and the single error unchanged
    /// when there is exactly one.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.chars().count() > PAYLOAD_PREVIEW {
        let cut: String = text.chars().take(PAYLOAD_PREVIEW).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::LockContended {
            resource: "42".into(),
        };
        assert_eq!(e.to_string(), "lock 42 is held by another session");

        let e = Error::Locked;
        assert_eq!(e.to_string(), "can't acquire lock");
    }

    #[test]
    fn migration_error_keeps_payload() {
        let e = Error::Migration {
            message: "syntax error".into(),
            payload: b"CREATE TABEL users (id INT);".to_vec(),
            source: None,
        };
        assert_eq!(
            e.to_string(),
            "syntax error in migration: CREATE TABEL users (id INT);"
        );
        assert_eq!(e.payload(), Some(&b"CREATE TABEL users (id INT);"[..]));
        assert!(Error::NoSchema.payload().is_none());
    }

    #[test]
    fn migration_error_truncates_long_payload() {
        let e = Error::Migration {
            message: "migration failed".into(),
            payload: "x".repeat(1000).into_bytes(),
            source: None,
        };
        let rendered = e.to_string();
        assert!(rendered.ends_with("..."));
        assert!(rendered.len() < 300);
        assert_eq!(e.payload().map(<[u8]>::len), Some(1000));
    }

    #[test]
    fn aggregate_keeps_every_error() {
        assert!(Error::aggregate(Vec::new()).is_ok());

        let single = Error::aggregate(vec![Error::NoSchema]).unwrap_err();
        assert!(matches!(single, Error::NoSchema));

        let both = Error::aggregate(vec![
            Error::Config("conn".into()),
            Error::Config("pool".into()),
        ])
        .unwrap_err();
        assert_eq!(
            both.to_string(),
            "configuration error: conn; configuration error: pool"
        );
    }

    #[test]
    fn cancellation_kinds_are_recognised() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::Locked.is_cancellation());
    }
}
