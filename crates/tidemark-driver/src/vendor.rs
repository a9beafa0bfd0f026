use tidemark_common::{BoxError, Error};

/// Message used when a failure carries no vendor detail.
pub const GENERIC_MIGRATION_FAILURE: &str = "migration failed";

/// Code and message a backend attaches to its native errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorDetail {
    pub code: String,
    pub message: String,
}

impl VendorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Build the run failure for a payload, preferring the vendor message.
pub fn migration_error(
    detail: Option<VendorDetail>,
    payload: Vec<u8>,
    source: impl Into<BoxError>,
) -> Error {
    let message = match detail {
        Some(VendorDetail { code, message }) => format!("{message} (code {code})"),
        None => GENERIC_MIGRATION_FAILURE.to_string(),
    };
    Error::Migration {
        message,
        payload,
        source: Some(source.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_message_is_attached() {
        let err = migration_error(
            Some(VendorDetail::new("42P01", "relation \"users\" does not exist")),
            b"SELECT * FROM users".to_vec(),
            "native",
        );
        assert_eq!(
            err.to_string(),
            "relation \"users\" does not exist (code 42P01) in migration: SELECT * FROM users"
        );
        assert_eq!(err.payload(), Some(&b"SELECT * FROM users"[..]));
    }

    #[test]
    fn missing_vendor_detail_uses_generic_message() {
        let err = migration_error(None, b"bad".to_vec(), "native");
        assert_eq!(err.to_string(), "migration failed in migration: bad");
    }
}
