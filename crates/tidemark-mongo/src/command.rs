use std::time::Duration;

use mongodb::bson::{Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use tidemark_common::BoxError;
use tidemark_driver::VendorDetail;

/// Server code for creating a collection that already exists.
pub(crate) const NAMESPACE_EXISTS: i32 = 48;
/// Server code for dropping a collection that does not exist.
pub(crate) const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server code for an operation that ran past its `maxTimeMS`.
pub(crate) const MAX_TIME_MS_EXPIRED: i32 = 50;

const MAX_TIME_FIELD: &str = "maxTimeMS";

/// Parse a migration payload: a JSON array of command documents.
///
/// Extended JSON (`{"$oid": ...}`, `{"$date": ...}`) is accepted.
pub fn parse_commands(payload: &[u8]) -> Result<Vec<Document>, String> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(payload)
        .map_err(|e| format!("migration must be a JSON array of commands: {e}"))?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match Bson::try_from(value) {
            Ok(Bson::Document(command)) => Ok(command),
            Ok(other) => Err(format!(
                "command {index} must be a document, got {:?}",
                other.element_type()
            )),
            Err(e) => Err(format!("command {index} is not valid extended JSON: {e}")),
        })
        .collect()
}

/// Server code of a command or write failure.
pub(crate) fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

pub(crate) fn vendor_detail(err: &mongodb::error::Error) -> Option<VendorDetail> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(VendorDetail::new(
            command.code.to_string(),
            command.message.clone(),
        )),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(VendorDetail::new(
            write.code.to_string(),
            write.message.clone(),
        )),
        _ => None,
    }
}

/// A failed command: its vendor detail and the native error.
#[derive(Debug)]
pub(crate) struct CommandFailure {
    pub code: Option<i32>,
    pub detail: Option<VendorDetail>,
    pub source: BoxError,
}

impl CommandFailure {
    /// The server gave up because the command's `maxTimeMS` ran out.
    pub fn timed_out(&self) -> bool {
        self.code == Some(MAX_TIME_MS_EXPIRED)
    }
}

impl From<mongodb::error::Error> for CommandFailure {
    fn from(err: mongodb::error::Error) -> Self {
        Self {
            code: server_code(&err),
            detail: vendor_detail(&err),
            source: err.into(),
        }
    }
}

/// Failure of one command, if any.
///
/// Write commands report per-document failures in `writeErrors` of an
/// otherwise successful reply; the first one counts as the failure.
pub(crate) fn command_failure(result: mongodb::error::Result<Document>) -> Option<CommandFailure> {
    match result {
        Err(e) => Some(e.into()),
        Ok(reply) => write_error(&reply).map(|detail| CommandFailure {
            code: detail.code.parse().ok(),
            source: format!("{} (code {})", detail.message, detail.code).into(),
            detail: Some(detail),
        }),
    }
}

/// Attach the time left before the deadline so the server aborts the command
/// itself. A `maxTimeMS` already present in the command is kept.
pub fn with_max_time(mut command: Document, remaining: Option<Duration>) -> Document {
    if let Some(remaining) = remaining {
        if !command.contains_key(MAX_TIME_FIELD) {
            let millis = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
            command.insert(MAX_TIME_FIELD, millis.max(1));
        }
    }
    command
}

fn write_error(reply: &Document) -> Option<VendorDetail> {
    let first = reply.get_array("writeErrors").ok()?.first()?.as_document()?;
    let code = first
        .get_i32("code")
        .map(i64::from)
        .or_else(|_| first.get_i64("code"))
        .unwrap_or_default();
    let message = first.get_str("errmsg").unwrap_or("write error");
    Some(VendorDetail::new(code.to_string(), message))
}
