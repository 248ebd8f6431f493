use mongodb::{
    bson::{Bson, Document},
    error::{Error, ErrorKind, WriteFailure},
};

use crate::provision::FailureKind;

// server error codes we care about
pub const NAMESPACE_NOT_FOUND: i32 = 26;
pub const NAMESPACE_EXISTS: i32 = 48;
pub const DUPLICATE_KEY: i32 = 11000;
pub const USER_ALREADY_EXISTS: i32 = 51003;
pub const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

/// Server error code carried by a command or write error, if any.
pub fn error_code(error: &Error) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => Some(command_error.code),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => Some(write_error.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern_error)) => {
            Some(concern_error.code)
        }
        _ => None,
    }
}

/// Whether the server refused the request because the target is already there.
pub fn is_already_exists(error: &Error) -> bool {
    matches!(
        error_code(error),
        Some(NAMESPACE_EXISTS | USER_ALREADY_EXISTS | DUPLICATE_KEY)
    )
}

pub fn is_namespace_not_found(error: &Error) -> bool {
    error_code(error) == Some(NAMESPACE_NOT_FOUND)
}

/// Map a driver error onto the failure taxonomy.
pub fn classify_error(error: &Error) -> FailureKind {
    match error.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => FailureKind::ConnectivityLost,
        ErrorKind::Authentication { .. } => FailureKind::PermissionDenied,
        ErrorKind::InvalidArgument { .. } | ErrorKind::BsonSerialization(_) => {
            FailureKind::ValidationRejected
        }
        _ => match error_code(error) {
            Some(code) => classify_code(code),
            None => FailureKind::Unknown,
        },
    }
}

pub fn classify_code(code: i32) -> FailureKind {
    match code {
        // Unauthorized, AuthenticationFailed
        13 | 18 => FailureKind::PermissionDenied,
        // BadValue, FailedToParse, TypeMismatch, CannotCreateIndex, InvalidOptions,
        // IndexOptionsConflict, IndexKeySpecsConflict, DocumentValidationFailure
        2 | 9 | 14 | 67 | 72 | 85 | 86 | DOCUMENT_VALIDATION_FAILURE => {
            FailureKind::ValidationRejected
        }
        // HostUnreachable, HostNotFound, NetworkTimeout, ShutdownInProgress,
        // PrimarySteppedDown, SocketException, NotWritablePrimary, InterruptedAtShutdown
        6 | 7 | 89 | 91 | 189 | 9001 | 10107 | 11600 => FailureKind::ConnectivityLost,
        _ => FailureKind::Unknown,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Compare two index key patterns field by field, in order.
/// The server may echo `1` back as an int32, int64 or double.
pub fn key_patterns_match(a: &Document, b: &Document) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
            ka == kb
                && match (as_number(va), as_number(vb)) {
                    (Some(x), Some(y)) => x == y,
                    _ => va == vb,
                }
        })
}
