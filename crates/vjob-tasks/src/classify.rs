//! Classification of ECS API failures.

use vjob_core::StatusQueryError;

/// Failure reason DescribeTasks reports for unknown task ARNs.
pub const MISSING_REASON: &str = "MISSING";

const PERMISSION_CODE_PREFIXES: &[&str] = &[
    "AccessDenied",
    "Unauthorized",
    "UnrecognizedClient",
    "InvalidClientTokenId",
    "ExpiredToken",
];

/// Whether an error code or message means the caller lacks permission.
pub fn is_permission_error(code: Option<&str>, message: Option<&str>) -> bool {
    let by_code = code.is_some_and(|code| {
        PERMISSION_CODE_PREFIXES
            .iter()
            .any(|prefix| code.starts_with(prefix))
    });
    let by_message = message.is_some_and(|m| m.to_lowercase().contains("not authorized"));
    by_code || by_message
}

/// Map an SDK error code and message to a status query error.
pub fn status_error(code: Option<&str>, message: Option<&str>, fallback: &str) -> StatusQueryError {
    let detail = match (code, message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => fallback.to_string(),
    };

    if is_permission_error(code, message) {
        StatusQueryError::permission(detail)
    } else {
        StatusQueryError::transient(detail)
    }
}
