//! Error classification for driver messages.
//!
//! The classifier is a pure string inspector: it takes the raw message of a
//! failed statement and decides whether re-running the same statement could
//! plausibly succeed. Oracle `ORA-NNNNN` codes are matched first, then a
//! small set of transport-level substrings that surface from either side of
//! the pipe.

use serde::{Deserialize, Serialize};

/// Classification outcome for a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Worth retrying with backoff: timeouts, dropped connections,
    /// lock contention.
    Transient,

    /// Deterministic failure: constraint violations, type mismatches,
    /// missing objects. Retrying reproduces the same error.
    Permanent,
}

/// ORA codes treated as transient.
///
/// 00060 deadlock, 01013 user-cancelled/timeout, 03113/03114 lost contact,
/// 12541 no listener, 12537 connect closed, 12170 connect timeout,
/// 00054 resource busy.
const TRANSIENT_ORA_CODES: &[&str] = &[
    "ORA-00060",
    "ORA-01013",
    "ORA-03113",
    "ORA-03114",
    "ORA-12541",
    "ORA-12537",
    "ORA-12170",
    "ORA-00054",
];

/// Substrings that indicate a transport-level fault on either database.
const TRANSIENT_FRAGMENTS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "too many connections",
    "the database system is starting up",
];

/// How bad a failure is for the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A single row was rejected; the run can continue.
    Warning,

    /// The statement failed but the session is usable.
    Error,

    /// The connection itself is gone.
    Critical,
}

/// Full classification for one failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    /// The `ORA-NNNNN` code when the message carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error_code: Option<String>,
    pub severity: Severity,
    pub suggested_action: String,
}

/// Classify a raw driver error message.
///
/// Unrecognized messages are treated as permanent: blind retries against an
/// unknown failure repeat work without a reason to expect a different result.
#[must_use]
pub fn classify(message: &str) -> ErrorClass {
    for code in TRANSIENT_ORA_CODES {
        if message.contains(code) {
            return ErrorClass::Transient;
        }
    }

    let lower = message.to_ascii_lowercase();
    for fragment in TRANSIENT_FRAGMENTS {
        if lower.contains(fragment) {
            return ErrorClass::Transient;
        }
    }

    ErrorClass::Permanent
}

/// Classify a message with code extraction, severity, and a remediation hint.
#[must_use]
pub fn classify_detailed(message: &str) -> ClassifiedError {
    let class = classify(message);
    let target_error_code = extract_ora_code(message);

    let (severity, suggested_action) = match target_error_code.as_deref() {
        Some("ORA-00001") => (
            Severity::Warning,
            "Duplicate key; check whether the row was already migrated".to_string(),
        ),
        Some("ORA-01400") => (
            Severity::Warning,
            "NULL in a NOT NULL column; review source data or column mapping".to_string(),
        ),
        Some("ORA-12899") => (
            Severity::Warning,
            "Value exceeds column width; widen the target column".to_string(),
        ),
        Some("ORA-01722") => (
            Severity::Warning,
            "Value is not a valid number; review the type conversion for this column".to_string(),
        ),
        Some("ORA-02291") => (
            Severity::Warning,
            "Parent key not found; migrate the referenced table first".to_string(),
        ),
        Some("ORA-00942") => (
            Severity::Error,
            "Target table does not exist; run the schema scripts first".to_string(),
        ),
        Some("ORA-01653") | Some("ORA-01688") => (
            Severity::Critical,
            "Tablespace is full; extend the tablespace before resuming".to_string(),
        ),
        Some("ORA-03113")
        | Some("ORA-03114")
        | Some("ORA-12541")
        | Some("ORA-12537")
        | Some("ORA-12170") => (
            Severity::Critical,
            "Connection to the target was lost; the operation will be retried".to_string(),
        ),
        _ => match class {
            ErrorClass::Transient => (
                Severity::Error,
                "Transient failure; the operation will be retried with backoff".to_string(),
            ),
            ErrorClass::Permanent => (
                Severity::Error,
                "Manual review required; inspect the statement and source data".to_string(),
            ),
        },
    };

    ClassifiedError {
        class,
        target_error_code,
        severity,
        suggested_action,
    }
}

/// Pull the first `ORA-NNNNN` token out of a message, if any.
#[must_use]
pub fn extract_ora_code(message: &str) -> Option<String> {
    let start = message.find("ORA-")?;
    let digits: String = message[start + 4..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.len() == 5 {
        Some(format!("ORA-{digits}"))
    } else {
        None
    }
}

/// Convenience wrapper used at retry decision points.
#[must_use]
pub fn is_transient(message: &str) -> bool {
    classify(message) == ErrorClass::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_ora_codes() {
        let cases = [
            "ORA-00060: deadlock detected while waiting for resource",
            "ORA-01013: user requested cancel of current operation",
            "ORA-03113: end-of-file on communication channel",
            "ORA-03114: not connected to ORACLE",
            "ORA-12541: TNS:no listener",
            "ORA-12170: TNS:Connect timeout occurred",
            "ORA-00054: resource busy and acquire with NOWAIT specified",
        ];
        for message in cases {
            assert_eq!(classify(message), ErrorClass::Transient, "{message}");
        }
    }

    #[test]
    fn test_permanent_ora_codes() {
        let cases = [
            "ORA-00001: unique constraint (PCM.PK_USERS) violated",
            "ORA-01400: cannot insert NULL into (\"PCM\".\"USERS\".\"ID\")",
            "ORA-00942: table or view does not exist",
            "ORA-01722: invalid number",
            "ORA-12899: value too large for column",
        ];
        for message in cases {
            assert_eq!(classify(message), ErrorClass::Permanent, "{message}");
        }
    }

    #[test]
    fn test_transport_fragments() {
        assert_eq!(classify("db error: Connection reset by peer"), ErrorClass::Transient);
        assert_eq!(classify("operation timed out after 30s"), ErrorClass::Transient);
        assert_eq!(
            classify("FATAL: the database system is starting up"),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_unknown_is_permanent() {
        assert_eq!(classify("something odd happened"), ErrorClass::Permanent);
        assert_eq!(classify(""), ErrorClass::Permanent);
    }

    #[test]
    fn test_is_transient_helper() {
        assert!(is_transient("ORA-00060: deadlock detected"));
        assert!(!is_transient("ORA-00001: unique constraint violated"));
    }

    #[test]
    fn test_extract_ora_code() {
        assert_eq!(
            extract_ora_code("ORA-00001: unique constraint violated").as_deref(),
            Some("ORA-00001")
        );
        assert_eq!(extract_ora_code("connection reset by peer"), None);
        assert_eq!(extract_ora_code("ORA-1: truncated code"), None);
    }

    #[test]
    fn test_classify_detailed_duplicate_key() {
        let detail = classify_detailed("ORA-00001: unique constraint (PCM.PK_USERS) violated");
        assert_eq!(detail.class, ErrorClass::Permanent);
        assert_eq!(detail.target_error_code.as_deref(), Some("ORA-00001"));
        assert_eq!(detail.severity, Severity::Warning);
        assert!(detail.suggested_action.contains("Duplicate key"));
    }

    #[test]
    fn test_classify_detailed_unknown_code_needs_manual_review() {
        let detail = classify_detailed("ORA-99999: something new");
        assert_eq!(detail.class, ErrorClass::Permanent);
        assert_eq!(detail.severity, Severity::Error);
        assert!(detail.suggested_action.contains("Manual review required"));
    }

    #[test]
    fn test_classify_detailed_lost_contact_is_critical() {
        let detail = classify_detailed("ORA-03113: end-of-file on communication channel");
        assert_eq!(detail.class, ErrorClass::Transient);
        assert_eq!(detail.severity, Severity::Critical);
    }
}
