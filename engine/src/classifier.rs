//! Failure classification.
//!
//! Executors report failures as raw strings coming from very different
//! backends (FTP reply codes, HTTP statuses, OS errors). `classify` maps such a
//! string onto a small taxonomy that the circuit breaker and the retry policy
//! can reason about.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Remote storage is full or over quota
    QuotaExceeded,
    /// Credentials rejected or session expired
    Auth,
    /// Local disk full or broken I/O
    DiskError,
    PermissionDenied,
    Timeout,
    RateLimit,
    /// File is locked or in use by another process
    FileLocked,
    /// Connection-level failure
    Network,
    PathNotFound,
    Unknown,
}

impl ErrorKind {
    /// Unrecoverable for the whole batch; never retried.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Auth | Self::DiskError)
    }

    /// Attributable to a single file. These never count toward the
    /// consecutive-failure counter and are never retried.
    pub fn is_per_file(self) -> bool {
        matches!(self, Self::PathNotFound | Self::PermissionDenied | Self::FileLocked)
    }

    /// Repeated occurrences point at a severed connection.
    pub fn is_reconnect(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Fixed retryable flag attached to every kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit | Self::FileLocked | Self::Network | Self::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quota_exceeded",
            Self::Auth => "auth",
            Self::DiskError => "disk_error",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::FileLocked => "file_locked",
            Self::Network => "network",
            Self::PathNotFound => "path_not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a raw failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl From<ErrorKind> for ErrorClassification {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
        }
    }
}

const QUOTA: &[&str] = &["quota", "storage full", "insufficient storage", "552 "];
const AUTH: &[&str] = &["auth", "login", "credential", "401 ", "530 "];
const DISK: &[&str] = &["disk full", "no space", "i/o error", "broken pipe"];
const PERMISSION: &[&str] = &["permission denied", "access denied", "403 "];
const TIMEOUT: &[&str] = &["timeout", "timed out"];
const RATE_LIMIT: &[&str] = &["rate limit", "too many requests", "429"];
const LOCKED: &[&str] = &["locked", "in use"];
const NETWORK: &[&str] = &[
    "connection",
    "network",
    "dns",
    "refused",
    "reset",
    "eof",
    "data connection",
    "not connected",
];
const NOT_FOUND: &[&str] = &["not found", "no such file", "404 "];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a raw failure message.
///
/// Matching is case-insensitive and the first rule that matches wins, so the
/// order of the checks below is significant. A bare `550` reply is ambiguous
/// between "permission denied" and "no such file"; the message text decides.
pub fn classify(raw: &str) -> ErrorClassification {
    let msg = raw.to_lowercase();

    let kind = if contains_any(&msg, QUOTA) {
        ErrorKind::QuotaExceeded
    } else if contains_any(&msg, AUTH) {
        ErrorKind::Auth
    } else if contains_any(&msg, DISK) {
        ErrorKind::DiskError
    } else if contains_any(&msg, PERMISSION)
        || (msg.contains("550 ") && !msg.contains("not found") && !msg.contains("no such"))
    {
        ErrorKind::PermissionDenied
    } else if contains_any(&msg, TIMEOUT) {
        ErrorKind::Timeout
    } else if contains_any(&msg, RATE_LIMIT) {
        ErrorKind::RateLimit
    } else if contains_any(&msg, LOCKED) {
        ErrorKind::FileLocked
    } else if contains_any(&msg, NETWORK) {
        ErrorKind::Network
    } else if contains_any(&msg, NOT_FOUND) {
        ErrorKind::PathNotFound
    } else {
        ErrorKind::Unknown
    };

    kind.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(raw: &str) -> ErrorKind {
        classify(raw).kind
    }

    #[test]
    fn test_550_disambiguation() {
        assert_eq!(
            classify("550 Permission denied"),
            ErrorClassification { kind: ErrorKind::PermissionDenied, retryable: false }
        );
        assert_eq!(
            classify("550 No such file"),
            ErrorClassification { kind: ErrorKind::PathNotFound, retryable: false }
        );
        assert_eq!(kind("550 Requested action not taken"), ErrorKind::PermissionDenied);
        assert_eq!(kind("550 File not found"), ErrorKind::PathNotFound);
    }

    #[test]
    fn test_timeout_is_retryable_reconnect() {
        let c = classify("Connection timed out");
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert!(c.retryable);
        assert!(c.kind.is_reconnect());
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(kind("QUOTA EXCEEDED"), ErrorKind::QuotaExceeded);
        assert_eq!(kind("Too Many Requests"), ErrorKind::RateLimit);
    }

    #[test]
    fn test_priority_order() {
        // quota beats auth
        assert_eq!(kind("auth failed: quota exhausted"), ErrorKind::QuotaExceeded);
        // disk beats network ("broken pipe" vs "connection")
        assert_eq!(kind("connection: broken pipe"), ErrorKind::DiskError);
        // timeout beats network
        assert_eq!(kind("network timeout"), ErrorKind::Timeout);
        // locked beats network
        assert_eq!(kind("file in use, connection kept"), ErrorKind::FileLocked);
        // network beats not found
        assert_eq!(kind("connection reset: file not found"), ErrorKind::Network);
    }

    #[test]
    fn test_each_rule() {
        assert_eq!(kind("552 Requested file action aborted"), ErrorKind::QuotaExceeded);
        assert_eq!(kind("Insufficient storage"), ErrorKind::QuotaExceeded);
        assert_eq!(kind("530 Not logged in"), ErrorKind::Auth);
        assert_eq!(kind("401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(kind("No space left on device"), ErrorKind::DiskError);
        assert_eq!(kind("I/O error"), ErrorKind::DiskError);
        assert_eq!(kind("403 Forbidden"), ErrorKind::PermissionDenied);
        assert_eq!(kind("Access denied"), ErrorKind::PermissionDenied);
        assert_eq!(kind("HTTP 429"), ErrorKind::RateLimit);
        assert_eq!(kind("resource locked"), ErrorKind::FileLocked);
        assert_eq!(kind("DNS lookup failed"), ErrorKind::Network);
        assert_eq!(kind("unexpected EOF"), ErrorKind::Network);
        assert_eq!(kind("Not connected"), ErrorKind::Network);
        assert_eq!(kind("404 Not Found"), ErrorKind::PathNotFound);
        assert_eq!(kind("something odd happened"), ErrorKind::Unknown);
        assert!(classify("something odd happened").retryable);
    }

    #[test]
    fn test_sets_are_disjoint() {
        let all = [
            ErrorKind::QuotaExceeded,
            ErrorKind::Auth,
            ErrorKind::DiskError,
            ErrorKind::PermissionDenied,
            ErrorKind::Timeout,
            ErrorKind::RateLimit,
            ErrorKind::FileLocked,
            ErrorKind::Network,
            ErrorKind::PathNotFound,
            ErrorKind::Unknown,
        ];
        for k in all {
            let memberships =
                [k.is_fatal(), k.is_per_file(), k.is_reconnect()].iter().filter(|b| **b).count();
            assert!(memberships <= 1, "{} belongs to more than one set", k);
        }
        assert!(ErrorKind::FileLocked.is_retryable() && ErrorKind::FileLocked.is_per_file());
    }
}
