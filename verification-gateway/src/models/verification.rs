use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted proof that a health-card decode succeeded at least once.
///
/// Only successful records are ever written; a stored record that does not
/// say `verified: true` is treated as absent by [`VerificationRecord::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub verified: bool,
    pub timestamp: DateTime<Utc>,
    /// Route that was active when the decode happened. Diagnostic only.
    pub path: String,
}

impl VerificationRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            verified: true,
            timestamp: Utc::now(),
            path: path.into(),
        }
    }

    /// Parses a stored record, returning `None` for anything that is not a
    /// well-formed successful record.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|record| record.verified)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_stored_shape() {
        let raw = r#"{"verified":true,"timestamp":"2025-01-01T10:00:00Z","path":"/scanner"}"#;
        let record = VerificationRecord::parse(raw).unwrap();
        assert_eq!(record.path, "/scanner");
    }

    #[test]
    fn test_parse_rejects_unverified_and_garbage() {
        let unverified = r#"{"verified":false,"timestamp":"2025-01-01T10:00:00Z","path":"/"}"#;
        assert!(VerificationRecord::parse(unverified).is_none());
        assert!(VerificationRecord::parse("true").is_none());
        assert!(VerificationRecord::parse("{not json").is_none());
        assert!(VerificationRecord::parse(r#"{"verified":true}"#).is_none());
    }
}
