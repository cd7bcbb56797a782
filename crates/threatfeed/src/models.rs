use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative severity attached to an article at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl ThreatLevel {
    /// Parses stored text case-insensitively. Anything unrecognised is treated as unset.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort key for severity: lower sorts first. LOW and unset share the last bucket.
pub fn severity_rank(level: Option<ThreatLevel>) -> u8 {
    match level {
        Some(ThreatLevel::Critical) => 1,
        Some(ThreatLevel::High) => 2,
        Some(ThreatLevel::Medium) => 3,
        Some(ThreatLevel::Low) | None => 4,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub threat_level: Option<ThreatLevel>,
    /// Estimated reading time in minutes
    pub read_time: Option<u32>,
}

impl Article {
    pub fn severity_rank(&self) -> u8 {
        severity_rank(self.threat_level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

/// One-to-one with [`User`]. A user without this row never receives the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub user_id: i64,
    pub email_weekly_digest: bool,
}

/// An eligible digest recipient as read from the user store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

impl Recipient {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Display name for the greeting line, `None` when the user never set one.
    pub fn greeting_name(&self) -> Option<&str> {
        let name = self.name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Aggregate outcome of one digest run.
///
/// `skipped` is only non-zero when there was no content to send; it then
/// equals the number of selected recipients. Per-recipient send failures
/// are counted in `errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStats {
    pub sent: usize,
    pub errors: usize,
    pub skipped: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threat_level_is_case_insensitive() {
        assert_eq!(ThreatLevel::parse("critical"), Some(ThreatLevel::Critical));
        assert_eq!(ThreatLevel::parse(" High "), Some(ThreatLevel::High));
        assert_eq!(ThreatLevel::parse("LOW"), Some(ThreatLevel::Low));
        assert_eq!(ThreatLevel::parse("INFO"), None);
        assert_eq!(ThreatLevel::parse(""), None);
    }

    #[test]
    fn test_severity_rank_buckets() {
        assert_eq!(severity_rank(Some(ThreatLevel::Critical)), 1);
        assert_eq!(severity_rank(Some(ThreatLevel::High)), 2);
        assert_eq!(severity_rank(Some(ThreatLevel::Medium)), 3);
        assert_eq!(severity_rank(Some(ThreatLevel::Low)), 4);
        assert_eq!(severity_rank(None), 4);
    }

    #[test]
    fn test_greeting_name_ignores_blank_names() {
        assert_eq!(Recipient::new("a@example.com", "  ").greeting_name(), None);
        assert_eq!(
            Recipient::new("a@example.com", "Ada").greeting_name(),
            Some("Ada")
        );
    }

    #[test]
    fn test_stats_serialize_with_plain_field_names() {
        let stats = DigestStats {
            sent: 3,
            errors: 0,
            skipped: 0,
            total: 3,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["sent"], 3);
        assert_eq!(json["total"], 3);
    }
}
