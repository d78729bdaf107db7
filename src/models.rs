//! Participant records and chart rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One stored participant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub external_id: String,
    pub diagnosis: String,
    pub age: i64,
    pub gender: String,
    pub state: String,
    pub joined_at: NaiveDateTime,
}

/// A participant that has not been assigned a primary key yet.
///
/// This is also the shape of each entry in a seed or bulk document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub external_id: String,
    pub diagnosis: String,
    pub age: i64,
    pub gender: String,
    pub state: String,
    #[serde(deserialize_with = "deserialize_joined_at")]
    pub joined_at: NaiveDateTime,
}

impl NewParticipant {
    pub fn with_id(self, id: i64) -> Participant {
        Participant {
            id,
            external_id: self.external_id,
            diagnosis: self.diagnosis,
            age: self.age,
            gender: self.gender,
            state: self.state,
            joined_at: self.joined_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Chart rows
// ---------------------------------------------------------------------------

/// One bucket of a grouped aggregation: `{"label": ..., "value": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupCount {
    pub label: String,
    pub value: u64,
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse a `joined_at` value.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]`, the same with a space separator, a bare
/// date (midnight), or RFC 3339 with an offset (converted to UTC).
pub fn parse_joined_at(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn deserialize_joined_at<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_joined_at(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised joined_at timestamp `{raw}`")))
}
