//! Record keys
//!
//! Validated newtypes for the three parts of a record identity:
//! `(source, date, entity_id)`. Every value that reaches a file path has
//! passed through one of these constructors first.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BronzeError, Result};

/// Longest entity id accepted (bytes)
pub const MAX_ENTITY_ID_LEN: usize = 200;

/// Ids whose record file would land on one of the store's own files.
/// "manifest" maps to `manifest.json`.
pub const RESERVED_ENTITY_IDS: &[&str] = &["manifest"];

// =============================================================================
// Source
// =============================================================================

/// Data source a record was scraped from (e.g. "fotmob", "aiscore")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Source(String);

impl Source {
    /// Lower-cases the name and checks it is a plain `[a-z0-9_-]` component
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim().to_ascii_lowercase();
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if !valid {
            return Err(BronzeError::InvalidSource(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Source {
    type Err = BronzeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// RecordDate
// =============================================================================

/// Calendar day used to group records; canonical form is `YYYYMMDD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordDate(NaiveDate);

impl RecordDate {
    /// Parse `YYYYMMDD` or `YYYY-MM-DD`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let format = match input.len() {
            8 if input.bytes().all(|b| b.is_ascii_digit()) => "%Y%m%d",
            10 if input.as_bytes()[4] == b'-' && input.as_bytes()[7] == b'-' => "%Y-%m-%d",
            _ => return Err(BronzeError::InvalidDate(input.to_string())),
        };
        NaiveDate::parse_from_str(input, format)
            .map(Self)
            .map_err(|_| BronzeError::InvalidDate(input.to_string()))
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// Directory name form, e.g. "20240115"
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for RecordDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for RecordDate {
    type Err = BronzeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RecordDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.compact())
    }
}

impl<'de> Deserialize<'de> for RecordDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// EntityId
// =============================================================================

/// Identifier of one scraped entity, safe to embed in a file name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Reject anything that could escape the date directory or collide
    /// with the store's own files
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let safe = !raw.is_empty()
            && raw.len() <= MAX_ENTITY_ID_LEN
            && !raw.starts_with('.')
            && !raw.contains("..")
            && !raw
                .chars()
                .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
            // case-insensitive filesystems collide regardless of case
            && !RESERVED_ENTITY_IDS
                .iter()
                .any(|reserved| raw.eq_ignore_ascii_case(reserved));
        if !safe {
            return Err(BronzeError::InvalidEntityId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = BronzeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
