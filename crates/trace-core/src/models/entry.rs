//! Entry identity: the join key between local store, baselines and remote files.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Kind of diary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Daily,
    YearlySummary,
}

impl EntryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::YearlySummary => "yearly_summary",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily" => Ok(Self::Daily),
            "yearly_summary" => Ok(Self::YearlySummary),
            other => Err(Error::Validation(format!("unknown entry type: {other}"))),
        }
    }
}

/// Deterministic entry id: `daily:{YYYY-MM-DD}` or `summary:{YYYY}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryId {
    Daily(NaiveDate),
    Summary(i32),
}

impl EntryId {
    pub fn daily(date: &str) -> crate::Result<Self> {
        parse_date(date).map(Self::Daily)
    }

    pub fn summary(year: i32) -> crate::Result<Self> {
        validate_year(year).map(Self::Summary)
    }

    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::Daily(_) => EntryKind::Daily,
            Self::Summary(_) => EntryKind::YearlySummary,
        }
    }

    /// Calendar date; yearly summaries sort on the last day of their year.
    pub fn date(&self) -> String {
        match self {
            Self::Daily(date) => date.format(DATE_FORMAT).to_string(),
            Self::Summary(year) => format!("{year}-12-31"),
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            Self::Daily(date) => date.year(),
            Self::Summary(year) => *year,
        }
    }

    /// Remote file name, also used as the local `filename`.
    pub fn remote_path(&self) -> String {
        match self {
            Self::Daily(date) => format!("{}.md.enc", date.format(DATE_FORMAT)),
            Self::Summary(year) => format!("{year}-summary.md.enc"),
        }
    }

    /// Scope string mixed into content fingerprints.
    pub(crate) fn fingerprint_scope(&self) -> String {
        match self {
            Self::Daily(date) => format!("daily:{}", date.format(DATE_FORMAT)),
            Self::Summary(year) => format!("yearly:{year}"),
        }
    }

    /// Parse a strict id, or a bare `YYYY-MM-DD` / `YYYY` as typed by users.
    pub fn parse_loose(value: &str) -> crate::Result<Self> {
        let value = value.trim();
        if value.contains(':') {
            return value.parse();
        }
        if value.len() == 4 {
            let year = value
                .parse::<i32>()
                .map_err(|_| Error::Validation(format!("invalid year: {value}")))?;
            return Self::summary(year);
        }
        Self::daily(value)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily(date) => write!(f, "daily:{}", date.format(DATE_FORMAT)),
            Self::Summary(year) => write!(f, "summary:{year}"),
        }
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(date) = s.strip_prefix("daily:") {
            return Self::daily(date);
        }
        if let Some(year) = s.strip_prefix("summary:") {
            if year.len() != 4 {
                return Err(Error::Validation(format!("invalid summary year: {year}")));
            }
            let year = year
                .parse::<i32>()
                .map_err(|_| Error::Validation(format!("invalid summary year: {year}")))?;
            return Self::summary(year);
        }
        Err(Error::Validation(format!("invalid entry id: {s}")))
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_date(value: &str) -> crate::Result<NaiveDate> {
    let value = value.trim();
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| Error::Validation(format!("invalid date (expected YYYY-MM-DD): {value}")))?;
    validate_year(date.year())?;
    Ok(date)
}

fn validate_year(year: i32) -> crate::Result<i32> {
    if (1000..=9999).contains(&year) {
        Ok(year)
    } else {
        Err(Error::Validation(format!("year out of range: {year}")))
    }
}
