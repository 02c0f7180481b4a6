//! Typed cache keys with canonical string rendering.
//!
//! The key insight is that `CacheKey` is a closed enum: there is no way to
//! hand the cache a free-form string, so every call site is checked for
//! key-shape correctness at compile time. Two logically identical requests
//! always render to byte-identical strings; a broken mapping here would
//! cause silent staleness or cross-request leakage, which is why rendering
//! is kept trivial and exhaustively tested.

use std::fmt;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upstream data source a cached value was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Remote activity API.
    Strava,
    /// Intervals.icu aggregate API.
    Intervals,
    /// On-device health store (biometrics).
    Health,
}

impl DataSource {
    /// Canonical lowercase label used in rendered keys.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Strava => "strava",
            Self::Intervals => "intervals",
            Self::Health => "health",
        }
    }
}

/// Kind of derived daily score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Recovery,
    Sleep,
    Strain,
    Readiness,
}

impl ScoreKind {
    /// Canonical lowercase label used in rendered keys.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Sleep => "sleep",
            Self::Strain => "strain",
            Self::Readiness => "readiness",
        }
    }
}

/// Deterministic, type-safe identifier for a cached value.
///
/// Each variant is one key *shape*; construction is exhaustive over the
/// closed set, and `render` maps each shape to a canonical string such as
/// `strava:activities:7` or `score:recovery:2026-08-30`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// Recent activities for the last `days` days from `source`.
    Activities { source: DataSource, days: u32 },
    /// Time-series stream for a single activity.
    ActivityStream { source: DataSource, activity_id: u64 },
    /// Derived score of `kind` for a calendar date.
    Score { kind: ScoreKind, date: NaiveDate },
    /// Daily aggregate record from `source` for a calendar date.
    DailyAggregate { source: DataSource, date: NaiveDate },
    /// Athlete profile from `source`.
    Profile { source: DataSource },
}

impl CacheKey {
    /// Render this key to its canonical string form.
    ///
    /// Pure and deterministic: logically identical requests render
    /// byte-identically, distinct requests render differently. Dates use
    /// ISO `%Y-%m-%d`, so renders sort naturally within a shape.
    pub fn render(&self) -> String {
        match self {
            Self::Activities { source, days } => {
                format!("{}:activities:{}", source.label(), days)
            }
            Self::ActivityStream {
                source,
                activity_id,
            } => format!("{}:stream:{}", source.label(), activity_id),
            Self::Score { kind, date } => {
                format!("score:{}:{}", kind.label(), date.format("%Y-%m-%d"))
            }
            Self::DailyAggregate { source, date } => {
                format!("{}:daily:{}", source.label(), date.format("%Y-%m-%d"))
            }
            Self::Profile { source } => format!("{}:profile", source.label()),
        }
    }

    /// Check whether this key's rendered form matches `pattern`.
    ///
    /// Every tier uses this same predicate for bulk invalidation, so
    /// matching behavior is identical regardless of which tier currently
    /// holds the value.
    pub fn matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.render())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
