//! Core domain model for podlink: per-source rows, canonical identities and
//! the publish-timestamp handling shared by every crate.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "podlink-core";

/// The two catalogs podlink reconciles. YouTube is the video side, Spotify the
/// audio side; Spotify values win every field conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Youtube,
    Spotify,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Youtube => "youtube",
            Source::Spotify => "spotify",
        }
    }

    pub fn from_source_id(source_id: &str) -> Option<Self> {
        match source_id {
            "youtube" => Some(Source::Youtube),
            "spotify" => Some(Source::Spotify),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw row was missing, or carried an unusable value for, a required field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {platform} record {record_id}: field `{field}` {reason}")]
pub struct MalformedRecordError {
    pub platform: Source,
    pub record_id: String,
    pub field: &'static str,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn missing(platform: Source, record_id: impl Into<String>, field: &'static str) -> Self {
        Self {
            platform,
            record_id: record_id.into(),
            field,
            reason: "is missing".to_string(),
        }
    }
}

/// Source-neutral channel row, as handed over by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub source_channel_id: String,
    pub display_name: String,
}

/// Source-neutral episode row. Everything besides the two keys is optional so
/// that gaps surface as [`MalformedRecordError`] when the matcher hydrates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRow {
    pub source_episode_id: String,
    pub source_channel_id: String,
    pub channel_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub published_at_precision: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    Second,
    Day,
    Month,
    Year,
}

impl DatePrecision {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "second" | "time" => Some(DatePrecision::Second),
            "day" => Some(DatePrecision::Day),
            "month" => Some(DatePrecision::Month),
            "year" => Some(DatePrecision::Year),
            _ => None,
        }
    }
}

/// Publish instant together with the precision the source reported it at.
/// Coarse values are anchored at the start of their period (midnight UTC for a
/// bare date).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedAt {
    pub instant: DateTime<Utc>,
    pub precision: DatePrecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("unrecognized precision `{0}`")]
    UnknownPrecision(String),
    #[error("`{value}` is not a valid {precision:?}-precision timestamp")]
    Invalid {
        value: String,
        precision: DatePrecision,
    },
    #[error("`{0}` is not a recognized timestamp")]
    Unrecognized(String),
}

impl PublishedAt {
    /// Parses `value`, honouring an explicit precision hint when the source
    /// provides one (Spotify's `release_date_precision`).
    pub fn parse(value: &str, precision_hint: Option<&str>) -> Result<Self, TimestampError> {
        let value = value.trim();
        match precision_hint {
            Some(hint) => {
                let precision = DatePrecision::parse(hint)
                    .ok_or_else(|| TimestampError::UnknownPrecision(hint.to_string()))?;
                parse_with_precision(value, precision).ok_or_else(|| TimestampError::Invalid {
                    value: value.to_string(),
                    precision,
                })
            }
            None => [
                DatePrecision::Second,
                DatePrecision::Day,
                DatePrecision::Month,
                DatePrecision::Year,
            ]
            .into_iter()
            .find_map(|precision| parse_with_precision(value, precision))
            .ok_or_else(|| TimestampError::Unrecognized(value.to_string())),
        }
    }

    pub fn hours_between(&self, other: &PublishedAt) -> f64 {
        (self.instant - other.instant).num_seconds().abs() as f64 / 3600.0
    }
}

fn parse_with_precision(value: &str, precision: DatePrecision) -> Option<PublishedAt> {
    let instant = match precision {
        DatePrecision::Second => DateTime::parse_from_rfc3339(value)
            .ok()?
            .with_timezone(&Utc),
        DatePrecision::Day => start_of_day(NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?)?,
        DatePrecision::Month => {
            let (year, month) = value.split_once('-')?;
            if month.len() != 2 {
                return None;
            }
            start_of_day(NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)?)?
        }
        DatePrecision::Year => {
            if value.len() != 4 {
                return None;
            }
            start_of_day(NaiveDate::from_ymd_opt(value.parse().ok()?, 1, 1)?)?
        }
    };
    Some(PublishedAt { instant, precision })
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Identifies a channel inside one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub display_name: String,
    pub episode_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalChannel {
    pub id: Uuid,
    pub canonical_name: String,
    pub youtube: SourceRef,
    pub spotify: SourceRef,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalChannel {
    pub fn source_ref(&self, source: Source) -> &SourceRef {
        match source {
            Source::Youtube => &self.youtube,
            Source::Spotify => &self.spotify,
        }
    }
}

/// Per-source episode attributes used as matcher input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub source_episode_id: String,
    pub source_channel_id: String,
    pub channel_name: String,
    pub display_name: String,
    pub description: String,
    pub published_at: PublishedAt,
}

impl EpisodeRef {
    /// Validates a raw row. A missing description is read as empty; title,
    /// channel name and publish timestamp are required.
    pub fn from_row(source: Source, row: &EpisodeRow) -> Result<Self, MalformedRecordError> {
        let id = row.source_episode_id.as_str();
        let required = |value: &Option<String>, field: &'static str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| MalformedRecordError::missing(source, id, field))
        };

        let display_name = required(&row.title, "title")?;
        let channel_name = required(&row.channel_name, "channel_name")?;
        let raw_published_at = required(&row.published_at, "published_at")?;
        let published_at =
            PublishedAt::parse(&raw_published_at, row.published_at_precision.as_deref()).map_err(
                |err| MalformedRecordError {
                    platform: source,
                    record_id: id.to_string(),
                    field: "published_at",
                    reason: err.to_string(),
                },
            )?;

        Ok(Self {
            source_episode_id: row.source_episode_id.clone(),
            source_channel_id: row.source_channel_id.clone(),
            channel_name,
            display_name,
            description: row.description.clone().unwrap_or_default(),
            published_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEpisode {
    pub id: Uuid,
    pub canonical_name: String,
    pub parent_channel_name: String,
    pub canonical_description: String,
    pub youtube_episode: EpisodeRef,
    pub spotify_episode: EpisodeRef,
}

pub fn canonical_channel_id(canonical_name: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("podlink:channel:{canonical_name}").as_bytes(),
    )
}

pub fn canonical_episode_id(parent_channel_name: &str, youtube_id: &str, spotify_id: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("podlink:episode:{parent_channel_name}:{youtube_id}:{spotify_id}").as_bytes(),
    )
}
