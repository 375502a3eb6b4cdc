//! Catalog snapshot bundles + per-source row normalization.
//!
//! The fetch side (API clients, paging, auth) lives outside this workspace; it
//! drops one JSON bundle per source holding the raw provider rows. Adapters
//! turn those rows into source-neutral [`ChannelRow`]/[`EpisodeRow`] values.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use podlink_core::{ChannelRow, EpisodeRow, Source};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "podlink-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("{source_id} {table} row {index}")]
    Row {
        source_id: String,
        table: &'static str,
        index: usize,
        #[source]
        error: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub snapshot_id: String,
    pub source_id: String,
    pub captured_at: DateTime<Utc>,
    pub extractor_version: String,
    #[serde(default)]
    pub channels: Vec<JsonValue>,
    #[serde(default)]
    pub episodes: Vec<JsonValue>,
    pub notes: Option<String>,
}

/// Normalized rows from one source snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRows {
    pub source: Source,
    pub channels: Vec<ChannelRow>,
    pub episodes: Vec<EpisodeRow>,
}

pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn parse_snapshot(&self, bundle: &SnapshotBundle) -> Result<SourceRows, AdapterError>;
}

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn SourceAdapter>> {
    match Source::from_source_id(source_id)? {
        Source::Youtube => Some(Box::new(YoutubeAdapter)),
        Source::Spotify => Some(Box::new(SpotifyAdapter)),
    }
}

pub fn load_snapshot_bundle(path: impl AsRef<Path>) -> Result<SnapshotBundle> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn deterministic_snapshot_id_for_bundle(bundle: &SnapshotBundle) -> Uuid {
    let source = format!(
        "{}:{}:{}",
        bundle.source_id,
        bundle.snapshot_id,
        bundle.captured_at.to_rfc3339()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes())
}

fn ensure_source(bundle: &SnapshotBundle, expected: Source) -> Result<(), AdapterError> {
    if bundle.source_id != expected.as_str() {
        return Err(AdapterError::Message(format!(
            "snapshot {} belongs to `{}`, not `{}`",
            bundle.snapshot_id, bundle.source_id, expected
        )));
    }
    Ok(())
}

fn decode_rows<T: DeserializeOwned>(
    bundle: &SnapshotBundle,
    table: &'static str,
    values: &[JsonValue],
) -> Result<Vec<T>, AdapterError> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            T::deserialize(value).map_err(|error| AdapterError::Row {
                source_id: bundle.source_id.clone(),
                table,
                index,
                error,
            })
        })
        .collect()
}

/// Channel display names by id, used to fill in episode rows that only carry
/// the channel foreign key.
fn channel_names(channels: &[ChannelRow]) -> HashMap<&str, &str> {
    channels
        .iter()
        .map(|c| (c.source_channel_id.as_str(), c.display_name.as_str()))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeChannelRecord {
    channel_id: String,
    #[serde(alias = "title")]
    channel_title: String,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeVideoRecord {
    video_id: String,
    channel_id: String,
    channel_title: Option<String>,
    video_title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YoutubeAdapter;

impl SourceAdapter for YoutubeAdapter {
    fn source(&self) -> Source {
        Source::Youtube
    }

    fn parse_snapshot(&self, bundle: &SnapshotBundle) -> Result<SourceRows, AdapterError> {
        ensure_source(bundle, Source::Youtube)?;
        let channels = decode_rows::<YoutubeChannelRecord>(bundle, "channels", &bundle.channels)?
            .into_iter()
            .map(|c| ChannelRow {
                source_channel_id: c.channel_id,
                display_name: c.channel_title,
            })
            .collect::<Vec<_>>();
        let names = channel_names(&channels);
        let episodes = decode_rows::<YoutubeVideoRecord>(bundle, "videos", &bundle.episodes)?
            .into_iter()
            .map(|v| EpisodeRow {
                channel_name: v
                    .channel_title
                    .or_else(|| names.get(v.channel_id.as_str()).map(|n| n.to_string())),
                source_episode_id: v.video_id,
                source_channel_id: v.channel_id,
                title: v.video_title,
                description: v.description,
                published_at: v.published_at,
                published_at_precision: None,
            })
            .collect();
        Ok(SourceRows {
            source: Source::Youtube,
            channels,
            episodes,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyShowRecord {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyEpisodeRecord {
    id: String,
    show_id: String,
    show_name: Option<String>,
    name: Option<String>,
    description: Option<String>,
    release_date: Option<String>,
    release_date_precision: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpotifyAdapter;

impl SourceAdapter for SpotifyAdapter {
    fn source(&self) -> Source {
        Source::Spotify
    }

    fn parse_snapshot(&self, bundle: &SnapshotBundle) -> Result<SourceRows, AdapterError> {
        ensure_source(bundle, Source::Spotify)?;
        let channels = decode_rows::<SpotifyShowRecord>(bundle, "shows", &bundle.channels)?
            .into_iter()
            .map(|s| ChannelRow {
                source_channel_id: s.id,
                display_name: s.name,
            })
            .collect::<Vec<_>>();
        let names = channel_names(&channels);
        let episodes = decode_rows::<SpotifyEpisodeRecord>(bundle, "episodes", &bundle.episodes)?
            .into_iter()
            .map(|e| EpisodeRow {
                channel_name: e
                    .show_name
                    .or_else(|| names.get(e.show_id.as_str()).map(|n| n.to_string())),
                source_episode_id: e.id,
                source_channel_id: e.show_id,
                title: e.name,
                description: e.description,
                published_at: e.release_date,
                published_at_precision: e.release_date_precision,
            })
            .collect();
        Ok(SourceRows {
            source: Source::Spotify,
            channels,
            episodes,
        })
    }
}
