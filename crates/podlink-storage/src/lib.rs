//! Raw snapshot artifact storage and the keyed mapping tables podlink writes
//! its canonical rows into.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podlink_core::{CanonicalChannel, CanonicalEpisode};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "podlink-storage";

pub const MAPPED_CHANNELS_TABLE: &str = "mapped_channels";
pub const MAPPED_EPISODES_TABLE: &str = "mapped_episodes";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes `bytes` to a uniquely named sibling of `path` and returns the temp
/// path. Nothing is visible at `path` until the temp file is renamed.
async fn stage_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    if let Err(err) = fs::write(&temp_path, bytes).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(temp_path)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = stage_bytes(path, bytes).await?;
    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, content-addressed copies of the raw snapshots a run consumed.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_relative_path(
        &self,
        captured_at: DateTime<Utc>,
        source_id: &str,
        content_hash: &str,
    ) -> PathBuf {
        PathBuf::from(captured_at.format("%Y%m%d_%H%M%S").to_string())
            .join(source_id)
            .join(format!("{content_hash}.json"))
    }

    /// Stores `bytes` once per content hash; a second store of the same
    /// snapshot is reported as deduplicated and leaves the file untouched.
    pub async fn store_snapshot(
        &self,
        captured_at: DateTime<Utc>,
        source_id: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = sha256_hex(bytes);
        let relative_path = self.snapshot_relative_path(captured_at, source_id, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        let deduplicated = fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?;
        if !deduplicated {
            write_atomically(&absolute_path, bytes)
                .await
                .with_context(|| format!("writing snapshot artifact {}", absolute_path.display()))?;
        }
        debug!(source_id, %content_hash, deduplicated, "stored raw snapshot");

        Ok(StoredArtifact {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing table {table}")]
    Serde {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Rows written and rows refused because their key was already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableWrite {
    pub written: usize,
    pub rejected_duplicates: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingWrite {
    pub channels: TableWrite,
    pub episodes: TableWrite,
}

/// Keyed table store for canonical rows. Rows are keyed by canonical name and
/// the first row for a key wins. A replace swaps both tables or neither.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn replace_mappings(
        &self,
        channels: &[CanonicalChannel],
        episodes: &[CanonicalEpisode],
    ) -> Result<MappingWrite, StoreError>;

    async fn channels(&self) -> Result<Vec<CanonicalChannel>, StoreError>;

    async fn episodes(&self) -> Result<Vec<CanonicalEpisode>, StoreError>;
}

fn keyed<'r, T: Clone>(
    rows: &'r [T],
    key: impl Fn(&'r T) -> &'r str,
) -> (BTreeMap<String, T>, TableWrite) {
    let mut table = BTreeMap::new();
    let mut write = TableWrite::default();
    for row in rows {
        let k = key(row);
        if table.contains_key(k) {
            write.rejected_duplicates += 1;
            continue;
        }
        table.insert(k.to_string(), row.clone());
        write.written += 1;
    }
    (table, write)
}

#[derive(Debug, Default)]
struct Tables {
    channels: BTreeMap<String, CanonicalChannel>,
    episodes: BTreeMap<String, CanonicalEpisode>,
}

#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    tables: Mutex<Tables>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn replace_mappings(
        &self,
        channels: &[CanonicalChannel],
        episodes: &[CanonicalEpisode],
    ) -> Result<MappingWrite, StoreError> {
        let (channel_table, channel_write) = keyed(channels, |c| c.canonical_name.as_str());
        let (episode_table, episode_write) = keyed(episodes, |e| e.canonical_name.as_str());
        let mut tables = self.tables.lock().await;
        tables.channels = channel_table;
        tables.episodes = episode_table;
        Ok(MappingWrite {
            channels: channel_write,
            episodes: episode_write,
        })
    }

    async fn channels(&self) -> Result<Vec<CanonicalChannel>, StoreError> {
        Ok(self.tables.lock().await.channels.values().cloned().collect())
    }

    async fn episodes(&self) -> Result<Vec<CanonicalEpisode>, StoreError> {
        Ok(self.tables.lock().await.episodes.values().cloned().collect())
    }
}

/// A table serialized to a temp file next to its final path.
struct StagedTable {
    temp_path: PathBuf,
    path: PathBuf,
}

impl StagedTable {
    async fn commit(self) -> Result<(), StoreError> {
        let renamed = fs::rename(&self.temp_path, &self.path).await;
        if let Err(source) = renamed {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(StoreError::Io {
                path: self.path,
                source,
            });
        }
        Ok(())
    }

    async fn discard(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }
}

/// One pretty-printed JSON object per table under `root`, keyed by canonical
/// name. Both tables are staged before either is renamed into place.
#[derive(Debug, Clone)]
pub struct JsonTableStore {
    root: PathBuf,
}

impl JsonTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.json"))
    }

    async fn stage_table<T: Serialize>(
        &self,
        table: &'static str,
        rows: &BTreeMap<String, T>,
    ) -> Result<StagedTable, StoreError> {
        let path = self.table_path(table);
        debug!(table, rows = rows.len(), path = %path.display(), "staging mapping table");
        let bytes =
            serde_json::to_vec_pretty(rows).map_err(|source| StoreError::Serde { table, source })?;
        let staged = stage_bytes(&path, &bytes).await;
        match staged {
            Ok(temp_path) => Ok(StagedTable { temp_path, path }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn read_table<T: DeserializeOwned>(&self, table: &'static str) -> Result<Vec<T>, StoreError> {
        let path = self.table_path(table);
        let read = fs::read(&path).await;
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let rows: BTreeMap<String, T> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde { table, source })?;
        Ok(rows.into_values().collect())
    }
}

#[async_trait]
impl MappingStore for JsonTableStore {
    async fn replace_mappings(
        &self,
        channels: &[CanonicalChannel],
        episodes: &[CanonicalEpisode],
    ) -> Result<MappingWrite, StoreError> {
        let (channel_table, channel_write) = keyed(channels, |c| c.canonical_name.as_str());
        let (episode_table, episode_write) = keyed(episodes, |e| e.canonical_name.as_str());

        let staged_channels = self.stage_table(MAPPED_CHANNELS_TABLE, &channel_table).await?;
        let staged_episodes = match self.stage_table(MAPPED_EPISODES_TABLE, &episode_table).await {
            Ok(staged) => staged,
            Err(err) => {
                staged_channels.discard().await;
                return Err(err);
            }
        };
        // Episodes first: channel rows only move once their episodes landed.
        if let Err(err) = staged_episodes.commit().await {
            staged_channels.discard().await;
            return Err(err);
        }
        staged_channels.commit().await?;

        Ok(MappingWrite {
            channels: channel_write,
            episodes: episode_write,
        })
    }

    async fn channels(&self) -> Result<Vec<CanonicalChannel>, StoreError> {
        self.read_table(MAPPED_CHANNELS_TABLE).await
    }

    async fn episodes(&self) -> Result<Vec<CanonicalEpisode>, StoreError> {
        self.read_table(MAPPED_EPISODES_TABLE).await
    }
}
