//! Mapping run orchestration: snapshots in, canonical tables and reports out.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use podlink_adapters::{
    adapter_for_source, deterministic_snapshot_id_for_bundle, load_snapshot_bundle, SourceRows,
};
use podlink_core::{CanonicalChannel, CanonicalEpisode, Source};
use podlink_resolve::{
    AliasTable, Discrepancy, EntityResolver, ResolutionInput, ResolutionOutcome, ResolverConfig,
    ScorerConfig, SkippedChannel, DEFAULT_MAX_POST_HOURS_DIFF,
};
use podlink_storage::{sha256_hex, ArtifactStore, JsonTableStore, MappingStore};
use serde::Serialize;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "podlink-sync";

const DEFAULT_SYNC_CRON: &str = "0 0 6 * * *";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub artifacts_dir: PathBuf,
    pub aliases_path: PathBuf,
    pub tables_dir: PathBuf,
    pub max_post_hours_diff: u32,
    pub allow_fuzzy_matching: bool,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

impl SyncConfig {
    /// Defaults for a workspace, without consulting the environment.
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            artifacts_dir: workspace_root.join("artifacts"),
            aliases_path: workspace_root.join("config").join("aliases.yaml"),
            tables_dir: workspace_root.join("tables"),
            max_post_hours_diff: DEFAULT_MAX_POST_HOURS_DIFF,
            allow_fuzzy_matching: false,
            scheduler_enabled: false,
            sync_cron: DEFAULT_SYNC_CRON.to_string(),
            workspace_root,
        }
    }

    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the config from a variable lookup. Relative paths other than
    /// `ARTIFACTS_DIR` resolve against `PODLINK_WORKSPACE_ROOT`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let workspace_root = var("PODLINK_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let defaults = Self::for_workspace(&workspace_root);
        Self {
            artifacts_dir: var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            aliases_path: var("PODLINK_ALIASES_PATH")
                .map(|p| workspace_root.join(p))
                .unwrap_or(defaults.aliases_path),
            max_post_hours_diff: var("PODLINK_MAX_POST_HOURS_DIFF")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_POST_HOURS_DIFF),
            allow_fuzzy_matching: var("PODLINK_FUZZY_MATCHING").is_some_and(|v| is_truthy(&v)),
            scheduler_enabled: var("PODLINK_SCHEDULER_ENABLED").is_some_and(|v| is_truthy(&v)),
            sync_cron: var("SYNC_CRON").unwrap_or(defaults.sync_cron),
            tables_dir: defaults.tables_dir,
            workspace_root,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            scorer: ScorerConfig {
                max_post_hours_diff: self.max_post_hours_diff,
                allow_fuzzy_matching: self.allow_fuzzy_matching,
            },
            ..ResolverConfig::default()
        }
    }
}

pub fn load_alias_table(path: &Path) -> Result<AliasTable> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    AliasTable::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub source_id: String,
    pub snapshot_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub content_hash: String,
    pub artifact_path: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub snapshots: Vec<RunSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub canonical_channels: usize,
    pub canonical_episodes: usize,
    pub skipped_channels: usize,
    pub discrepancies: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub struct SyncPipeline {
    config: SyncConfig,
    artifact_store: ArtifactStore,
    store: Arc<dyn MappingStore>,
    resolver: EntityResolver,
}

impl SyncPipeline {
    /// Loads the alias table and writes mappings to JSON tables under
    /// `config.tables_dir` unless another store is supplied.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let aliases = load_alias_table(&config.aliases_path)?;
        info!(
            entries = aliases.len(),
            path = %config.aliases_path.display(),
            "loaded alias table"
        );
        let resolver = EntityResolver::new(aliases, config.resolver_config());
        Ok(Self {
            artifact_store: ArtifactStore::new(config.artifacts_dir.clone()),
            store: Arc::new(JsonTableStore::new(config.tables_dir.clone())),
            resolver,
            config,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn MappingStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, "mapping run started");

        let mut snapshots = Vec::with_capacity(2);
        let (youtube, snapshot) = self.load_source(Source::Youtube).await?;
        snapshots.push(snapshot);
        let (spotify, snapshot) = self.load_source(Source::Spotify).await?;
        snapshots.push(snapshot);

        let input = ResolutionInput {
            youtube_channels: youtube.channels,
            spotify_channels: spotify.channels,
            youtube_episodes: youtube.episodes,
            spotify_episodes: spotify.episodes,
        };
        let outcome = self
            .resolver
            .resolve(&input, started_at)
            .context("resolving canonical channels and episodes")?;

        let write = self
            .store
            .replace_mappings(&outcome.channels, &outcome.episodes)
            .await
            .context("writing mapping tables")?;
        info!(
            %run_id,
            channels = write.channels.written,
            episodes = write.episodes.written,
            "mapping tables replaced"
        );
        if write.channels.rejected_duplicates + write.episodes.rejected_duplicates > 0 {
            warn!(
                channels = write.channels.rejected_duplicates,
                episodes = write.episodes.rejected_duplicates,
                "store rejected duplicate canonical names"
            );
        }

        let finished_at = Utc::now();
        let record = MappingRunRecord {
            run_id,
            started_at,
            finished_at,
            status: "completed".to_string(),
            snapshots,
        };
        let reports_dir = self.write_reports(&record, &outcome).await?;
        let manifest_path = self.export_parquet_snapshots(&reports_dir, &outcome).await?;

        info!(
            %run_id,
            channels = outcome.channels.len(),
            episodes = outcome.episodes.len(),
            skipped = outcome.skipped_channels.len(),
            discrepancies = outcome.discrepancies.len(),
            "mapping run finished"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            canonical_channels: outcome.channels.len(),
            canonical_episodes: outcome.episodes.len(),
            skipped_channels: outcome.skipped_channels.len(),
            discrepancies: outcome.discrepancies.len(),
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        })
    }

    /// Builds a scheduler that runs the pipeline on `sync_cron`, or `None`
    /// when scheduling is disabled. The caller starts it.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        episodes = summary.canonical_episodes,
                        "scheduled mapping run completed"
                    ),
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(error = %message, "scheduled mapping run failed");
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    fn bundle_path_for(&self, source: Source) -> PathBuf {
        self.config
            .workspace_root
            .join("fixtures")
            .join(source.as_str())
            .join("sample")
            .join("bundle.json")
    }

    async fn load_source(&self, source: Source) -> Result<(SourceRows, RunSnapshot)> {
        let adapter = adapter_for_source(source.as_str())
            .with_context(|| format!("no adapter registered for {source}"))?;
        anyhow::ensure!(
            adapter.source() == source,
            "adapter registered for {source} reads {}",
            adapter.source()
        );
        let path = self.bundle_path_for(source);
        let bundle = load_snapshot_bundle(&path)?;
        let rows = adapter
            .parse_snapshot(&bundle)
            .with_context(|| format!("normalizing {}", path.display()))?;

        let raw = fs::read(&path)
            .await
            .with_context(|| format!("reading raw snapshot {}", path.display()))?;
        let stored = self
            .artifact_store
            .store_snapshot(bundle.captured_at, &bundle.source_id, &raw)
            .await?;
        info!(
            source = %source,
            channels = rows.channels.len(),
            episodes = rows.episodes.len(),
            deduplicated = stored.deduplicated,
            "loaded snapshot"
        );

        let snapshot = RunSnapshot {
            source_id: bundle.source_id.clone(),
            snapshot_id: deterministic_snapshot_id_for_bundle(&bundle),
            captured_at: bundle.captured_at,
            content_hash: stored.content_hash,
            artifact_path: stored.relative_path.display().to_string(),
            deduplicated: stored.deduplicated,
        };
        Ok((rows, snapshot))
    }

    async fn write_reports(
        &self,
        record: &MappingRunRecord,
        outcome: &ResolutionOutcome,
    ) -> Result<PathBuf> {
        let reports_dir = self
            .config
            .workspace_root
            .join("reports")
            .join(record.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        fs::write(reports_dir.join("mapping_brief.md"), mapping_brief(record, outcome))
            .await
            .context("writing mapping_brief.md")?;

        let delta_json = serde_json::to_vec_pretty(&serde_json::json!({
            "run": record,
            "channels": outcome.channels,
            "episodes": outcome.episodes,
            "skipped_channels": outcome.skipped_channels,
            "duplicate_episode_names": outcome.duplicate_episode_names,
            "discrepancies": outcome.discrepancies,
            "stats": outcome.stats,
        }))
        .context("serializing mapping delta")?;
        fs::write(reports_dir.join("mapping_delta.json"), delta_json)
            .await
            .context("writing mapping_delta.json")?;

        Ok(reports_dir)
    }

    async fn export_parquet_snapshots(
        &self,
        reports_dir: &Path,
        outcome: &ResolutionOutcome,
    ) -> Result<PathBuf> {
        let snapshot_dir = reports_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let channels_path = snapshot_dir.join("channels.parquet");
        let episodes_path = snapshot_dir.join("episodes.parquet");
        let discrepancies_path = snapshot_dir.join("discrepancies.parquet");
        let skipped_path = snapshot_dir.join("skipped_channels.parquet");

        write_channels_parquet(&channels_path, &outcome.channels)?;
        write_episodes_parquet(&episodes_path, &outcome.episodes)?;
        write_discrepancies_parquet(&discrepancies_path, &outcome.discrepancies)?;
        write_skipped_channels_parquet(&skipped_path, &outcome.skipped_channels)?;

        let manifest = ParquetManifest {
            schema_version: 1,
            files: vec![
                manifest_entry("channels", reports_dir, &channels_path)?,
                manifest_entry("episodes", reports_dir, &episodes_path)?,
                manifest_entry("discrepancies", reports_dir, &discrepancies_path)?,
                manifest_entry("skipped_channels", reports_dir, &skipped_path)?,
            ],
        };

        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest_path)
    }
}

fn mapping_brief(record: &MappingRunRecord, outcome: &ResolutionOutcome) -> String {
    let mut lines = vec![
        "# Podlink Mapping Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", record.run_id),
        format!("- Started: {}", record.started_at),
        format!("- Finished: {}", record.finished_at),
        format!("- Canonical channels: {}", outcome.channels.len()),
        format!("- Canonical episodes: {}", outcome.episodes.len()),
        format!("- Skipped channels: {}", outcome.skipped_channels.len()),
        format!("- Discrepancies: {}", outcome.discrepancies.len()),
        String::new(),
        "## Channels".to_string(),
    ];
    for stats in &outcome.stats {
        lines.push(format!(
            "- {}: {} youtube / {} spotify episodes, {} mapped",
            stats.canonical_name, stats.youtube_episodes, stats.spotify_episodes, stats.mappings
        ));
    }
    if !outcome.skipped_channels.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped Channels".to_string());
        for skipped in &outcome.skipped_channels {
            lines.push(format!(
                "- {} `{}` ({:?})",
                skipped.platform, skipped.display_name, skipped.reason
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;
    pipeline.run_once().await
}

/// Runs the pipeline on its cron schedule until ctrl-c.
pub async fn run_scheduler_from_env() -> Result<()> {
    let pipeline = Arc::new(SyncPipeline::new(SyncConfig::from_env())?);
    let mut sched = pipeline
        .maybe_build_scheduler()
        .await?
        .context("scheduler disabled; set PODLINK_SCHEDULER_ENABLED=1")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %pipeline.config().sync_cron, "scheduler started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    info!("scheduler stopped");
    Ok(())
}

pub fn report_recent_runs_markdown(runs: usize, workspace_root: Option<PathBuf>) -> Result<String> {
    let root = workspace_root.unwrap_or_else(|| PathBuf::from("."));
    let reports_root = root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Podlink Recent Runs".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join("mapping_delta.json");
        let brief_path = dir.path().join("mapping_brief.md");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;
        let count = |key: &str| {
            delta
                .get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0)
        };

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- channels: {}", count("channels")));
        lines.push(format!("- episodes: {}", count("episodes")));
        lines.push(format!("- skipped channels: {}", count("skipped_channels")));
        lines.push(format!("- discrepancies: {}", count("discrepancies")));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        if brief_path.exists() {
            lines.push(format!("- mapping brief: `{}`", brief_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn utf8_column<'a>(values: impl Iterator<Item = &'a str>) -> StringArray {
    StringArray::from(values.map(Some).collect::<Vec<_>>())
}

fn write_channels_parquet(path: &Path, channels: &[CanonicalChannel]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("canonical_name", DataType::Utf8, false),
        ArrowField::new("channel_id", DataType::Utf8, false),
        ArrowField::new("youtube_channel_id", DataType::Utf8, false),
        ArrowField::new("spotify_show_id", DataType::Utf8, false),
        ArrowField::new("youtube_episode_count", DataType::UInt32, false),
        ArrowField::new("spotify_episode_count", DataType::UInt32, false),
        ArrowField::new("last_updated", DataType::Utf8, false),
    ]));

    let ids = channels.iter().map(|c| c.id.to_string()).collect::<Vec<_>>();
    let last_updated = channels
        .iter()
        .map(|c| c.last_updated.to_rfc3339())
        .collect::<Vec<_>>();
    let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8_column(channels.iter().map(|c| c.canonical_name.as_str()))),
            Arc::new(utf8_column(ids.iter().map(String::as_str))),
            Arc::new(utf8_column(channels.iter().map(|c| c.youtube.source_id.as_str()))),
            Arc::new(utf8_column(channels.iter().map(|c| c.spotify.source_id.as_str()))),
            Arc::new(UInt32Array::from(
                channels
                    .iter()
                    .map(|c| count(c.youtube.episode_ids.len()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                channels
                    .iter()
                    .map(|c| count(c.spotify.episode_ids.len()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(utf8_column(last_updated.iter().map(String::as_str))),
        ],
    )
    .context("building channels record batch")?;
    write_parquet(path, batch)
}

fn write_episodes_parquet(path: &Path, episodes: &[CanonicalEpisode]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("canonical_name", DataType::Utf8, false),
        ArrowField::new("episode_id", DataType::Utf8, false),
        ArrowField::new("parent_channel_name", DataType::Utf8, false),
        ArrowField::new("youtube_video_id", DataType::Utf8, false),
        ArrowField::new("spotify_episode_id", DataType::Utf8, false),
        ArrowField::new("canonical_description", DataType::Utf8, false),
    ]));

    let ids = episodes.iter().map(|e| e.id.to_string()).collect::<Vec<_>>();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8_column(episodes.iter().map(|e| e.canonical_name.as_str()))),
            Arc::new(utf8_column(ids.iter().map(String::as_str))),
            Arc::new(utf8_column(episodes.iter().map(|e| e.parent_channel_name.as_str()))),
            Arc::new(utf8_column(
                episodes
                    .iter()
                    .map(|e| e.youtube_episode.source_episode_id.as_str()),
            )),
            Arc::new(utf8_column(
                episodes
                    .iter()
                    .map(|e| e.spotify_episode.source_episode_id.as_str()),
            )),
            Arc::new(utf8_column(episodes.iter().map(|e| e.canonical_description.as_str()))),
        ],
    )
    .context("building episodes record batch")?;
    write_parquet(path, batch)
}

fn write_discrepancies_parquet(path: &Path, discrepancies: &[Discrepancy]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("scope", DataType::Utf8, false),
        ArrowField::new("field", DataType::Utf8, false),
        ArrowField::new("youtube_value", DataType::Utf8, false),
        ArrowField::new("spotify_value", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8_column(discrepancies.iter().map(|d| d.scope.as_str()))),
            Arc::new(utf8_column(discrepancies.iter().map(|d| d.field.as_str()))),
            Arc::new(utf8_column(discrepancies.iter().map(|d| d.youtube_value.as_str()))),
            Arc::new(utf8_column(discrepancies.iter().map(|d| d.spotify_value.as_str()))),
        ],
    )
    .context("building discrepancies record batch")?;
    write_parquet(path, batch)
}

fn write_skipped_channels_parquet(path: &Path, skipped: &[SkippedChannel]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("platform", DataType::Utf8, false),
        ArrowField::new("source_channel_id", DataType::Utf8, false),
        ArrowField::new("display_name", DataType::Utf8, false),
        ArrowField::new("reason", DataType::Utf8, false),
    ]));
    let reasons = skipped
        .iter()
        .map(|s| format!("{:?}", s.reason).to_ascii_lowercase())
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(utf8_column(skipped.iter().map(|s| s.platform.as_str()))),
            Arc::new(utf8_column(skipped.iter().map(|s| s.source_channel_id.as_str()))),
            Arc::new(utf8_column(skipped.iter().map(|s| s.display_name.as_str()))),
            Arc::new(utf8_column(reasons.iter().map(String::as_str))),
        ],
    )
    .context("building skipped_channels record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
