//! Cross-source entity resolution: candidate scoring, alias-driven channel
//! consolidation, mutual-best episode matching and discrepancy tracking.
//!
//! Everything in here is synchronous and pure over in-memory rows. Loading and
//! persisting happen in `podlink-sync`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use podlink_core::{
    canonical_channel_id, canonical_episode_id, CanonicalChannel, CanonicalEpisode, ChannelRow,
    EpisodeRef, EpisodeRow, MalformedRecordError, Source, SourceRef,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

pub const CRATE_NAME: &str = "podlink-resolve";

pub const DEFAULT_MAX_POST_HOURS_DIFF: u32 = 24;
pub const DEFAULT_MAX_ALIAS_ENTRIES: usize = 1024;
pub const ALIAS_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub youtube: String,
    pub spotify: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasTableConfig {
    pub max_entries: usize,
    pub case_sensitive: bool,
}

impl Default for AliasTableConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ALIAS_ENTRIES,
            case_sensitive: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum AliasTableError {
    #[error("alias table has {count} entries, more than the configured maximum of {max}")]
    TooManyEntries { count: usize, max: usize },
    #[error("youtube channel `{0}` is aliased more than once")]
    DuplicateYoutube(String),
    #[error("spotify show `{0}` is aliased more than once")]
    DuplicateSpotify(String),
    #[error("alias table version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("parsing alias table")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct AliasFile {
    version: u32,
    #[serde(default = "default_max_entries")]
    max_entries: usize,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
    #[serde(default)]
    aliases: Vec<AliasEntry>,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ALIAS_ENTRIES
}

fn default_case_sensitive() -> bool {
    true
}

/// Static pairing of YouTube channel titles with Spotify show names. The
/// Spotify side of an entry is the canonical channel name.
#[derive(Debug, Clone)]
pub struct AliasTable {
    config: AliasTableConfig,
    by_youtube: BTreeMap<String, AliasEntry>,
    by_spotify: BTreeMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn new(entries: Vec<AliasEntry>, config: AliasTableConfig) -> Result<Self, AliasTableError> {
        if entries.len() > config.max_entries {
            return Err(AliasTableError::TooManyEntries {
                count: entries.len(),
                max: config.max_entries,
            });
        }

        let mut table = Self {
            config,
            by_youtube: BTreeMap::new(),
            by_spotify: BTreeMap::new(),
        };
        for entry in entries {
            let youtube_key = table.key(&entry.youtube);
            let spotify_key = table.key(&entry.spotify);
            if table.by_youtube.contains_key(&youtube_key) {
                return Err(AliasTableError::DuplicateYoutube(entry.youtube));
            }
            if table.by_spotify.contains_key(&spotify_key) {
                return Err(AliasTableError::DuplicateSpotify(entry.spotify));
            }
            table.by_youtube.insert(youtube_key, entry.clone());
            table.by_spotify.insert(spotify_key, entry);
        }
        Ok(table)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AliasTableError> {
        let file: AliasFile = serde_yaml::from_str(text)?;
        if file.version != ALIAS_FILE_VERSION {
            return Err(AliasTableError::UnsupportedVersion(file.version));
        }
        Self::new(
            file.aliases,
            AliasTableConfig {
                max_entries: file.max_entries,
                case_sensitive: file.case_sensitive,
            },
        )
    }

    pub fn config(&self) -> AliasTableConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.by_youtube.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_youtube.is_empty()
    }

    fn key(&self, name: &str) -> String {
        if self.config.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    fn entry_for(&self, source: Source, display_name: &str) -> Option<&AliasEntry> {
        let key = self.key(display_name);
        match source {
            Source::Youtube => self.by_youtube.get(&key),
            Source::Spotify => self.by_spotify.get(&key),
        }
    }

    pub fn spotify_name_for(&self, youtube_name: &str) -> Option<&str> {
        self.entry_for(Source::Youtube, youtube_name)
            .map(|e| e.spotify.as_str())
    }

    pub fn youtube_name_for(&self, spotify_name: &str) -> Option<&str> {
        self.entry_for(Source::Spotify, spotify_name)
            .map(|e| e.youtube.as_str())
    }

    /// Canonical name for a channel as named by `source`.
    pub fn canonical_name(&self, source: Source, display_name: &str) -> Result<&str, ConsolidationError> {
        self.entry_for(source, display_name)
            .map(|e| e.spotify.as_str())
            .ok_or_else(|| ConsolidationError::UnmappedChannel {
                platform: source,
                display_name: display_name.to_string(),
            })
    }

    pub fn names_are_aliases(&self, youtube_name: &str, spotify_name: &str) -> bool {
        self.entry_for(Source::Youtube, youtube_name)
            .is_some_and(|e| self.key(&e.spotify) == self.key(spotify_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Fuzzy,
}

/// Outcome of comparing one YouTube episode with one Spotify episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchDecision {
    ExactAccept,
    ExactReject,
    ExactUndetermined,
    /// Sum of the fuzzy signals, in `[0, 3]`. Zero means "reject".
    FuzzyScore(f64),
}

impl MatchDecision {
    pub fn tier(&self) -> MatchTier {
        match self {
            MatchDecision::FuzzyScore(_) => MatchTier::Fuzzy,
            _ => MatchTier::Exact,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            MatchDecision::ExactAccept => 1.0,
            MatchDecision::ExactReject => -1.0,
            MatchDecision::ExactUndetermined => 0.0,
            MatchDecision::FuzzyScore(score) => *score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScorerConfig {
    pub max_post_hours_diff: u32,
    pub allow_fuzzy_matching: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            max_post_hours_diff: DEFAULT_MAX_POST_HOURS_DIFF,
            allow_fuzzy_matching: false,
        }
    }
}

pub trait PairScorer {
    fn score(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> MatchDecision;
}

#[derive(Debug, Clone, Default)]
pub struct CandidateScorer {
    config: ScorerConfig,
    aliases: Option<Arc<AliasTable>>,
}

impl CandidateScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            aliases: None,
        }
    }

    /// Lets the channel-name predicate accept names paired in `aliases` on top
    /// of literal equality.
    pub fn with_aliases(mut self, aliases: Arc<AliasTable>) -> Self {
        self.aliases = Some(aliases);
        self
    }

    pub fn config(&self) -> ScorerConfig {
        self.config
    }

    pub fn posted_within_window(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> bool {
        youtube.published_at.hours_between(&spotify.published_at)
            <= f64::from(self.config.max_post_hours_diff)
    }

    pub fn titles_match(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> bool {
        youtube.display_name == spotify.display_name
    }

    pub fn channel_names_match(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> bool {
        youtube.channel_name == spotify.channel_name
            || self
                .aliases
                .as_ref()
                .is_some_and(|a| a.names_are_aliases(&youtube.channel_name, &spotify.channel_name))
    }

    /// Literal comparison; no whitespace or case normalization.
    pub fn descriptions_match(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> bool {
        youtube.description == spotify.description
    }

    /// Temporal gate followed by the title + channel-name check.
    pub fn exact_decision(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> MatchDecision {
        if !self.posted_within_window(youtube, spotify) {
            return MatchDecision::ExactReject;
        }
        if self.channel_names_match(youtube, spotify) && self.titles_match(youtube, spotify) {
            return MatchDecision::ExactAccept;
        }
        MatchDecision::ExactUndetermined
    }

    /// All three signals must agree; any zero signal forces the sum to zero.
    pub fn fuzzy_score(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> f64 {
        let signals = [
            self.titles_match(youtube, spotify),
            self.channel_names_match(youtube, spotify),
            self.descriptions_match(youtube, spotify),
        ];
        if signals.iter().any(|s| !s) {
            return 0.0;
        }
        signals.len() as f64
    }
}

impl PairScorer for CandidateScorer {
    fn score(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> MatchDecision {
        match self.exact_decision(youtube, spotify) {
            MatchDecision::ExactUndetermined if self.config.allow_fuzzy_matching => {
                MatchDecision::FuzzyScore(self.fuzzy_score(youtube, spotify))
            }
            MatchDecision::ExactUndetermined => MatchDecision::FuzzyScore(0.0),
            decided => decided,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub scope: String,
    pub field: String,
    pub youtube_value: String,
    pub spotify_value: String,
}

/// Collects cross-source field conflicts. Spotify wins every conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscrepancyLog {
    entries: Vec<Discrepancy>,
}

impl DiscrepancyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, scope: &str, field: &str, youtube_value: &str, spotify_value: &str) -> String {
        if youtube_value != spotify_value {
            info!(
                scope,
                field,
                youtube_value,
                spotify_value,
                "cross-source field conflict; keeping spotify value"
            );
            self.entries.push(Discrepancy {
                scope: scope.to_string(),
                field: field.to_string(),
                youtube_value: youtube_value.to_string(),
                spotify_value: spotify_value.to_string(),
            });
        }
        spotify_value.to_string()
    }

    pub fn entries(&self) -> &[Discrepancy] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Discrepancy> {
        self.entries
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsolidationError {
    #[error("no alias entry for {platform} channel `{display_name}`")]
    UnmappedChannel { platform: Source, display_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unmapped,
    Unpaired,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChannel {
    pub platform: Source,
    pub source_channel_id: String,
    pub display_name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consolidation {
    pub channels: Vec<CanonicalChannel>,
    pub skipped: Vec<SkippedChannel>,
}

/// Pairs channels across sources through the alias table. Channels without an
/// alias entry, or without a counterpart in the other source, are skipped.
/// Episode ids are attached separately with [`attach_episode_ids`].
pub fn consolidate_channels(
    youtube_channels: &[ChannelRow],
    spotify_channels: &[ChannelRow],
    aliases: &AliasTable,
    synced_at: DateTime<Utc>,
) -> Consolidation {
    let mut skipped = Vec::new();
    let youtube_side = resolve_side(Source::Youtube, youtube_channels, aliases, &mut skipped);
    let mut spotify_side = resolve_side(Source::Spotify, spotify_channels, aliases, &mut skipped);

    let mut channels = Vec::new();
    for (canonical_name, youtube) in youtube_side {
        let Some(spotify) = spotify_side.remove(&canonical_name) else {
            debug!(channel = %canonical_name, "no spotify counterpart; dropping channel");
            skipped.push(skipped_channel(Source::Youtube, youtube, SkipReason::Unpaired));
            continue;
        };
        channels.push(CanonicalChannel {
            id: canonical_channel_id(&canonical_name),
            canonical_name,
            youtube: source_ref(youtube),
            spotify: source_ref(spotify),
            last_updated: synced_at,
        });
    }
    for (canonical_name, spotify) in spotify_side {
        debug!(channel = %canonical_name, "no youtube counterpart; dropping channel");
        skipped.push(skipped_channel(Source::Spotify, spotify, SkipReason::Unpaired));
    }

    Consolidation { channels, skipped }
}

fn resolve_side<'r>(
    platform: Source,
    rows: &'r [ChannelRow],
    aliases: &AliasTable,
    skipped: &mut Vec<SkippedChannel>,
) -> BTreeMap<String, &'r ChannelRow> {
    let mut side = BTreeMap::new();
    for row in rows {
        match aliases.canonical_name(platform, &row.display_name) {
            Ok(canonical_name) => {
                if side.contains_key(canonical_name) {
                    warn!(
                        %platform,
                        channel_id = %row.source_channel_id,
                        canonical_name,
                        "duplicate channel row for canonical name; keeping the first"
                    );
                    skipped.push(skipped_channel(platform, row, SkipReason::Duplicate));
                    continue;
                }
                side.insert(canonical_name.to_string(), row);
            }
            Err(err) => {
                warn!(channel_id = %row.source_channel_id, %err, "skipping unmapped channel");
                skipped.push(skipped_channel(platform, row, SkipReason::Unmapped));
            }
        }
    }
    side
}

fn source_ref(row: &ChannelRow) -> SourceRef {
    SourceRef {
        source_id: row.source_channel_id.clone(),
        display_name: row.display_name.clone(),
        episode_ids: BTreeSet::new(),
    }
}

fn skipped_channel(platform: Source, row: &ChannelRow, reason: SkipReason) -> SkippedChannel {
    SkippedChannel {
        platform,
        source_channel_id: row.source_channel_id.clone(),
        display_name: row.display_name.clone(),
        reason,
    }
}

/// Groups episode ids by the channel they belong to.
pub fn index_episode_ids(episodes: &[EpisodeRow]) -> BTreeMap<String, BTreeSet<String>> {
    let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in episodes {
        index
            .entry(row.source_channel_id.clone())
            .or_default()
            .insert(row.source_episode_id.clone());
    }
    index
}

pub fn attach_episode_ids(
    channels: &mut [CanonicalChannel],
    youtube_index: &BTreeMap<String, BTreeSet<String>>,
    spotify_index: &BTreeMap<String, BTreeSet<String>>,
) {
    for channel in channels {
        channel.youtube.episode_ids = youtube_index
            .get(&channel.youtube.source_id)
            .cloned()
            .unwrap_or_default();
        channel.spotify.episode_ids = spotify_index
            .get(&channel.spotify.source_id)
            .cloned()
            .unwrap_or_default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub canonical_name: String,
    pub youtube_episodes: usize,
    pub spotify_episodes: usize,
    pub mappings: usize,
}

/// Best candidate per episode, by index into the opposite pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestCandidates {
    pub youtube_to_spotify: Vec<Option<usize>>,
    pub spotify_to_youtube: Vec<Option<usize>>,
}

impl BestCandidates {
    /// Pairs where each side is the other's best candidate.
    pub fn mutual_pairs(&self) -> Vec<(usize, usize)> {
        self.youtube_to_spotify
            .iter()
            .enumerate()
            .filter_map(|(y, best)| {
                let s = (*best)?;
                (self.spotify_to_youtube.get(s).copied().flatten() == Some(y)).then_some((y, s))
            })
            .collect()
    }
}

pub struct EpisodeMatcher<S> {
    scorer: S,
}

impl<S: PairScorer> EpisodeMatcher<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn best_spotify_for_youtube(&self, youtube: &[EpisodeRef], spotify: &[EpisodeRef]) -> Vec<Option<usize>> {
        youtube
            .iter()
            .map(|y| best_candidate(spotify.len(), |s| self.scorer.score(y, &spotify[s])))
            .collect()
    }

    pub fn best_youtube_for_spotify(&self, youtube: &[EpisodeRef], spotify: &[EpisodeRef]) -> Vec<Option<usize>> {
        spotify
            .iter()
            .map(|s| best_candidate(youtube.len(), |y| self.scorer.score(&youtube[y], s)))
            .collect()
    }

    pub fn best_candidates(&self, youtube: &[EpisodeRef], spotify: &[EpisodeRef]) -> BestCandidates {
        BestCandidates {
            youtube_to_spotify: self.best_spotify_for_youtube(youtube, spotify),
            spotify_to_youtube: self.best_youtube_for_spotify(youtube, spotify),
        }
    }

    /// Matches one canonical channel's episode pools 1:1. Only mutual best
    /// candidates become canonical episodes; names and descriptions come from
    /// Spotify, with YouTube differences recorded in `log`.
    pub fn match_episodes(
        &self,
        channel: &CanonicalChannel,
        youtube: &[EpisodeRef],
        spotify: &[EpisodeRef],
        log: &mut DiscrepancyLog,
    ) -> Vec<CanonicalEpisode> {
        if youtube.is_empty() || spotify.is_empty() {
            return Vec::new();
        }

        let pairs = self.best_candidates(youtube, spotify).mutual_pairs();
        let episodes = pairs
            .into_iter()
            .map(|(y, s)| hydrate_episode(channel, &youtube[y], &spotify[s], log))
            .collect::<Vec<_>>();

        info!(
            channel = %channel.canonical_name,
            youtube_episodes = youtube.len(),
            spotify_episodes = spotify.len(),
            mappings = episodes.len(),
            "matched channel episodes"
        );
        episodes
    }
}

/// Scans candidates `0..count` in order. An exact accept wins immediately,
/// exact rejects are skipped, otherwise the first strictly highest positive
/// fuzzy score wins. Only the candidate that produced the winning decision is
/// ever recorded.
fn best_candidate(count: usize, mut score: impl FnMut(usize) -> MatchDecision) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for candidate in 0..count {
        match score(candidate) {
            MatchDecision::ExactAccept => return Some(candidate),
            MatchDecision::ExactReject | MatchDecision::ExactUndetermined => continue,
            MatchDecision::FuzzyScore(value) => {
                if value > 0.0 && best.map_or(true, |(_, top)| value > top) {
                    best = Some((candidate, value));
                }
            }
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn hydrate_episode(
    channel: &CanonicalChannel,
    youtube: &EpisodeRef,
    spotify: &EpisodeRef,
    log: &mut DiscrepancyLog,
) -> CanonicalEpisode {
    let scope = format!(
        "episode:{}:{}",
        youtube.source_episode_id, spotify.source_episode_id
    );
    let canonical_name = log.report(&scope, "name", &youtube.display_name, &spotify.display_name);
    let canonical_description =
        log.report(&scope, "description", &youtube.description, &spotify.description);
    CanonicalEpisode {
        id: canonical_episode_id(
            &channel.canonical_name,
            &youtube.source_episode_id,
            &spotify.source_episode_id,
        ),
        canonical_name,
        parent_channel_name: channel.canonical_name.clone(),
        canonical_description,
        youtube_episode: youtube.clone(),
        spotify_episode: spotify.clone(),
    }
}

/// One snapshot of raw rows from both catalogs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionInput {
    pub youtube_channels: Vec<ChannelRow>,
    pub spotify_channels: Vec<ChannelRow>,
    pub youtube_episodes: Vec<EpisodeRow>,
    pub spotify_episodes: Vec<EpisodeRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionOutcome {
    pub channels: Vec<CanonicalChannel>,
    pub episodes: Vec<CanonicalEpisode>,
    pub skipped_channels: Vec<SkippedChannel>,
    pub duplicate_episode_names: Vec<String>,
    pub discrepancies: Vec<Discrepancy>,
    pub stats: Vec<MatchStats>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed record in channel `{channel}`")]
    MalformedRecord {
        channel: String,
        #[source]
        error: MalformedRecordError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub scorer: ScorerConfig,
    pub alias_aware_channel_names: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scorer: ScorerConfig::default(),
            alias_aware_channel_names: true,
        }
    }
}

pub struct EntityResolver {
    aliases: Arc<AliasTable>,
    matcher: EpisodeMatcher<CandidateScorer>,
}

impl EntityResolver {
    pub fn new(aliases: AliasTable, config: ResolverConfig) -> Self {
        let aliases = Arc::new(aliases);
        let mut scorer = CandidateScorer::new(config.scorer);
        if config.alias_aware_channel_names {
            scorer = scorer.with_aliases(Arc::clone(&aliases));
        }
        Self {
            aliases,
            matcher: EpisodeMatcher::new(scorer),
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Consolidates channels then matches every canonical channel's episodes.
    /// A malformed episode row aborts the run and names the channel it was in.
    pub fn resolve(
        &self,
        input: &ResolutionInput,
        synced_at: DateTime<Utc>,
    ) -> Result<ResolutionOutcome, ResolveError> {
        let mut log = DiscrepancyLog::new();
        let Consolidation {
            mut channels,
            skipped,
        } = consolidate_channels(
            &input.youtube_channels,
            &input.spotify_channels,
            &self.aliases,
            synced_at,
        );
        attach_episode_ids(
            &mut channels,
            &index_episode_ids(&input.youtube_episodes),
            &index_episode_ids(&input.spotify_episodes),
        );

        let youtube_rows = rows_by_channel(&input.youtube_episodes);
        let spotify_rows = rows_by_channel(&input.spotify_episodes);

        let mut episodes = Vec::new();
        let mut seen_names = HashSet::new();
        let mut duplicate_episode_names = Vec::new();
        let mut stats = Vec::with_capacity(channels.len());

        for channel in &channels {
            let span = info_span!("resolve_channel", channel = %channel.canonical_name);
            let _guard = span.enter();

            log.report(
                &format!("channel:{}", channel.canonical_name),
                "display_name",
                &channel.youtube.display_name,
                &channel.spotify.display_name,
            );

            let youtube = hydrate_pool(Source::Youtube, channel, &youtube_rows)?;
            let spotify = hydrate_pool(Source::Spotify, channel, &spotify_rows)?;
            let matched = self.matcher.match_episodes(channel, &youtube, &spotify, &mut log);

            stats.push(MatchStats {
                canonical_name: channel.canonical_name.clone(),
                youtube_episodes: youtube.len(),
                spotify_episodes: spotify.len(),
                mappings: matched.len(),
            });

            for episode in matched {
                if !seen_names.insert(episode.canonical_name.clone()) {
                    warn!(
                        name = %episode.canonical_name,
                        "canonical episode name already taken this run; dropping later mapping"
                    );
                    duplicate_episode_names.push(episode.canonical_name);
                    continue;
                }
                episodes.push(episode);
            }
        }

        info!(
            channels = channels.len(),
            episodes = episodes.len(),
            skipped_channels = skipped.len(),
            discrepancies = log.len(),
            "resolution complete"
        );

        Ok(ResolutionOutcome {
            channels,
            episodes,
            skipped_channels: skipped,
            duplicate_episode_names,
            discrepancies: log.into_entries(),
            stats,
        })
    }
}

fn rows_by_channel(rows: &[EpisodeRow]) -> HashMap<&str, Vec<&EpisodeRow>> {
    let mut by_channel: HashMap<&str, Vec<&EpisodeRow>> = HashMap::new();
    for row in rows {
        by_channel
            .entry(row.source_channel_id.as_str())
            .or_default()
            .push(row);
    }
    by_channel
}

fn hydrate_pool(
    platform: Source,
    channel: &CanonicalChannel,
    rows: &HashMap<&str, Vec<&EpisodeRow>>,
) -> Result<Vec<EpisodeRef>, ResolveError> {
    let source_ref = channel.source_ref(platform);
    let Some(rows) = rows.get(source_ref.source_id.as_str()) else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            EpisodeRef::from_row(platform, row).map_err(|error| ResolveError::MalformedRecord {
                channel: channel.canonical_name.clone(),
                error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use podlink_core::PublishedAt;
    use std::cell::RefCell;

    fn ts(value: &str) -> PublishedAt {
        PublishedAt::parse(value, None).expect("timestamp")
    }

    fn episode(id: &str, channel: &str, title: &str, description: &str, published: &str) -> EpisodeRef {
        EpisodeRef {
            source_episode_id: id.to_string(),
            source_channel_id: format!("{channel}-id"),
            channel_name: channel.to_string(),
            display_name: title.to_string(),
            description: description.to_string(),
            published_at: ts(published),
        }
    }

    fn synced_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 6, 0, 0).single().unwrap()
    }

    fn aliases() -> AliasTable {
        AliasTable::new(
            vec![
                AliasEntry {
                    youtube: "Andrew Huberman".into(),
                    spotify: "Huberman Lab".into(),
                },
                AliasEntry {
                    youtube: "Lex Fridman".into(),
                    spotify: "Lex Fridman Podcast".into(),
                },
            ],
            AliasTableConfig::default(),
        )
        .unwrap()
    }

    fn channel_row(id: &str, name: &str) -> ChannelRow {
        ChannelRow {
            source_channel_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn episode_row(id: &str, channel_id: &str, channel: &str, title: &str, published: Option<&str>) -> EpisodeRow {
        EpisodeRow {
            source_episode_id: id.to_string(),
            source_channel_id: channel_id.to_string(),
            channel_name: Some(channel.to_string()),
            title: Some(title.to_string()),
            description: Some(format!("{title} notes")),
            published_at: published.map(str::to_string),
            published_at_precision: None,
        }
    }

    /// Scorer driven by a fixed decision table that records every call.
    struct ScriptedScorer {
        decisions: HashMap<(String, String), MatchDecision>,
        calls: RefCell<Vec<(String, String)>>,
    }

    impl ScriptedScorer {
        fn new(decisions: &[(&str, &str, MatchDecision)]) -> Self {
            Self {
                decisions: decisions
                    .iter()
                    .map(|(y, s, d)| ((y.to_string(), s.to_string()), *d))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PairScorer for ScriptedScorer {
        fn score(&self, youtube: &EpisodeRef, spotify: &EpisodeRef) -> MatchDecision {
            let key = (
                youtube.source_episode_id.clone(),
                spotify.source_episode_id.clone(),
            );
            self.calls.borrow_mut().push(key.clone());
            self.decisions
                .get(&key)
                .copied()
                .unwrap_or(MatchDecision::FuzzyScore(0.0))
        }
    }

    fn pool(ids: &[&str]) -> Vec<EpisodeRef> {
        ids.iter()
            .map(|id| episode(id, "X", id, "", "2024-01-01T00:00:00Z"))
            .collect()
    }

    #[test]
    fn date_only_counterpart_is_exact_accept() {
        let scorer = CandidateScorer::new(ScorerConfig::default());
        let youtube = episode("yt-1", "X", "Ep1", "", "2024-01-01T00:00:00Z");
        let spotify = episode("sp-1", "X", "Ep1", "", "2024-01-01");
        assert_eq!(scorer.score(&youtube, &spotify), MatchDecision::ExactAccept);
    }

    #[test]
    fn temporal_gate_rejects_regardless_of_content() {
        let scorer = CandidateScorer::new(ScorerConfig {
            allow_fuzzy_matching: true,
            ..ScorerConfig::default()
        });
        let youtube = episode("yt-1", "X", "Ep1", "same", "2024-01-01T00:00:00Z");
        let ten_days = episode("sp-1", "X", "Ep1", "same", "2024-01-11");
        let nineteen_days = episode("sp-2", "X", "Ep1", "same", "2024-01-20");
        for spotify in [&ten_days, &nineteen_days] {
            let decision = scorer.score(&youtube, spotify);
            assert_eq!(decision, MatchDecision::ExactReject);
            assert_eq!(decision.tier(), MatchTier::Exact);
            assert_eq!(decision.value(), -1.0);
        }
    }

    #[test]
    fn temporal_window_is_inclusive_and_configurable() {
        let youtube = episode("yt-1", "X", "Ep1", "", "2024-01-02T00:00:00Z");
        let spotify = episode("sp-1", "X", "Ep1", "", "2024-01-01");
        let default = CandidateScorer::new(ScorerConfig::default());
        assert_eq!(default.score(&youtube, &spotify), MatchDecision::ExactAccept);

        let tight = CandidateScorer::new(ScorerConfig {
            max_post_hours_diff: 12,
            allow_fuzzy_matching: false,
        });
        assert_eq!(tight.score(&youtube, &spotify), MatchDecision::ExactReject);
    }

    #[test]
    fn fuzzy_is_all_or_nothing() {
        let scorer = CandidateScorer::new(ScorerConfig {
            allow_fuzzy_matching: true,
            ..ScorerConfig::default()
        });
        let youtube = episode("yt-1", "X", "Ep1", "video cut", "2024-01-01T00:00:00Z");
        let spotify = episode("sp-1", "X", "Ep1", "audio cut", "2024-01-01");
        assert_eq!(scorer.fuzzy_score(&youtube, &spotify), 0.0);

        let same = episode("sp-2", "X", "Ep1", "video cut", "2024-01-01");
        assert_eq!(scorer.fuzzy_score(&youtube, &same), 3.0);
    }

    #[test]
    fn undetermined_pairs_score_fuzzy_zero() {
        let youtube = episode("yt-1", "X", "Ep1", "", "2024-01-01T00:00:00Z");
        let spotify = episode("sp-1", "X", "Episode 1", "", "2024-01-01");

        let strict = CandidateScorer::new(ScorerConfig::default());
        assert_eq!(strict.exact_decision(&youtube, &spotify), MatchDecision::ExactUndetermined);
        assert_eq!(strict.score(&youtube, &spotify), MatchDecision::FuzzyScore(0.0));

        let fuzzy = CandidateScorer::new(ScorerConfig {
            allow_fuzzy_matching: true,
            ..ScorerConfig::default()
        });
        let decision = fuzzy.score(&youtube, &spotify);
        assert_eq!(decision, MatchDecision::FuzzyScore(0.0));
        assert_eq!(decision.tier(), MatchTier::Fuzzy);
    }

    #[test]
    fn titles_and_channel_names_compare_case_sensitively() {
        let scorer = CandidateScorer::new(ScorerConfig::default());
        let youtube = episode("yt-1", "X", "Ep1", "", "2024-01-01T00:00:00Z");
        let lower_title = episode("sp-1", "X", "ep1", "", "2024-01-01");
        let lower_channel = episode("sp-2", "x", "Ep1", "", "2024-01-01");
        assert_eq!(scorer.exact_decision(&youtube, &lower_title), MatchDecision::ExactUndetermined);
        assert_eq!(scorer.exact_decision(&youtube, &lower_channel), MatchDecision::ExactUndetermined);
    }

    #[test]
    fn aliased_channel_names_count_as_matching_when_enabled() {
        let youtube = episode("yt-1", "Andrew Huberman", "Sleep", "", "2024-01-01T00:00:00Z");
        let spotify = episode("sp-1", "Huberman Lab", "Sleep", "", "2024-01-01");

        let literal = CandidateScorer::new(ScorerConfig::default());
        assert_eq!(literal.score(&youtube, &spotify), MatchDecision::FuzzyScore(0.0));

        let aliased = CandidateScorer::new(ScorerConfig::default()).with_aliases(Arc::new(aliases()));
        assert_eq!(aliased.score(&youtube, &spotify), MatchDecision::ExactAccept);
    }

    #[test]
    fn exact_accept_short_circuits_the_scan() {
        let scorer = ScriptedScorer::new(&[
            ("a1", "b1", MatchDecision::ExactAccept),
            ("a1", "b2", MatchDecision::ExactAccept),
            ("a1", "b3", MatchDecision::FuzzyScore(3.0)),
        ]);
        let matcher = EpisodeMatcher::new(scorer);
        let best = matcher.best_spotify_for_youtube(&pool(&["a1"]), &pool(&["b1", "b2", "b3"]));
        assert_eq!(best, vec![Some(0)]);
        assert_eq!(
            matcher.scorer().calls.borrow().as_slice(),
            &[("a1".to_string(), "b1".to_string())]
        );
    }

    #[test]
    fn reverse_scan_keeps_the_actual_best_not_the_last_seen() {
        let scorer = ScriptedScorer::new(&[
            ("a1", "b1", MatchDecision::FuzzyScore(3.0)),
            ("a2", "b1", MatchDecision::ExactReject),
            ("a3", "b1", MatchDecision::FuzzyScore(0.0)),
            ("a1", "b2", MatchDecision::ExactReject),
            ("a2", "b2", MatchDecision::ExactReject),
            ("a3", "b2", MatchDecision::ExactReject),
        ]);
        let matcher = EpisodeMatcher::new(scorer);
        let best = matcher.best_youtube_for_spotify(&pool(&["a1", "a2", "a3"]), &pool(&["b1", "b2"]));
        assert_eq!(best, vec![Some(0), None]);
    }

    #[test]
    fn fuzzy_ties_go_to_the_first_candidate_seen() {
        let scorer = ScriptedScorer::new(&[
            ("a1", "b1", MatchDecision::FuzzyScore(2.0)),
            ("a1", "b2", MatchDecision::FuzzyScore(3.0)),
            ("a1", "b3", MatchDecision::FuzzyScore(3.0)),
        ]);
        let matcher = EpisodeMatcher::new(scorer);
        let best = matcher.best_spotify_for_youtube(&pool(&["a1"]), &pool(&["b1", "b2", "b3"]));
        assert_eq!(best, vec![Some(1)]);
    }

    #[test]
    fn popular_episode_is_only_claimed_by_its_mutual_best() {
        // a1 and a2 both pick b1, but b1 prefers a2 (exact beats fuzzy).
        let scorer = ScriptedScorer::new(&[
            ("a1", "b1", MatchDecision::FuzzyScore(3.0)),
            ("a2", "b1", MatchDecision::ExactAccept),
        ]);
        let matcher = EpisodeMatcher::new(scorer);
        let youtube = pool(&["a1", "a2"]);
        let spotify = pool(&["b1"]);
        let best = matcher.best_candidates(&youtube, &spotify);
        assert_eq!(best.youtube_to_spotify, vec![Some(0), Some(0)]);
        assert_eq!(best.spotify_to_youtube, vec![Some(1)]);

        let pairs = best.mutual_pairs();
        assert_eq!(pairs, vec![(1, 0)]);
        for (y, s) in pairs {
            assert_eq!(best.youtube_to_spotify[y], Some(s));
            assert_eq!(best.spotify_to_youtube[s], Some(y));
        }
    }

    fn channel(name: &str) -> CanonicalChannel {
        CanonicalChannel {
            id: canonical_channel_id(name),
            canonical_name: name.to_string(),
            youtube: SourceRef {
                source_id: "X-id".into(),
                display_name: name.into(),
                episode_ids: BTreeSet::new(),
            },
            spotify: SourceRef {
                source_id: "X-id".into(),
                display_name: name.into(),
                episode_ids: BTreeSet::new(),
            },
            last_updated: synced_at(),
        }
    }

    #[test]
    fn empty_pools_produce_no_mappings() {
        let matcher = EpisodeMatcher::new(CandidateScorer::default());
        let mut log = DiscrepancyLog::new();
        let spotify = pool(&["b1"]);
        assert!(matcher
            .match_episodes(&channel("X"), &[], &spotify, &mut log)
            .is_empty());
        assert!(matcher
            .match_episodes(&channel("X"), &spotify, &[], &mut log)
            .is_empty());
    }

    #[test]
    fn matched_episode_prefers_spotify_values_and_logs_conflicts() {
        let matcher = EpisodeMatcher::new(CandidateScorer::default());
        let mut log = DiscrepancyLog::new();
        let youtube = vec![episode("yt-1", "X", "Ep1", "watch the video", "2024-01-01T00:00:00Z")];
        let spotify = vec![episode("sp-1", "X", "Ep1", "listen now", "2024-01-01")];

        let episodes = matcher.match_episodes(&channel("X"), &youtube, &spotify, &mut log);
        assert_eq!(episodes.len(), 1);
        let ep = &episodes[0];
        assert_eq!(ep.canonical_name, "Ep1");
        assert_eq!(ep.canonical_description, "listen now");
        assert_eq!(ep.parent_channel_name, "X");
        assert_eq!(ep.youtube_episode.source_episode_id, "yt-1");
        assert_eq!(ep.spotify_episode.source_episode_id, "sp-1");

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].field, "description");
        assert_eq!(log.entries()[0].youtube_value, "watch the video");
    }

    #[test]
    fn discrepancy_report_returns_spotify_value() {
        let mut log = DiscrepancyLog::new();
        assert_eq!(log.report("channel:X", "display_name", "A", "B"), "B");
        assert_eq!(log.report("channel:X", "display_name", "same", "same"), "same");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn alias_table_rejects_duplicates_and_oversize() {
        let entry = |y: &str, s: &str| AliasEntry {
            youtube: y.into(),
            spotify: s.into(),
        };
        assert!(matches!(
            AliasTable::new(vec![entry("A", "B"), entry("A", "C")], AliasTableConfig::default()),
            Err(AliasTableError::DuplicateYoutube(_))
        ));
        assert!(matches!(
            AliasTable::new(vec![entry("A", "B"), entry("C", "B")], AliasTableConfig::default()),
            Err(AliasTableError::DuplicateSpotify(_))
        ));
        assert!(matches!(
            AliasTable::new(
                vec![entry("A", "B"), entry("C", "D")],
                AliasTableConfig {
                    max_entries: 1,
                    case_sensitive: true
                }
            ),
            Err(AliasTableError::TooManyEntries { count: 2, max: 1 })
        ));
    }

    #[test]
    fn alias_table_case_sensitivity_is_configurable() {
        let yaml = "version: 1\ncase_sensitive: false\naliases:\n  - youtube: Andrew Huberman\n    spotify: Huberman Lab\n";
        let table = AliasTable::from_yaml_str(yaml).unwrap();
        assert!(!table.config().case_sensitive);
        assert_eq!(table.spotify_name_for("andrew huberman"), Some("Huberman Lab"));
        assert_eq!(table.youtube_name_for("HUBERMAN LAB"), Some("Andrew Huberman"));

        let strict = aliases();
        assert_eq!(strict.spotify_name_for("andrew huberman"), None);
        assert_eq!(
            strict.canonical_name(Source::Youtube, "andrew huberman"),
            Err(ConsolidationError::UnmappedChannel {
                platform: Source::Youtube,
                display_name: "andrew huberman".into()
            })
        );
    }

    #[test]
    fn alias_files_from_other_versions_are_refused() {
        let yaml = "version: 2\naliases:\n  - youtube: Andrew Huberman\n    spotify: Huberman Lab\n";
        assert!(matches!(
            AliasTable::from_yaml_str(yaml),
            Err(AliasTableError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            AliasTable::from_yaml_str("aliases: []\n"),
            Err(AliasTableError::Parse(_))
        ));
    }

    #[test]
    fn consolidation_pairs_aliased_channels_and_skips_the_rest() {
        let consolidation = consolidate_channels(
            &[
                channel_row("UC-huberman", "Andrew Huberman"),
                channel_row("UC-unknown", "Unlisted Channel"),
                channel_row("UC-lex", "Lex Fridman"),
            ],
            &[
                channel_row("show-huberman", "Huberman Lab"),
                channel_row("show-huberman-dup", "Huberman Lab"),
            ],
            &aliases(),
            synced_at(),
        );

        assert_eq!(consolidation.channels.len(), 1);
        let channel = &consolidation.channels[0];
        assert_eq!(channel.canonical_name, "Huberman Lab");
        assert_eq!(channel.youtube.source_id, "UC-huberman");
        assert_eq!(channel.spotify.source_id, "show-huberman");
        assert_eq!(channel.last_updated, synced_at());

        let reasons = consolidation
            .skipped
            .iter()
            .map(|s| (s.source_channel_id.as_str(), s.reason))
            .collect::<Vec<_>>();
        assert_eq!(
            reasons,
            vec![
                ("UC-unknown", SkipReason::Unmapped),
                ("show-huberman-dup", SkipReason::Duplicate),
                ("UC-lex", SkipReason::Unpaired),
            ]
        );
    }

    #[test]
    fn episode_ids_are_indexed_per_channel() {
        let rows = vec![
            episode_row("e1", "c1", "C", "One", Some("2024-01-01")),
            episode_row("e2", "c2", "C", "Two", Some("2024-01-01")),
            episode_row("e3", "c1", "C", "Three", None),
        ];
        let index = index_episode_ids(&rows);
        assert_eq!(
            index.get("c1").unwrap().iter().cloned().collect::<Vec<_>>(),
            vec!["e1".to_string(), "e3".to_string()]
        );
        assert_eq!(index.get("c2").unwrap().len(), 1);
    }

    fn sample_input() -> ResolutionInput {
        ResolutionInput {
            youtube_channels: vec![
                channel_row("UC-huberman", "Andrew Huberman"),
                channel_row("UC-solo", "Video Only Channel"),
            ],
            spotify_channels: vec![channel_row("show-huberman", "Huberman Lab")],
            youtube_episodes: vec![
                episode_row("yt-1", "UC-huberman", "Andrew Huberman", "Sleep Toolkit", Some("2024-01-01T15:00:00Z")),
                episode_row("yt-2", "UC-huberman", "Andrew Huberman", "Focus Toolkit", Some("2024-01-08T15:00:00Z")),
                episode_row("yt-3", "UC-huberman", "Andrew Huberman", "Late Upload", Some("2024-01-30T15:00:00Z")),
                // Never scored: its channel has no alias entry.
                episode_row("yt-solo", "UC-solo", "Video Only Channel", "Broken", None),
            ],
            spotify_episodes: vec![
                episode_row("sp-1", "show-huberman", "Huberman Lab", "Sleep Toolkit", Some("2024-01-01")),
                episode_row("sp-2", "show-huberman", "Huberman Lab", "Focus Toolkit", Some("2024-01-08")),
                episode_row("sp-3", "show-huberman", "Huberman Lab", "Late Upload", Some("2024-01-20")),
            ],
        }
    }

    #[test]
    fn resolver_matches_aliased_channel_end_to_end() {
        let resolver = EntityResolver::new(aliases(), ResolverConfig::default());
        let outcome = resolver.resolve(&sample_input(), synced_at()).unwrap();

        assert_eq!(outcome.channels.len(), 1);
        assert_eq!(
            outcome.channels[0].youtube.episode_ids.len(),
            3,
            "episode ids attached from raw rows"
        );
        let pairs = outcome
            .episodes
            .iter()
            .map(|e| {
                (
                    e.youtube_episode.source_episode_id.as_str(),
                    e.spotify_episode.source_episode_id.as_str(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("yt-1", "sp-1"), ("yt-2", "sp-2")]);
        assert_eq!(outcome.skipped_channels.len(), 1);
        assert_eq!(outcome.skipped_channels[0].reason, SkipReason::Unmapped);
        assert_eq!(outcome.stats[0].mappings, 2);
        assert!(outcome
            .discrepancies
            .iter()
            .any(|d| d.field == "display_name" && d.spotify_value == "Huberman Lab"));
    }

    #[test]
    fn resolver_is_idempotent() {
        let resolver = EntityResolver::new(aliases(), ResolverConfig::default());
        let first = resolver.resolve(&sample_input(), synced_at()).unwrap();
        let second = resolver.resolve(&sample_input(), synced_at()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_row_in_a_paired_channel_aborts_with_identification() {
        let mut input = sample_input();
        input.spotify_episodes[1].published_at = None;
        let resolver = EntityResolver::new(aliases(), ResolverConfig::default());
        let err = resolver.resolve(&input, synced_at()).unwrap_err();
        let ResolveError::MalformedRecord { channel, error } = err;
        assert_eq!(channel, "Huberman Lab");
        assert_eq!(error.platform, Source::Spotify);
        assert_eq!(error.record_id, "sp-2");
        assert_eq!(error.field, "published_at");
    }

    #[test]
    fn repeated_canonical_episode_names_keep_the_first() {
        let mut input = sample_input();
        input.youtube_channels.push(channel_row("UC-lex", "Lex Fridman"));
        input.spotify_channels.push(channel_row("show-lex", "Lex Fridman Podcast"));
        input.youtube_episodes.push(episode_row(
            "yt-lex", "UC-lex", "Lex Fridman", "Sleep Toolkit", Some("2024-01-01T10:00:00Z"),
        ));
        input.spotify_episodes.push(episode_row(
            "sp-lex", "show-lex", "Lex Fridman Podcast", "Sleep Toolkit", Some("2024-01-01"),
        ));

        let resolver = EntityResolver::new(aliases(), ResolverConfig::default());
        let outcome = resolver.resolve(&input, synced_at()).unwrap();
        assert_eq!(outcome.duplicate_episode_names, vec!["Sleep Toolkit".to_string()]);
        assert_eq!(
            outcome
                .episodes
                .iter()
                .filter(|e| e.canonical_name == "Sleep Toolkit")
                .count(),
            1
        );
    }
}
