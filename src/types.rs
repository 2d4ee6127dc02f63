//! Provider-agnostic data model for the context retrieval engine.
//!
//! These are the "normalized" types that flow between the diff parser, the
//! retrieval pipeline, the diversifier, the impact analyzer, and the
//! background indexing queue. None of these types know how to fetch
//! themselves from the index service — that's `index_client`'s job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Diff model
// ---------------------------------------------------------------------------

/// Kind of a single changed line, after `del`+`add` pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Add,
    Del,
    Mod,
}

/// One changed line. `add`/`mod` line numbers are in the *new* file; `del`
/// lines are in the *old* file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffChange {
    pub filename: String,
    pub line: u32,
    pub content: String,
    pub kind: ChangeKind,
}

/// Per-file line buckets, used by the weighting/impact stages to test
/// modified-line overlap without re-scanning `changes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerFileLines {
    pub adds: Vec<u32>,
    pub dels: Vec<u32>,
    pub mods: Vec<u32>,
}

/// Immutable result of parsing a unified diff once per review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub changes: Vec<DiffChange>,
    pub per_file: HashMap<String, PerFileLines>,
}

impl ParsedDiff {
    /// All filenames touched by this diff, in first-seen order.
    pub fn filenames(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for change in &self.changes {
            if !seen.contains(&change.filename) {
                seen.push(change.filename.clone());
            }
        }
        seen
    }

    /// True if `line` falls within any add/del/mod line recorded for `filename`.
    pub fn touches_line(&self, filename: &str, line: u32) -> bool {
        self.per_file
            .get(filename)
            .is_some_and(|f| f.adds.contains(&line) || f.dels.contains(&line) || f.mods.contains(&line))
    }

    /// True if `[start, end]` overlaps any changed line for `filename`, matching
    /// `filename` by exact equality or mutual path-suffix (relative vs absolute).
    pub fn overlaps_range(&self, filename: &str, start: u32, end: u32) -> bool {
        for (path, lines) in &self.per_file {
            if !paths_match(path, filename) {
                continue;
            }
            let hits = lines
                .adds
                .iter()
                .chain(lines.dels.iter())
                .chain(lines.mods.iter())
                .any(|&l| l >= start && l <= end);
            if hits {
                return true;
            }
        }
        false
    }
}

/// Equality first, then mutual suffix match (tolerates relative vs absolute paths).
pub fn paths_match(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a == b {
        return true;
    }
    a.ends_with(&*b) || b.ends_with(&*a)
}

/// Canonicalize backslashes to forward slashes for cross-platform comparisons.
pub fn normalize_path(p: &str) -> std::borrow::Cow<'_, str> {
    if p.contains('\\') {
        std::borrow::Cow::Owned(p.replace('\\', "/"))
    } else {
        std::borrow::Cow::Borrowed(p)
    }
}

// ---------------------------------------------------------------------------
// Index-service chunk model
// ---------------------------------------------------------------------------

/// A contiguous code region returned by the index service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub filename: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
    pub score: f32,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub chunk_type: Option<String>,
    pub symbol_names: Option<Vec<String>>,
}

impl CodeChunk {
    /// Uniqueness key: `(filename, startLine, endLine)`.
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            filename: self.filename.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
        }
    }

    /// `spec.md` §8 invariant 11: malformed chunks (`endLine < startLine`) are
    /// rejected upstream; this is the check a call-site applies before trusting
    /// a chunk coming back from the index service.
    pub fn is_well_formed(&self) -> bool {
        self.end_line >= self.start_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub filename: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// `CodeChunk` plus the weighting annotations applied by the pipeline/weighting stage.
///
/// Invariant: `score() == original_score * weight_multiplier`. Multipliers compose
/// multiplicatively — every boost in `weighting.rs` multiplies `weight_multiplier`
/// rather than replacing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedChunk {
    pub chunk: CodeChunk,
    pub original_score: f32,
    pub weight_multiplier: f32,
    pub is_modified_context: bool,
    pub is_test_file: bool,
    pub related_source_file: Option<String>,
    pub matches_description_intent: bool,
}

impl WeightedChunk {
    pub fn new(chunk: CodeChunk) -> Self {
        let original_score = chunk.score;
        Self {
            chunk,
            original_score,
            weight_multiplier: 1.0,
            is_modified_context: false,
            is_test_file: false,
            related_source_file: None,
            matches_description_intent: false,
        }
    }

    /// Current composed score. Call sites that need `chunk.score` up to date
    /// should call `sync_score` after composing multipliers.
    pub fn score(&self) -> f32 {
        self.original_score * self.weight_multiplier
    }

    /// Multiply in another boost.
    pub fn apply_multiplier(&mut self, factor: f32) {
        self.weight_multiplier *= factor;
    }

    /// Write the composed score back into `chunk.score`, so callers that only
    /// look at `chunk.score` (e.g. a downstream formatter) see the final value.
    pub fn sync_score(&mut self) {
        self.chunk.score = self.score();
    }

    pub fn key(&self) -> ChunkKey {
        self.chunk.key()
    }
}

// ---------------------------------------------------------------------------
// Pipeline result model
// ---------------------------------------------------------------------------

/// Bitset over the closed tag set `{keyword, vector, definition, usage, callgraph}`.
/// O(1) membership/union, as the teacher's design notes for tag-union merging call for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet(u8);

impl SourceSet {
    pub const KEYWORD: SourceSet = SourceSet(1 << 0);
    pub const VECTOR: SourceSet = SourceSet(1 << 1);
    pub const DEFINITION: SourceSet = SourceSet(1 << 2);
    pub const USAGE: SourceSet = SourceSet(1 << 3);
    pub const CALLGRAPH: SourceSet = SourceSet(1 << 4);

    pub fn empty() -> Self {
        SourceSet(0)
    }

    pub fn contains(&self, other: SourceSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SourceSet) {
        self.0 |= other.0;
    }

    pub fn union(&self, other: SourceSet) -> SourceSet {
        SourceSet(self.0 | other.0)
    }

    /// Number of distinct sources present — used for the multi-source boost
    /// `1 + 0.15 * (|sources| - 1)`.
    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    Caller,
    Callee,
}

/// One merged result record produced by a pipeline stage (or the rerank merge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub chunk: CodeChunk,
    pub sources: SourceSet,
    pub base_score: f32,
    pub weighted_score: f32,
    pub is_exact_match: bool,
    pub matched_symbol: Option<String>,
    pub relationship: Option<Relationship>,
}

impl PipelineResult {
    pub fn key(&self) -> ChunkKey {
        self.chunk.key()
    }
}

// ---------------------------------------------------------------------------
// Impact analysis model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactKind {
    HubFile,
    CircularDependency,
    HighImpactChange,
}

/// Ordered critical < high < medium (stable sort key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactDetails {
    pub import_count: Option<u32>,
    pub affected_files: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactWarning {
    pub kind: ImpactKind,
    pub severity: Severity,
    pub file_path: String,
    pub message: String,
    pub details: ImpactDetails,
}

// ---------------------------------------------------------------------------
// Background indexing queue model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    // Declared low-to-high so `Ord` gives `High > Normal > Low` directly,
    // matching `BinaryHeap`'s max-heap semantics used by the queue.
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: String,
    pub repo_url: String,
    pub repo_path: String,
    pub branch: String,
    pub changed_files: Option<Vec<String>>,
    pub file_count: usize,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageBudgetsMs {
    pub keyword: u64,
    pub vector: u64,
    pub structural: u64,
    pub rerank: u64,
}

impl Default for StageBudgetsMs {
    fn default() -> Self {
        Self {
            keyword: 100,
            vector: 500,
            structural: 500,
            rerank: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub repo_url: String,
    pub branch: Option<String>,
    pub max_results: usize,
    pub early_termination_enabled: bool,
    pub early_termination_threshold: f32,
    pub stage_budgets_ms: StageBudgetsMs,
}

impl PipelineConfig {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: None,
            max_results: 30,
            early_termination_enabled: true,
            early_termination_threshold: 0.9,
            stage_budgets_ms: StageBudgetsMs::default(),
        }
    }

    /// All scalars must be non-negative (spec §3); `max_results == 0` and a
    /// negative/NaN threshold are invariant violations, not transient errors.
    pub fn validate(&self) -> Result<(), crate::errors::ConfigError> {
        if self.max_results == 0 {
            return Err(crate::errors::ConfigError::InvalidPipelineConfig(
                "max_results must be > 0".into(),
            ));
        }
        if !self.early_termination_threshold.is_finite() || self.early_termination_threshold < 0.0
        {
            return Err(crate::errors::ConfigError::InvalidPipelineConfig(
                "early_termination_threshold must be a non-negative finite number".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diversifier configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiversifierConfig {
    pub max_results: usize,
    pub max_chunks_per_file: usize,
    pub diversity_factor: f32,
    pub min_results_per_category: usize,
}

impl Default for DiversifierConfig {
    fn default() -> Self {
        Self {
            max_results: 30,
            max_chunks_per_file: 3,
            diversity_factor: 0.3,
            min_results_per_category: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Background queue configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    pub auto_queue_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_concurrent_jobs: 1,
            auto_queue_threshold: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Caller-facing input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileTypeStrategyOverrides {
    pub priority_weights: HashMap<String, f32>,
    pub disabled_strategies: Vec<String>,
    pub extension_mappings: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInput {
    pub diff_content: String,
    pub repo_url: String,
    pub branch: Option<String>,
    pub top_k: usize,
    pub max_tokens: usize,
    pub pr_description: Option<String>,
    pub strategy_overrides: Option<FileTypeStrategyOverrides>,
}

impl EngineInput {
    /// `spec.md` §6: `maxTokens` is an LLM-token budget, estimated at ~4 chars/token.
    pub fn max_chars_budget(&self) -> usize {
        self.max_tokens.saturating_mul(4)
    }
}

/// Diagnostic summary of a single `retrieve_context` call (spec §7: "the engine
/// reports metrics"). One row per pipeline stage plus the cross-cutting counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub candidates: usize,
    pub duration_ms: u128,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub stages: Vec<StageMetric>,
    pub early_termination_reason: Option<String>,
    pub diversifier_removed_by_file_limit: usize,
    pub diversifier_removed_by_mmr: usize,
    pub auto_enqueued_job_id: Option<String>,
}

/// Top-level return value of `retrieve_context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub chunks: Vec<WeightedChunk>,
    pub warnings: Vec<ImpactWarning>,
    pub import_trees: HashMap<String, crate::index_client::ImportTree>,
    pub metrics: EngineMetrics,
}
