//! Four-stage budgeted retrieval pipeline (spec component 4.2).
//!
//! Stages run strictly `keyword -> vector -> structural -> rerank`. Each of
//! the first three has a soft time budget checked between calls — a single
//! slow remote call may blow its budget but is never cancelled mid-flight.
//! Every remote call is wrapped individually; a failed call degrades to zero
//! results for that query/symbol rather than failing the stage.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::diff::is_function_like;
use crate::index_client::{CallGraphDirection, IndexClient};
use crate::types::{
    ChunkKey, CodeChunk, ParsedDiff, PipelineConfig, PipelineResult, Relationship, SourceSet,
    StageMetric,
};

const KEYWORD_MAX_SYMBOLS: usize = 5;
const KEYWORD_MAX_QUERIES: usize = 5;
const KEYWORD_LIMIT: usize = 10;

const VECTOR_MAX_DIFF_QUERIES: usize = 8;
const VECTOR_MAX_DESCRIPTION_QUERIES: usize = 4;
const VECTOR_LIMIT: usize = 10;

const STRUCTURAL_MAX_SYMBOLS: usize = 8;
const DEFINITION_LIMIT: usize = 10;
const USAGE_LIMIT: usize = 15;
const CALL_GRAPH_DEPTH: u32 = 2;
const CALL_GRAPH_TAKE: usize = 5;

const EARLY_TERM_MIN_RESULTS: usize = 5;
const EARLY_TERM_TOP_N: usize = 3;
const EARLY_TERM_EXACT_MATCHES: usize = 5;
const MULTI_SOURCE_BOOST_STEP: f32 = 0.15;
const MODIFIED_LINE_RERANK_BOOST: f32 = 1.5;

struct Budget {
    deadline: Instant,
}

impl Budget {
    fn new(ms: u64) -> Self {
        Self {
            deadline: Instant::now() + Duration::from_millis(ms),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

fn is_identifier_like(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn chunk_has_content(chunk: &CodeChunk) -> bool {
    !chunk.code.trim().is_empty()
}

/// Merges possibly-duplicate results by chunk key. First occurrence of a key
/// determines insertion order (spec.md §5); sources union, exactness
/// disjoins, and the multi-source boost is applied once per key using the
/// final merged source count.
fn merge_results(raw: &[PipelineResult]) -> Vec<PipelineResult> {
    let mut order: Vec<ChunkKey> = Vec::new();
    let mut merged: std::collections::HashMap<ChunkKey, PipelineResult> =
        std::collections::HashMap::new();
    let mut max_base: std::collections::HashMap<ChunkKey, f32> = std::collections::HashMap::new();

    for result in raw {
        let key = result.key();
        if let Some(existing) = merged.get_mut(&key) {
            existing.sources.insert(result.sources);
            existing.is_exact_match = existing.is_exact_match || result.is_exact_match;
            if existing.matched_symbol.is_none() {
                existing.matched_symbol = result.matched_symbol.clone();
            }
            if existing.relationship.is_none() {
                existing.relationship = result.relationship;
            }
            let prior = max_base.get(&key).copied().unwrap_or(result.weighted_score);
            max_base.insert(key.clone(), prior.max(result.weighted_score));
        } else {
            order.push(key.clone());
            max_base.insert(key.clone(), result.weighted_score);
            merged.insert(key, result.clone());
        }
    }

    order
        .into_iter()
        .map(|key| {
            let mut r = merged.remove(&key).unwrap();
            let boost = 1.0 + MULTI_SOURCE_BOOST_STEP * (r.sources.len().saturating_sub(1)) as f32;
            r.weighted_score = max_base[&key] * boost;
            r
        })
        .collect()
}

/// True if any of the top 3 merged weighted scores fall below `threshold` is
/// false for all three, i.e. all of the top 3 exceed it.
fn top_n_exceed(results: &[PipelineResult], n: usize, threshold: f32) -> bool {
    if results.len() < n {
        return false;
    }
    let mut scores: Vec<f32> = results.iter().map(|r| r.weighted_score).collect();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scores.iter().take(n).all(|&s| s > threshold)
}

fn check_early_termination(
    accumulated: &[PipelineResult],
    config: &PipelineConfig,
) -> Option<String> {
    if !config.early_termination_enabled {
        return None;
    }
    let merged = merge_results(accumulated);
    if merged.len() >= EARLY_TERM_MIN_RESULTS
        && top_n_exceed(&merged, EARLY_TERM_TOP_N, config.early_termination_threshold)
    {
        return Some(format!(
            "Early termination: top-{EARLY_TERM_TOP_N} weighted scores exceed threshold {}",
            config.early_termination_threshold
        ));
    }
    let exact_matches = merged.iter().filter(|r| r.is_exact_match).count();
    if exact_matches >= EARLY_TERM_EXACT_MATCHES {
        return Some(format!(
            "Early termination: exact matches >= {EARLY_TERM_EXACT_MATCHES}"
        ));
    }
    None
}

async fn run_keyword_stage<C: IndexClient>(
    client: &C,
    symbols: &[String],
    diff_queries: &[String],
    config: &PipelineConfig,
) -> (Vec<PipelineResult>, StageMetric) {
    let start = Instant::now();
    let budget = Budget::new(config.stage_budgets_ms.keyword);
    let mut queries: Vec<&String> = symbols.iter().take(KEYWORD_MAX_SYMBOLS).collect();
    queries.extend(
        diff_queries
            .iter()
            .filter(|q| is_identifier_like(q))
            .take(KEYWORD_MAX_QUERIES),
    );

    let mut results = Vec::new();
    for query in queries {
        if budget.expired() {
            break;
        }
        match client
            .keyword_search(query, &config.repo_url, config.branch.as_deref(), KEYWORD_LIMIT)
            .await
        {
            Ok(resp) => {
                for m in resp.matches {
                    let normalized = (m.bm25_score / 10.0).min(1.0).max(0.0);
                    let exact = m.exact_match_boost.unwrap_or(false)
                        || m.symbol_names
                            .as_ref()
                            .is_some_and(|names| names.iter().any(|n| n.eq_ignore_ascii_case(query)));
                    let weight = if exact {
                        1.5
                    } else if normalized > 0.5 {
                        1.2
                    } else {
                        1.0
                    };
                    let chunk = CodeChunk {
                        filename: m.file_path,
                        start_line: m.line_start,
                        end_line: m.line_end,
                        code: m.content,
                        score: normalized,
                        repo_url: m.repo_url,
                        branch: m.branch,
                        chunk_type: m.chunk_type,
                        symbol_names: m.symbol_names,
                    };
                    if !chunk_has_content(&chunk) {
                        continue;
                    }
                    results.push(PipelineResult {
                        chunk,
                        sources: SourceSet::KEYWORD,
                        base_score: normalized,
                        weighted_score: normalized * weight,
                        is_exact_match: exact,
                        matched_symbol: if exact { Some(query.clone()) } else { None },
                        relationship: None,
                    });
                }
            }
            Err(e) => {
                debug!("pipeline: keyword_search failed for {query:?}: {e}");
            }
        }
    }

    let merged = merge_results(&results);
    let metric = StageMetric {
        stage: "keyword".into(),
        candidates: merged.len(),
        duration_ms: start.elapsed().as_millis(),
        skipped: false,
        skip_reason: None,
    };
    (results, metric)
}

async fn run_vector_stage<C: IndexClient>(
    client: &C,
    diff_queries: &[String],
    description_queries: &[String],
    config: &PipelineConfig,
) -> (Vec<PipelineResult>, StageMetric, std::collections::HashSet<ChunkKey>) {
    let start = Instant::now();
    let budget = Budget::new(config.stage_budgets_ms.vector);
    let mut queries: Vec<(&String, bool)> = diff_queries
        .iter()
        .take(VECTOR_MAX_DIFF_QUERIES)
        .map(|q| (q, false))
        .collect();
    queries.extend(
        description_queries
            .iter()
            .take(VECTOR_MAX_DESCRIPTION_QUERIES)
            .map(|q| (q, true)),
    );

    let mut results = Vec::new();
    let mut description_matched = std::collections::HashSet::new();
    for (query, from_description) in queries {
        if budget.expired() {
            break;
        }
        match client
            .hybrid_search(query, Some(&config.repo_url), config.branch.as_deref(), VECTOR_LIMIT)
            .await
        {
            Ok(resp) => {
                for m in resp.matches {
                    let chunk = CodeChunk {
                        filename: m.file_path,
                        start_line: m.line_start,
                        end_line: m.line_end,
                        code: m.content,
                        score: m.vector_score,
                        repo_url: m.repo_url,
                        branch: m.branch,
                        chunk_type: m.chunk_type,
                        symbol_names: m.symbol_names,
                    };
                    if !chunk_has_content(&chunk) {
                        continue;
                    }
                    if from_description {
                        description_matched.insert(chunk.key());
                    }
                    results.push(PipelineResult {
                        base_score: chunk.score,
                        weighted_score: chunk.score,
                        chunk,
                        sources: SourceSet::VECTOR,
                        is_exact_match: false,
                        matched_symbol: None,
                        relationship: None,
                    });
                }
            }
            Err(e) => {
                debug!("pipeline: hybrid_search failed for {query:?}: {e}");
            }
        }
    }

    let merged = merge_results(&results);
    let metric = StageMetric {
        stage: "vector".into(),
        candidates: merged.len(),
        duration_ms: start.elapsed().as_millis(),
        skipped: false,
        skip_reason: None,
    };
    (results, metric, description_matched)
}

async fn run_structural_stage<C: IndexClient>(
    client: &C,
    symbols: &[String],
    config: &PipelineConfig,
) -> (Vec<PipelineResult>, StageMetric) {
    let start = Instant::now();
    let budget = Budget::new(config.stage_budgets_ms.structural);
    let mut results = Vec::new();

    for symbol in symbols.iter().take(STRUCTURAL_MAX_SYMBOLS) {
        if budget.expired() {
            break;
        }

        match client
            .lookup_definitions(symbol, &config.repo_url, config.branch.as_deref(), false, DEFINITION_LIMIT)
            .await
        {
            Ok(resp) => {
                for d in resp.definitions {
                    let chunk = CodeChunk {
                        filename: d.file_path,
                        start_line: d.line_start,
                        end_line: d.line_end,
                        code: d.content,
                        score: 0.8,
                        repo_url: None,
                        branch: None,
                        chunk_type: d.chunk_type,
                        symbol_names: Some(vec![symbol.clone()]),
                    };
                    if !chunk_has_content(&chunk) {
                        continue;
                    }
                    results.push(PipelineResult {
                        base_score: 0.8,
                        weighted_score: 0.8 * 1.3,
                        chunk,
                        sources: SourceSet::DEFINITION,
                        is_exact_match: true,
                        matched_symbol: Some(symbol.clone()),
                        relationship: None,
                    });
                }
            }
            Err(e) => debug!("pipeline: lookup_definitions failed for {symbol:?}: {e}"),
        }

        match client
            .lookup_usages(symbol, &config.repo_url, config.branch.as_deref(), USAGE_LIMIT)
            .await
        {
            Ok(resp) => {
                for u in resp.usages {
                    let chunk = CodeChunk {
                        filename: u.file_path,
                        start_line: u.line_start,
                        end_line: u.line_end,
                        code: u.content,
                        score: 0.7,
                        repo_url: None,
                        branch: None,
                        chunk_type: u.chunk_type,
                        symbol_names: Some(vec![symbol.clone()]),
                    };
                    if !chunk_has_content(&chunk) {
                        continue;
                    }
                    results.push(PipelineResult {
                        base_score: 0.7,
                        weighted_score: 0.7 * 1.1,
                        chunk,
                        sources: SourceSet::USAGE,
                        is_exact_match: false,
                        matched_symbol: Some(symbol.clone()),
                        relationship: None,
                    });
                }
            }
            Err(e) => debug!("pipeline: lookup_usages failed for {symbol:?}: {e}"),
        }

        if is_function_like(symbol) {
            match client
                .get_call_graph(
                    symbol,
                    &config.repo_url,
                    config.branch.as_deref(),
                    CallGraphDirection::Both,
                    CALL_GRAPH_DEPTH,
                )
                .await
            {
                Ok(resp) => {
                    for node in resp.callers.into_iter().take(CALL_GRAPH_TAKE) {
                        let chunk = CodeChunk {
                            filename: node.file_path,
                            start_line: node.line_start,
                            end_line: node.line_end,
                            code: node.content,
                            score: 0.75,
                            repo_url: None,
                            branch: None,
                            chunk_type: None,
                            symbol_names: Some(vec![node.symbol_name]),
                        };
                        if !chunk_has_content(&chunk) {
                            continue;
                        }
                        results.push(PipelineResult {
                            base_score: 0.75,
                            weighted_score: 0.75 * 1.2,
                            chunk,
                            sources: SourceSet::CALLGRAPH,
                            is_exact_match: false,
                            matched_symbol: Some(symbol.clone()),
                            relationship: Some(Relationship::Caller),
                        });
                    }
                    for node in resp.callees.into_iter().take(CALL_GRAPH_TAKE) {
                        let chunk = CodeChunk {
                            filename: node.file_path,
                            start_line: node.line_start,
                            end_line: node.line_end,
                            code: node.content,
                            score: 0.7,
                            repo_url: None,
                            branch: None,
                            chunk_type: None,
                            symbol_names: Some(vec![node.symbol_name]),
                        };
                        if !chunk_has_content(&chunk) {
                            continue;
                        }
                        results.push(PipelineResult {
                            base_score: 0.7,
                            weighted_score: 0.7 * 1.2,
                            chunk,
                            sources: SourceSet::CALLGRAPH,
                            is_exact_match: false,
                            matched_symbol: Some(symbol.clone()),
                            relationship: Some(Relationship::Callee),
                        });
                    }
                }
                Err(e) => debug!("pipeline: get_call_graph failed for {symbol:?}: {e}"),
            }
        }
    }

    let merged = merge_results(&results);
    let metric = StageMetric {
        stage: "structural".into(),
        candidates: merged.len(),
        duration_ms: start.elapsed().as_millis(),
        skipped: false,
        skip_reason: None,
    };
    (results, metric)
}

fn run_rerank_stage(
    accumulated: &[PipelineResult],
    parsed_diff: &ParsedDiff,
    config: &PipelineConfig,
) -> (Vec<PipelineResult>, StageMetric) {
    let start = Instant::now();
    let mut merged = merge_results(accumulated);

    for result in merged.iter_mut() {
        if parsed_diff.overlaps_range(&result.chunk.filename, result.chunk.start_line, result.chunk.end_line) {
            result.weighted_score *= MODIFIED_LINE_RERANK_BOOST;
        }
    }

    merged.sort_by(|a, b| b.weighted_score.partial_cmp(&a.weighted_score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(config.max_results);

    let metric = StageMetric {
        stage: "rerank".into(),
        candidates: merged.len(),
        duration_ms: start.elapsed().as_millis(),
        skipped: false,
        skip_reason: None,
    };
    (merged, metric)
}

/// Runs the full pipeline, returning the final rerank-stage results, one
/// `StageMetric` per stage (including skipped stages), and the
/// early-termination reason if one fired.
/// Result of a full pipeline run, plus the set of chunk keys that were
/// retrieved via a description-sourced query (used by `weighting` to apply
/// the PR-description intent-match boost).
pub struct PipelineOutcome {
    pub results: Vec<PipelineResult>,
    pub metrics: Vec<StageMetric>,
    pub early_termination_reason: Option<String>,
    pub description_matched: std::collections::HashSet<ChunkKey>,
}

pub async fn run_pipeline<C: IndexClient>(
    client: &C,
    diff_queries: &[String],
    symbols: &[String],
    description_queries: &[String],
    parsed_diff: &ParsedDiff,
    config: &PipelineConfig,
) -> PipelineOutcome {
    let mut accumulated = Vec::new();
    let mut metrics = Vec::new();
    let mut early_term_reason = None;
    let mut description_matched = std::collections::HashSet::new();

    let (keyword_results, keyword_metric) =
        run_keyword_stage(client, symbols, diff_queries, config).await;
    accumulated.extend(keyword_results);
    metrics.push(keyword_metric);

    if let Some(reason) = check_early_termination(&accumulated, config) {
        early_term_reason = Some(reason.clone());
        metrics.push(skipped_metric("vector", &reason));
        metrics.push(skipped_metric("structural", &reason));
    } else {
        let (vector_results, vector_metric, vector_description_matched) =
            run_vector_stage(client, diff_queries, description_queries, config).await;
        accumulated.extend(vector_results);
        metrics.push(vector_metric);
        description_matched.extend(vector_description_matched);

        if let Some(reason) = check_early_termination(&accumulated, config) {
            early_term_reason = Some(reason.clone());
            metrics.push(skipped_metric("structural", &reason));
        } else {
            let (structural_results, structural_metric) =
                run_structural_stage(client, symbols, config).await;
            accumulated.extend(structural_results);
            metrics.push(structural_metric);
        }
    }

    let (final_results, rerank_metric) = run_rerank_stage(&accumulated, parsed_diff, config);
    metrics.push(rerank_metric);

    PipelineOutcome {
        results: final_results,
        metrics,
        early_termination_reason: early_term_reason,
        description_matched,
    }
}

fn skipped_metric(stage: &str, reason: &str) -> StageMetric {
    StageMetric {
        stage: stage.to_string(),
        candidates: 0,
        duration_ms: 0,
        skipped: true,
        skip_reason: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, DiffChange};

    fn sample_chunk(filename: &str, start: u32, end: u32, score: f32) -> CodeChunk {
        CodeChunk {
            filename: filename.to_string(),
            start_line: start,
            end_line: end,
            code: "fn x() {}".into(),
            score,
            repo_url: None,
            branch: None,
            chunk_type: None,
            symbol_names: None,
        }
    }

    fn pipeline_result(filename: &str, start: u32, end: u32, score: f32, sources: SourceSet) -> PipelineResult {
        PipelineResult {
            chunk: sample_chunk(filename, start, end, score),
            sources,
            base_score: score,
            weighted_score: score,
            is_exact_match: false,
            matched_symbol: None,
            relationship: None,
        }
    }

    #[test]
    fn merge_unions_sources_and_applies_multi_source_boost() {
        let raw = vec![
            pipeline_result("a.rs", 1, 5, 0.5, SourceSet::KEYWORD),
            pipeline_result("a.rs", 1, 5, 0.6, SourceSet::VECTOR),
        ];
        let merged = merge_results(&raw);
        assert_eq!(merged.len(), 1);
        let r = &merged[0];
        assert!(r.sources.contains(SourceSet::KEYWORD));
        assert!(r.sources.contains(SourceSet::VECTOR));
        assert!((r.weighted_score - 0.6 * 1.15).abs() < 1e-5);
    }

    #[test]
    fn no_duplicate_keys_in_merged_output() {
        let raw = vec![
            pipeline_result("a.rs", 1, 5, 0.5, SourceSet::KEYWORD),
            pipeline_result("a.rs", 1, 5, 0.6, SourceSet::KEYWORD),
            pipeline_result("b.rs", 1, 5, 0.4, SourceSet::KEYWORD),
        ];
        let merged = merge_results(&raw);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn rerank_sorts_descending_and_truncates() {
        let mut parsed = ParsedDiff::default();
        parsed.changes.push(DiffChange {
            filename: "a.rs".into(),
            line: 3,
            content: String::new(),
            kind: ChangeKind::Mod,
        });
        parsed.per_file.entry("a.rs".into()).or_default().mods.push(3);

        let raw = vec![
            pipeline_result("a.rs", 1, 5, 0.3, SourceSet::KEYWORD),
            pipeline_result("b.rs", 1, 5, 0.9, SourceSet::VECTOR),
            pipeline_result("c.rs", 1, 5, 0.5, SourceSet::VECTOR),
        ];
        let config = PipelineConfig {
            max_results: 2,
            ..PipelineConfig::new("https://example.com/repo")
        };
        let (results, metric) = run_rerank_stage(&raw, &parsed, &config);
        assert!(results.len() <= 2);
        assert_eq!(metric.stage, "rerank");
        for pair in results.windows(2) {
            assert!(pair[0].weighted_score >= pair[1].weighted_score);
        }
    }

    #[test]
    fn early_termination_triggers_on_top_three_threshold() {
        let raw: Vec<PipelineResult> = [0.95, 0.93, 0.92, 0.9, 0.88]
            .into_iter()
            .enumerate()
            .map(|(i, s)| pipeline_result(&format!("f{i}.rs"), 1, 2, s, SourceSet::KEYWORD))
            .collect();
        let config = PipelineConfig::new("https://example.com/repo");
        let reason = check_early_termination(&raw, &config);
        assert!(reason.is_some());
        assert!(reason.unwrap().contains("Early termination"));
    }
}
