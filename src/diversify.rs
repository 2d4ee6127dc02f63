//! Per-file cap + MMR diversification + category quotas (spec component 4.4).

use std::collections::HashMap;

use crate::types::{DiversifierConfig, WeightedChunk};

const TOKEN_MIN_LEN: usize = 3;
const JACCARD_WEIGHT: f32 = 0.4;
const PATH_WEIGHT: f32 = 0.4;
const RANGE_OVERLAP_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Modified,
    Test,
    TypeDefinition,
    Similar,
}

const ALL_CATEGORIES: [Category; 4] = [
    Category::Modified,
    Category::Test,
    Category::TypeDefinition,
    Category::Similar,
];

fn is_type_definition_content(code: &str) -> bool {
    ["interface ", "type ", "class ", "struct ", "enum ", "typedef "]
        .iter()
        .any(|kw| code.contains(kw))
}

/// Priority when a chunk could fit more than one bucket: modified > test >
/// type_definition > similar.
pub fn categorize(chunk: &WeightedChunk) -> Category {
    if chunk.is_modified_context {
        Category::Modified
    } else if chunk.is_test_file {
        Category::Test
    } else if chunk.chunk.chunk_type.as_deref() == Some("definition")
        || is_type_definition_content(&chunk.chunk.code)
    {
        Category::TypeDefinition
    } else {
        Category::Similar
    }
}

fn tokens(code: &str) -> std::collections::HashSet<String> {
    code.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= TOKEN_MIN_LEN)
        .map(|t| t.to_lowercase())
        .collect()
}

fn token_jaccard(a: &WeightedChunk, b: &WeightedChunk) -> f32 {
    let ta = tokens(&a.chunk.code);
    let tb = tokens(&b.chunk.code);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    let pa: Vec<&str> = a.split('/').collect();
    let pb: Vec<&str> = b.split('/').collect();
    pa.iter().zip(pb.iter()).take_while(|(x, y)| x == y).count()
}

fn path_similarity(a: &WeightedChunk, b: &WeightedChunk) -> f32 {
    if a.chunk.filename == b.chunk.filename {
        return 1.0;
    }
    let dir_a = a.chunk.filename.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let dir_b = b.chunk.filename.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    if dir_a == dir_b && !dir_a.is_empty() {
        return 0.7;
    }
    let max_depth = path_depth(&a.chunk.filename).max(path_depth(&b.chunk.filename)).max(1);
    let common = common_prefix_len(&a.chunk.filename, &b.chunk.filename);
    0.3 + 0.3 * (common as f32 / max_depth as f32)
}

fn line_range_overlap_ratio(a: &WeightedChunk, b: &WeightedChunk) -> f32 {
    if a.chunk.filename != b.chunk.filename {
        return 0.0;
    }
    let start = a.chunk.start_line.max(b.chunk.start_line);
    let end = a.chunk.end_line.min(b.chunk.end_line);
    if start > end {
        return 0.0;
    }
    let overlap = (end - start + 1) as f32;
    let span_a = (a.chunk.end_line - a.chunk.start_line + 1) as f32;
    let span_b = (b.chunk.end_line - b.chunk.start_line + 1) as f32;
    overlap / span_a.max(span_b).max(1.0)
}

/// Similarity combines token Jaccard (0.4), path similarity (0.4), and
/// line-range overlap when in the same file (0.2).
fn similarity(a: &WeightedChunk, b: &WeightedChunk) -> f32 {
    JACCARD_WEIGHT * token_jaccard(a, b)
        + PATH_WEIGHT * path_similarity(a, b)
        + RANGE_OVERLAP_WEIGHT * line_range_overlap_ratio(a, b)
}

fn max_similarity(candidate: &WeightedChunk, selected: &[WeightedChunk]) -> f32 {
    selected
        .iter()
        .map(|s| similarity(candidate, s))
        .fold(0.0_f32, f32::max)
}

#[derive(Debug, Clone, Default)]
pub struct DiversifierMetrics {
    pub input_count: usize,
    pub output_count: usize,
    pub removed_by_file_limit: usize,
    pub removed_by_mmr: usize,
    pub per_category_counts: HashMap<String, usize>,
    pub distinct_files: usize,
    pub mean_consecutive_similarity: f32,
}

/// Per-file cap: group by filename, keep the top `max_chunks_per_file` by score.
fn apply_per_file_cap(chunks: Vec<WeightedChunk>, max_per_file: usize) -> (Vec<WeightedChunk>, usize) {
    let mut by_file: HashMap<String, Vec<WeightedChunk>> = HashMap::new();
    for chunk in chunks {
        by_file.entry(chunk.chunk.filename.clone()).or_default().push(chunk);
    }
    let mut kept = Vec::new();
    let mut removed = 0usize;
    for (_, mut group) in by_file {
        group.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));
        if group.len() > max_per_file {
            removed += group.len() - max_per_file;
            group.truncate(max_per_file);
        }
        kept.extend(group);
    }
    (kept, removed)
}

fn run_mmr(mut candidates: Vec<WeightedChunk>, max_results: usize, lambda: f32) -> (Vec<WeightedChunk>, Vec<WeightedChunk>) {
    if candidates.is_empty() {
        return (Vec::new(), Vec::new());
    }
    candidates.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));
    let mut selected = vec![candidates.remove(0)];

    while selected.len() < max_results && !candidates.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (idx, candidate) in candidates.iter().enumerate() {
            let relevance = candidate.score();
            let sim = max_similarity(candidate, &selected);
            let value = lambda * relevance - (1.0 - lambda) * sim;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }
        selected.push(candidates.remove(best_idx));
    }

    (selected, candidates)
}

fn category_key(c: Category) -> &'static str {
    match c {
        Category::Modified => "modified",
        Category::Test => "test",
        Category::TypeDefinition => "type_definition",
        Category::Similar => "similar",
    }
}

/// Pulls highest-scoring leftover candidates for any category under quota,
/// while room remains under `max_results`.
fn apply_category_quotas(
    mut selected: Vec<WeightedChunk>,
    mut leftover: Vec<WeightedChunk>,
    config: &DiversifierConfig,
) -> Vec<WeightedChunk> {
    for category in ALL_CATEGORIES {
        if selected.len() >= config.max_results {
            break;
        }
        let current = selected.iter().filter(|c| categorize(c) == category).count();
        if current >= config.min_results_per_category {
            continue;
        }
        let mut needed = config.min_results_per_category - current;
        let mut idx = 0;
        while idx < leftover.len() && needed > 0 && selected.len() < config.max_results {
            if categorize(&leftover[idx]) == category {
                selected.push(leftover.remove(idx));
                needed -= 1;
            } else {
                idx += 1;
            }
        }
    }
    selected
}

/// Runs the full diversification procedure: per-file cap, MMR selection,
/// category quota backfill, final sort by weighted score descending.
pub fn diversify(chunks: Vec<WeightedChunk>, config: &DiversifierConfig) -> (Vec<WeightedChunk>, DiversifierMetrics) {
    let input_count = chunks.len();
    let (capped, removed_by_file_limit) = apply_per_file_cap(chunks, config.max_chunks_per_file);

    let lambda = 1.0 - config.diversity_factor;
    let (mut selected, leftover) = run_mmr(capped, config.max_results, lambda);
    let removed_by_mmr = leftover.len();

    selected = apply_category_quotas(selected, leftover, config);
    selected.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));

    let mut per_category_counts = HashMap::new();
    for category in ALL_CATEGORIES {
        let count = selected.iter().filter(|c| categorize(c) == category).count();
        per_category_counts.insert(category_key(category).to_string(), count);
    }

    let distinct_files: std::collections::HashSet<&str> =
        selected.iter().map(|c| c.chunk.filename.as_str()).collect();

    let mean_consecutive_similarity = if selected.len() < 2 {
        0.0
    } else {
        let sum: f32 = selected.windows(2).map(|w| similarity(&w[0], &w[1])).sum();
        sum / (selected.len() - 1) as f32
    };

    let metrics = DiversifierMetrics {
        input_count,
        output_count: selected.len(),
        removed_by_file_limit,
        removed_by_mmr,
        per_category_counts,
        distinct_files: distinct_files.len(),
        mean_consecutive_similarity,
    };

    (selected, metrics)
}
