//! Weighting composition and file-type/test-discovery strategies (spec
//! component 4.3). Converts `PipelineResult`s into `WeightedChunk`s and
//! applies the multiplicative boosts on top of what the pipeline already
//! composed (source weight, multi-source boost, modified-line rerank boost).

use std::collections::HashSet;

use tracing::debug;

use crate::index_client::IndexClient;
use crate::types::{
    ChunkKey, CodeChunk, FileTypeStrategyOverrides, ParsedDiff, PipelineConfig, PipelineResult,
    WeightedChunk,
};

const MODIFIED_LINE_WEIGHTING_BOOST: f32 = 2.0;
const TEST_FILE_BOOST: f32 = 1.5;
const DESCRIPTION_INTENT_BOOST: f32 = 1.3;
const MAX_TEST_CHUNKS_PER_SOURCE_FILE: usize = 3;

const SOURCE_PREFIXES_TO_STRIP: &[&str] = &["src/", "lib/", "pkg/", "packages/", "app/"];
const TEST_DIR_PATTERNS: &[&str] = &["__tests__/", "tests/", "test/", "spec/"];
const TEST_NAME_PATTERNS: &[&str] = &[".test.", ".spec.", "_test.", "test_"];

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem(path: &str) -> &str {
    let base = basename(path);
    base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base)
}

fn extension(path: &str) -> Option<&str> {
    basename(path).rsplit_once('.').map(|(_, e)| e)
}

/// A file is a test file iff its normalized path matches any test directory
/// pattern, or its basename matches any test naming pattern (`test_` checked
/// only against the basename).
pub fn is_test_file(path: &str) -> bool {
    let normalized = normalize(path);
    if TEST_DIR_PATTERNS.iter().any(|p| normalized.contains(p)) {
        return true;
    }
    let base = basename(&normalized);
    base.contains(".test.") || base.contains(".spec.") || base.contains("_test.") || base.starts_with("test_")
}

/// Strips a leading conventional source-root prefix (`src/`, `lib/`, ...).
fn strip_source_prefix(path: &str) -> &str {
    for prefix in SOURCE_PREFIXES_TO_STRIP {
        if let Some(rest) = path.strip_prefix(prefix) {
            return rest;
        }
    }
    path
}

/// Generates candidate test file paths for a modified non-test source file,
/// via naming patterns and directory patterns mirrored onto root-level test
/// trees.
pub fn generate_test_candidates(source_file: &str) -> Vec<String> {
    let normalized = normalize(source_file);
    let Some(ext) = extension(&normalized) else {
        return Vec::new();
    };
    let dir = normalized.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let file_stem = stem(&normalized);
    let stripped = strip_source_prefix(&normalized);
    let stripped_dir = stripped.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let mut candidates = Vec::new();

    let join = |dir: &str, name: String| -> String {
        if dir.is_empty() {
            name
        } else {
            format!("{dir}/{name}")
        }
    };

    if ext == "py" {
        candidates.push(join(dir, format!("{file_stem}_test.{ext}")));
        candidates.push(join(dir, format!("test_{file_stem}.{ext}")));
    } else {
        candidates.push(join(dir, format!("{file_stem}.test.{ext}")));
        candidates.push(join(dir, format!("{file_stem}.spec.{ext}")));
        candidates.push(join(dir, format!("__tests__/{file_stem}.{ext}")));
    }

    for root in ["test", "tests"] {
        let rebased = if stripped_dir.is_empty() {
            format!("{root}/{file_stem}.{ext}")
        } else {
            format!("{root}/{stripped_dir}/{file_stem}.{ext}")
        };
        candidates.push(rebased);
    }

    candidates
}

/// Test-discovery symbol-based fallback queries, used when a candidate path
/// query returns nothing.
fn symbol_fallback_queries(source_file: &str) -> Vec<String> {
    let file_stem = stem(&normalize(source_file));
    vec![
        format!("{file_stem} test"),
        format!("describe {file_stem}"),
        format!("test {file_stem}"),
    ]
}

/// Discovers up to 3 test chunks per modified non-test source file by
/// querying candidate test paths, falling back to symbol-based queries when
/// a candidate path yields no results. Every returned chunk is tagged
/// `is_test_file = true` with `related_source_file` set.
pub async fn discover_test_chunks<C: IndexClient>(
    client: &C,
    modified_files: &[String],
    config: &PipelineConfig,
) -> Vec<WeightedChunk> {
    let mut discovered = Vec::new();
    let mut seen_keys: HashSet<ChunkKey> = HashSet::new();

    for source_file in modified_files {
        if is_test_file(source_file) {
            continue;
        }
        let mut found_for_file = 0usize;

        let candidates = generate_test_candidates(source_file);
        for candidate in &candidates {
            if found_for_file >= MAX_TEST_CHUNKS_PER_SOURCE_FILE {
                break;
            }
            match client
                .search(candidate, &config.repo_url, MAX_TEST_CHUNKS_PER_SOURCE_FILE, config.branch.as_deref())
                .await
            {
                Ok(chunks) => {
                    for chunk in chunks {
                        if found_for_file >= MAX_TEST_CHUNKS_PER_SOURCE_FILE {
                            break;
                        }
                        if !seen_keys.insert(chunk.key()) {
                            continue;
                        }
                        discovered.push(tag_test_chunk(chunk, source_file));
                        found_for_file += 1;
                    }
                }
                Err(e) => debug!("weighting: test candidate search failed for {candidate:?}: {e}"),
            }
        }

        if found_for_file == 0 {
            for query in symbol_fallback_queries(source_file) {
                if found_for_file >= MAX_TEST_CHUNKS_PER_SOURCE_FILE {
                    break;
                }
                match client
                    .search(&query, &config.repo_url, MAX_TEST_CHUNKS_PER_SOURCE_FILE, config.branch.as_deref())
                    .await
                {
                    Ok(chunks) => {
                        for chunk in chunks {
                            if found_for_file >= MAX_TEST_CHUNKS_PER_SOURCE_FILE {
                                break;
                            }
                            if !seen_keys.insert(chunk.key()) {
                                continue;
                            }
                            discovered.push(tag_test_chunk(chunk, source_file));
                            found_for_file += 1;
                        }
                    }
                    Err(e) => debug!("weighting: test fallback search failed for {query:?}: {e}"),
                }
            }
        }
    }

    discovered
}

fn tag_test_chunk(chunk: CodeChunk, source_file: &str) -> WeightedChunk {
    let mut weighted = WeightedChunk::new(chunk);
    weighted.is_test_file = true;
    weighted.related_source_file = Some(source_file.to_string());
    weighted.apply_multiplier(TEST_FILE_BOOST);
    weighted.sync_score();
    weighted
}

// ---------------------------------------------------------------------------
// File-type strategies
// ---------------------------------------------------------------------------

struct FileTypeStrategy {
    name: &'static str,
    default_priority_weight: f32,
    matches: fn(&CodeChunk) -> bool,
}

fn is_ts_type_definition(chunk: &CodeChunk) -> bool {
    let ext_ok = chunk.filename.ends_with(".ts") || chunk.filename.ends_with(".tsx");
    ext_ok
        && (chunk.code.contains("interface ") || chunk.code.contains("type ") || chunk.chunk_type.as_deref() == Some("interface"))
}

fn is_python_init(chunk: &CodeChunk) -> bool {
    basename(&chunk.filename) == "__init__.py"
}

fn is_go_interface(chunk: &CodeChunk) -> bool {
    chunk.filename.ends_with(".go") && chunk.code.contains("interface") && chunk.code.contains("type ")
}

fn is_scss_variables(chunk: &CodeChunk) -> bool {
    basename(&chunk.filename) == "_variables.scss"
}

const FILE_TYPE_STRATEGIES: &[FileTypeStrategy] = &[
    FileTypeStrategy {
        name: "typescript_type_definition",
        default_priority_weight: 1.2,
        matches: is_ts_type_definition,
    },
    FileTypeStrategy {
        name: "python_init",
        default_priority_weight: 1.2,
        matches: is_python_init,
    },
    FileTypeStrategy {
        name: "go_interface_definition",
        default_priority_weight: 1.2,
        matches: is_go_interface,
    },
    FileTypeStrategy {
        name: "scss_variables",
        default_priority_weight: 1.1,
        matches: is_scss_variables,
    },
];

fn apply_file_type_strategies(chunks: &mut [WeightedChunk], overrides: Option<&FileTypeStrategyOverrides>) {
    for weighted in chunks.iter_mut() {
        for strategy in FILE_TYPE_STRATEGIES {
            if let Some(o) = overrides {
                if o.disabled_strategies.iter().any(|d| d == strategy.name) {
                    continue;
                }
            }
            if (strategy.matches)(&weighted.chunk) {
                let weight = overrides
                    .and_then(|o| o.priority_weights.get(strategy.name).copied())
                    .unwrap_or(strategy.default_priority_weight);
                weighted.apply_multiplier(weight);
            }
        }
        weighted.sync_score();
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

fn apply_modified_line_boost(chunks: &mut [WeightedChunk], parsed_diff: &ParsedDiff) {
    for weighted in chunks.iter_mut() {
        let c = &weighted.chunk;
        if parsed_diff.overlaps_range(&c.filename, c.start_line, c.end_line) {
            weighted.is_modified_context = true;
            weighted.apply_multiplier(MODIFIED_LINE_WEIGHTING_BOOST);
        }
        weighted.sync_score();
    }
}

fn apply_description_intent_boost(chunks: &mut [WeightedChunk], description_matched: &HashSet<ChunkKey>) {
    for weighted in chunks.iter_mut() {
        if description_matched.contains(&weighted.key()) {
            weighted.matches_description_intent = true;
            weighted.apply_multiplier(DESCRIPTION_INTENT_BOOST);
        }
        weighted.sync_score();
    }
}

/// Converts pipeline results into weighted chunks and applies every
/// multiplicative boost in spec.md §4.3, then discovers and appends test
/// chunks for modified non-test source files.
pub async fn apply_weighting<C: IndexClient>(
    client: &C,
    pipeline_results: Vec<PipelineResult>,
    parsed_diff: &ParsedDiff,
    description_matched: &HashSet<ChunkKey>,
    strategy_overrides: Option<&FileTypeStrategyOverrides>,
    config: &PipelineConfig,
) -> Vec<WeightedChunk> {
    let mut chunks: Vec<WeightedChunk> = pipeline_results
        .into_iter()
        .map(|r| {
            let mut w = WeightedChunk::new(r.chunk);
            w.original_score = r.base_score;
            if r.base_score > 0.0 {
                w.weight_multiplier = r.weighted_score / r.base_score;
            }
            w.sync_score();
            w
        })
        .collect();

    apply_modified_line_boost(&mut chunks, parsed_diff);
    apply_description_intent_boost(&mut chunks, description_matched);
    apply_file_type_strategies(&mut chunks, strategy_overrides);

    let modified_files = parsed_diff.filenames();
    let test_chunks = discover_test_chunks(client, &modified_files, config).await;
    chunks.extend(test_chunks);

    chunks
}
