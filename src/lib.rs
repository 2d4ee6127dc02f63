//! Semantic Context Retrieval Engine.
//!
//! Single entry point [`retrieve_context`]: given a unified diff and a
//! client for the external index service, health-checks the service, then
//! runs the diff parser, the budgeted retrieval pipeline, weighting,
//! diversification, and impact analysis, and returns `Some(`[`ContextBundle`]`)`
//! of ranked chunks, impact warnings, import trees, and per-stage metrics —
//! or `None` if the health check fails, so the caller can proceed without
//! semantic context. Orthogonally, a review that touches enough files may
//! enqueue a background indexing job.

pub mod diff;
pub mod diversify;
pub mod errors;
pub mod impact;
pub mod index_client;
pub mod pipeline;
pub mod queue;
pub mod types;
pub mod weighting;

pub use errors::{ConfigError, Error, EngineResult, IndexServiceError};
pub use index_client::{HttpIndexClient, IndexClient};
pub use queue::{BackgroundWorker, IncrementalIndexer, QueueEvent};
pub use types::{ContextBundle, EngineInput, EngineMetrics};

use tracing::debug;

use crate::types::{PipelineConfig, QueueConfig};

/// Runs a full retrieval pass for one code review.
///
/// Composition order mirrors spec.md §2's control flow: health-check the
/// index service first — the *ServiceUnavailable* class of spec.md §7 means
/// a failed health check returns `None` before any other remote call is
/// made, so the caller can proceed without semantic context. Otherwise:
/// parse diff, extract queries/symbols (plus a description analysis if a PR
/// description was given), run the pipeline, weight and diversify the
/// results, run impact analysis on the modified files, and — orthogonally —
/// enqueue a background indexing job if the diff crosses the auto-queue
/// threshold.
pub async fn retrieve_context<C: IndexClient>(client: &C, input: EngineInput) -> Option<ContextBundle> {
    match client.health().await {
        Ok(true) => {}
        Ok(false) => {
            debug!("retrieve_context: index service reported unhealthy, returning null context");
            return None;
        }
        Err(e) => {
            debug!("retrieve_context: health check failed, returning null context: {e}");
            return None;
        }
    }

    let parsed_diff = diff::parse_unified_diff(&input.diff_content);
    debug!(
        "retrieve_context: parsed diff touching {} file(s)",
        parsed_diff.filenames().len()
    );

    let diff_queries = diff::extract_queries(&parsed_diff);
    let symbols = diff::extract_symbols(&parsed_diff);
    let description_analysis = input
        .pr_description
        .as_deref()
        .map(diff::analyze_description)
        .unwrap_or_default();
    debug!(
        "retrieve_context: extracted {} quer(y/ies), {} symbol(s), {} description quer(y/ies)",
        diff_queries.len(),
        symbols.len(),
        description_analysis.description_queries.len()
    );

    let mut pipeline_config = PipelineConfig::new(input.repo_url.clone());
    pipeline_config.branch = input.branch.clone();
    pipeline_config.max_results = input.top_k.max(1);
    if let Err(e) = pipeline_config.validate() {
        debug!("retrieve_context: invalid pipeline config, using defaults: {e}");
        pipeline_config = PipelineConfig::new(input.repo_url.clone());
        pipeline_config.branch = input.branch.clone();
    }

    let modified_files = parsed_diff.filenames();

    let (pipeline_outcome, (impact_warnings, import_trees)) = tokio::join!(
        pipeline::run_pipeline(
            client,
            &diff_queries,
            &symbols,
            &description_analysis.description_queries,
            &parsed_diff,
            &pipeline_config,
        ),
        impact::analyze_impact(client, &modified_files, &input.repo_url, input.branch.as_deref()),
    );
    debug!(
        "retrieve_context: pipeline produced {} result(s), early_termination={:?}",
        pipeline_outcome.results.len(),
        pipeline_outcome.early_termination_reason
    );
    debug!(
        "retrieve_context: impact analysis produced {} warning(s), {} import tree(s)",
        impact_warnings.len(),
        import_trees.len()
    );

    let weighted = weighting::apply_weighting(
        client,
        pipeline_outcome.results,
        &parsed_diff,
        &pipeline_outcome.description_matched,
        input.strategy_overrides.as_ref(),
        &pipeline_config,
    )
    .await;

    let diversifier_config = crate::types::DiversifierConfig {
        max_results: input.top_k.max(1),
        ..crate::types::DiversifierConfig::default()
    };
    let (mut chunks, diversifier_metrics) = diversify::diversify(weighted, &diversifier_config);
    debug!(
        "retrieve_context: diversified to {} chunk(s) (removed_by_file_limit={}, removed_by_mmr={})",
        chunks.len(),
        diversifier_metrics.removed_by_file_limit,
        diversifier_metrics.removed_by_mmr
    );

    let max_chars = input.max_chars_budget();
    truncate_to_char_budget(&mut chunks, max_chars);

    let auto_enqueued_job_id = {
        let job_id = BackgroundWorker::auto_enqueue(
            &input.repo_url,
            &input.repo_url,
            input.branch.as_deref().unwrap_or("main"),
            modified_files.clone(),
            &QueueConfig::default(),
        );
        if let Some(ref id) = job_id {
            debug!("retrieve_context: auto-enqueued background indexing job {id}");
        }
        job_id
    };

    let metrics = EngineMetrics {
        stages: pipeline_outcome.metrics,
        early_termination_reason: pipeline_outcome.early_termination_reason,
        diversifier_removed_by_file_limit: diversifier_metrics.removed_by_file_limit,
        diversifier_removed_by_mmr: diversifier_metrics.removed_by_mmr,
        auto_enqueued_job_id,
    };

    Some(ContextBundle {
        chunks,
        warnings: impact_warnings,
        import_trees,
        metrics,
    })
}

/// Drops lowest-scoring chunks (from the end, since `chunks` is already
/// sorted descending by the diversifier) until the aggregate code length
/// fits `max_chars`. A non-positive budget is treated as unlimited.
fn truncate_to_char_budget(chunks: &mut Vec<types::WeightedChunk>, max_chars: usize) {
    if max_chars == 0 {
        return;
    }
    let mut total = 0usize;
    let mut cutoff = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        total += chunk.chunk.code.len();
        if total > max_chars {
            cutoff = i;
            break;
        }
    }
    chunks.truncate(cutoff.max(1).min(chunks.len()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CodeChunk;

    struct UnhealthyClient;

    impl IndexClient for UnhealthyClient {
        async fn search(
            &self,
            _query: &str,
            _repo_url: &str,
            _top_k: usize,
            _branch: Option<&str>,
        ) -> EngineResult<Vec<CodeChunk>> {
            panic!("should not be called once the health gate fails")
        }
        async fn keyword_search(
            &self,
            _query: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _limit: usize,
        ) -> EngineResult<index_client::KeywordSearchResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn hybrid_search(
            &self,
            _query: &str,
            _repo_url: Option<&str>,
            _branch: Option<&str>,
            _limit: usize,
        ) -> EngineResult<index_client::HybridSearchResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn lookup_definitions(
            &self,
            _symbol: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _include_reexports: bool,
            _limit: usize,
        ) -> EngineResult<index_client::DefinitionLookupResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn lookup_usages(
            &self,
            _symbol: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _limit: usize,
        ) -> EngineResult<index_client::UsageLookupResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn get_call_graph(
            &self,
            _function: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _direction: index_client::CallGraphDirection,
            _depth: u32,
        ) -> EngineResult<index_client::CallGraphResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn get_import_tree(
            &self,
            _file_path: &str,
            _repo_url: &str,
            _branch: Option<&str>,
        ) -> EngineResult<index_client::ImportTree> {
            panic!("should not be called once the health gate fails")
        }
        async fn get_hub_files(
            &self,
            _repo_url: &str,
            _branch: Option<&str>,
            _threshold: u32,
            _limit: usize,
        ) -> EngineResult<index_client::HubFilesResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn get_circular_dependencies(
            &self,
            _repo_url: &str,
            _branch: Option<&str>,
        ) -> EngineResult<index_client::CircularDependenciesResponse> {
            panic!("should not be called once the health gate fails")
        }
        async fn health(&self) -> EngineResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn unhealthy_index_service_yields_null_context_before_any_other_call() {
        let input = EngineInput {
            diff_content: "diff --git a/a.rs b/a.rs\n@@ -1,1 +1,2 @@\n+fn a() {}\n".to_string(),
            repo_url: "https://example.com/repo".to_string(),
            branch: None,
            top_k: 10,
            max_tokens: 1000,
            pr_description: None,
            strategy_overrides: None,
        };
        assert!(retrieve_context(&UnhealthyClient, input).await.is_none());
    }

    fn chunk_with_code(code: &str) -> types::WeightedChunk {
        types::WeightedChunk::new(CodeChunk {
            filename: "a.rs".into(),
            start_line: 1,
            end_line: 1,
            code: code.to_string(),
            score: 1.0,
            repo_url: None,
            branch: None,
            chunk_type: None,
            symbol_names: None,
        })
    }

    #[test]
    fn char_budget_keeps_at_least_one_chunk() {
        let mut chunks = vec![chunk_with_code(&"x".repeat(1000))];
        truncate_to_char_budget(&mut chunks, 10);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn char_budget_truncates_once_exceeded() {
        let mut chunks = vec![chunk_with_code(&"a".repeat(50)), chunk_with_code(&"b".repeat(50))];
        truncate_to_char_budget(&mut chunks, 60);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn zero_budget_is_unlimited() {
        let mut chunks = vec![chunk_with_code("a"), chunk_with_code("b")];
        truncate_to_char_budget(&mut chunks, 0);
        assert_eq!(chunks.len(), 2);
    }
}
