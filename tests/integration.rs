//! End-to-end coverage of `retrieve_context` against a deterministic
//! `IndexClient` double, exercising composition across parsing, the
//! pipeline, weighting, diversification, and impact analysis together.

mod common;

use std::collections::HashSet;

use context_retrieval_engine::index_client::{
    CallGraphNode, CallGraphResponse, CircularDependenciesResponse, CircularDependency,
    CycleType, DefinitionLookupResponse, DefinitionMatch, HubFile, HubFilesResponse, HybridMatch,
    HybridSearchResponse, HybridSource, ImportTree, KeywordMatch, KeywordSearchResponse,
    UsageLookupResponse, UsageMatch, UsageType,
};
use context_retrieval_engine::types::{EngineInput, ImpactKind, Severity};
use context_retrieval_engine::{retrieve_context, BackgroundWorker};

use common::FakeIndexClient;

const MODIFIED_FILE: &str = "src/utils/pricing.ts";

fn pricing_diff() -> String {
    "diff --git a/src/utils/pricing.ts b/src/utils/pricing.ts\n\
     index 1111111..2222222 100644\n\
     --- a/src/utils/pricing.ts\n\
     +++ b/src/utils/pricing.ts\n\
     @@ -1,1 +1,3 @@\n\
     +export function calculateTotalPrice(items) {\n\
     +  return items.reduce((sum, i) => sum + i.price, 0);\n\
     +}\n"
        .to_string()
}

fn populated_client() -> FakeIndexClient {
    let keyword_chunk = KeywordMatch {
        file_path: MODIFIED_FILE.to_string(),
        content: "export function calculateTotalPrice(items) { ... }".to_string(),
        line_start: 1,
        line_end: 3,
        chunk_type: Some("function".into()),
        symbol_names: Some(vec!["calculateTotalPrice".to_string()]),
        bm25_score: 8.0,
        exact_match_boost: Some(true),
        final_score: 0.8,
        repo_url: None,
        branch: None,
    };

    let hybrid_chunk = HybridMatch {
        file_path: "src/utils/pricing.test.ts".to_string(),
        content: "describe('calculateTotalPrice', () => { ... })".to_string(),
        line_start: 1,
        line_end: 10,
        chunk_type: Some("test".into()),
        symbol_names: None,
        vector_score: 0.6,
        vector_rank: Some(1),
        keyword_score: 0.0,
        keyword_rank: None,
        rrf_score: 0.6,
        sources: vec![HybridSource::Vector],
        repo_url: None,
        branch: None,
    };

    let definition = DefinitionMatch {
        file_path: MODIFIED_FILE.to_string(),
        line_start: 1,
        line_end: 3,
        content: "export function calculateTotalPrice(items) { ... }".to_string(),
        chunk_type: Some("function".into()),
        is_reexport: false,
        reexport_source: None,
    };

    let usage = UsageMatch {
        file_path: "src/api/checkout.ts".to_string(),
        line_start: 20,
        line_end: 22,
        content: "const total = calculateTotalPrice(cart.items);".to_string(),
        chunk_type: Some("call".into()),
        usage_type: UsageType::Calls,
        is_dynamic: false,
    };

    let caller = CallGraphNode {
        file_path: "src/api/checkout.ts".to_string(),
        line_start: 18,
        line_end: 24,
        content: "function checkout(cart) { ... }".to_string(),
        symbol_name: "checkout".to_string(),
    };
    let callee = CallGraphNode {
        file_path: "src/utils/tax.ts".to_string(),
        line_start: 5,
        line_end: 9,
        content: "function applyTax(amount) { ... }".to_string(),
        symbol_name: "applyTax".to_string(),
    };

    let import_tree = ImportTree {
        target_file: MODIFIED_FILE.to_string(),
        direct_imports: vec!["src/utils/tax.ts".to_string()],
        direct_importers: (0..6).map(|i| format!("src/callers/c{i}.ts")).collect(),
        indirect_imports: vec![],
        indirect_importers: vec![],
    };

    let hub_files = HubFilesResponse {
        hub_files: vec![HubFile {
            file_path: MODIFIED_FILE.to_string(),
            import_count: 25,
            importers: (0..25).map(|i| format!("src/callers/c{i}.ts")).collect(),
        }],
    };

    let circular_deps = CircularDependenciesResponse {
        circular_dependencies: vec![CircularDependency {
            cycle: vec![MODIFIED_FILE.to_string(), "src/utils/tax.ts".to_string()],
            cycle_type: CycleType::Direct,
        }],
    };

    let mut client = FakeIndexClient::new()
        .with_keyword("calculateTotalPrice", KeywordSearchResponse { matches: vec![keyword_chunk] })
        .with_hybrid("calculateTotalPrice", HybridSearchResponse {
            matches: vec![hybrid_chunk],
            quoted_phrases: vec![],
            fallback_used: false,
        })
        .with_definition("calculateTotalPrice", DefinitionLookupResponse { definitions: vec![definition] })
        .with_usage("calculateTotalPrice", UsageLookupResponse { usages: vec![usage] })
        .with_import_tree(MODIFIED_FILE, import_tree)
        .with_hub_files(hub_files)
        .with_circular_deps(circular_deps);

    client.call_graph.insert(
        "calculateTotalPrice".to_string(),
        CallGraphResponse {
            nodes: vec![],
            edges: vec![],
            callers: vec![caller],
            callees: vec![callee],
        },
    );
    client
}

fn basic_input() -> EngineInput {
    EngineInput {
        diff_content: pricing_diff(),
        repo_url: "https://example.com/repo".to_string(),
        branch: Some("main".to_string()),
        top_k: 30,
        max_tokens: 100_000,
        pr_description: None,
        strategy_overrides: None,
    }
}

#[tokio::test]
async fn end_to_end_bundle_is_well_formed() {
    let client = populated_client();
    let bundle = retrieve_context(&client, basic_input()).await.expect("healthy client yields a context");

    assert!(!bundle.chunks.is_empty());

    // Invariant 2: no two output chunks share a (filename, startLine, endLine) key.
    let mut seen = HashSet::new();
    for c in &bundle.chunks {
        assert!(seen.insert(c.key()), "duplicate chunk key {:?}", c.key());
    }

    // Invariant 1: score is always original_score * weight_multiplier.
    for c in &bundle.chunks {
        assert!((c.score() - c.original_score * c.weight_multiplier).abs() < 1e-4);
    }

    let modified = bundle
        .chunks
        .iter()
        .find(|c| c.chunk.filename == MODIFIED_FILE && c.chunk.start_line == 1)
        .expect("modified-line chunk should survive diversification");
    assert!(modified.is_modified_context);
    assert!(modified.weight_multiplier >= 2.0);

    assert!(!bundle.warnings.is_empty());
    assert!(bundle.warnings.iter().any(|w| w.kind == ImpactKind::HubFile));
    assert!(bundle.warnings.iter().any(|w| w.kind == ImpactKind::HighImpactChange));
    assert!(bundle.warnings.iter().any(|w| w.kind == ImpactKind::CircularDependency));

    // Critical-first ordering.
    for pair in bundle.warnings.windows(2) {
        assert!(pair[0].severity <= pair[1].severity);
    }
    assert_eq!(bundle.warnings[0].severity, Severity::Critical);

    assert!(bundle.import_trees.contains_key(MODIFIED_FILE));
    assert!(!bundle.metrics.stages.is_empty());
}

#[tokio::test]
async fn repeated_calls_are_deterministic() {
    let client = populated_client();
    let first = retrieve_context(&client, basic_input()).await.expect("healthy client yields a context");
    let second = retrieve_context(&client, basic_input()).await.expect("healthy client yields a context");

    let keys_and_scores = |b: &context_retrieval_engine::ContextBundle| {
        b.chunks.iter().map(|c| (c.key(), c.score())).collect::<Vec<_>>()
    };
    assert_eq!(keys_and_scores(&first), keys_and_scores(&second));
    assert_eq!(first.warnings.len(), second.warnings.len());
}

#[tokio::test]
async fn empty_diff_yields_empty_chunks_and_warnings() {
    let client = FakeIndexClient::new();
    let input = EngineInput {
        diff_content: String::new(),
        ..basic_input()
    };
    let bundle = retrieve_context(&client, input).await.expect("healthy client yields a context");
    assert!(bundle.chunks.is_empty());
    assert!(bundle.warnings.is_empty());
    assert!(bundle.metrics.auto_enqueued_job_id.is_none());
}

#[tokio::test]
async fn unhealthy_index_service_yields_null_context() {
    let mut client = FakeIndexClient::new();
    client.healthy = false;
    let bundle = retrieve_context(&client, basic_input()).await;
    assert!(bundle.is_none());
}

#[tokio::test]
async fn auto_enqueues_background_job_above_threshold() {
    let client = FakeIndexClient::new();
    let mut diff = String::new();
    for i in 0..150 {
        diff.push_str(&format!(
            "diff --git a/gen/file{i}.ts b/gen/file{i}.ts\n@@ -1,1 +1,2 @@\n+const x{i} = {i};\n"
        ));
    }
    let input = EngineInput {
        diff_content: diff,
        ..basic_input()
    };
    let bundle = retrieve_context(&client, input).await.expect("healthy client yields a context");
    let job_id = bundle.metrics.auto_enqueued_job_id.expect("should auto-enqueue past threshold");
    let snapshot = BackgroundWorker::queue_snapshot();
    assert!(snapshot.iter().any(|j| j.id == job_id));
}

#[tokio::test]
async fn description_intent_boosts_matching_vector_chunk() {
    let description_only_chunk = HybridMatch {
        file_path: "src/utils/refund.ts".to_string(),
        content: "export function RefundHandler(order) { ... }".to_string(),
        line_start: 1,
        line_end: 5,
        chunk_type: None,
        symbol_names: None,
        vector_score: 0.5,
        vector_rank: Some(1),
        keyword_score: 0.0,
        keyword_rank: None,
        rrf_score: 0.5,
        sources: vec![HybridSource::Vector],
        repo_url: None,
        branch: None,
    };

    let client = populated_client().with_hybrid(
        "RefundHandler",
        HybridSearchResponse {
            matches: vec![description_only_chunk],
            quoted_phrases: vec![],
            fallback_used: false,
        },
    );

    let input = EngineInput {
        pr_description: Some(
            "Introduces the RefundHandler to process partial refunds for an order.".to_string(),
        ),
        ..basic_input()
    };

    let bundle = retrieve_context(&client, input).await.expect("healthy client yields a context");
    let found = bundle
        .chunks
        .iter()
        .find(|c| c.chunk.filename == "src/utils/refund.ts")
        .expect("description-sourced chunk should be present");
    assert!(found.matches_description_intent);
}

#[tokio::test]
async fn top_k_bounds_output_chunk_count() {
    let client = populated_client();
    let input = EngineInput { top_k: 2, ..basic_input() };
    let bundle = retrieve_context(&client, input).await.expect("healthy client yields a context");
    assert!(bundle.chunks.len() <= 2);
}
