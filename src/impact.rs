//! Impact analysis: parallel import-tree/hub-file/circular-dependency calls,
//! each timeout-guarded, turned into severity-tagged warnings (spec
//! component 4.5).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::index_client::{ImportTree, IndexClient};
use crate::types::{normalize_path, paths_match, ImpactDetails, ImpactKind, ImpactWarning, Severity};

const IMPORT_TREE_FILE_LIMIT: usize = 10;
const HUB_FILE_THRESHOLD: u32 = 10;
const HUB_FILE_LIMIT: usize = 200;
const IMPACT_TIMEOUT: Duration = Duration::from_secs(5);
const HIGH_IMPACT_MIN_IMPORTERS: usize = 5;
const HIGH_IMPACT_SEVERE_THRESHOLD: usize = 10;
const HIGH_IMPACT_AFFECTED_CAP: usize = 10;
const HUB_CRITICAL_THRESHOLD: u32 = 20;
const HUB_HIGH_THRESHOLD: u32 = 10;

async fn with_timeout<F, T>(fut: F, fallback: T) -> T
where
    F: std::future::Future<Output = crate::errors::EngineResult<T>>,
{
    match tokio::time::timeout(IMPACT_TIMEOUT, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            debug!("impact: remote call failed, degrading to fallback: {e}");
            fallback
        }
        Err(_) => {
            debug!("impact: remote call timed out after {IMPACT_TIMEOUT:?}, degrading to fallback");
            fallback
        }
    }
}

/// Runs the three impact-query families in parallel, each individually
/// timeout-guarded and falling back to an empty result on failure, then
/// derives warnings and per-file import trees. Always returns a complete
/// shape even if every remote call failed.
pub async fn analyze_impact<C: IndexClient>(
    client: &C,
    modified_files: &[String],
    repo_url: &str,
    branch: Option<&str>,
) -> (Vec<ImpactWarning>, HashMap<String, ImportTree>) {
    if modified_files.is_empty() {
        return (Vec::new(), HashMap::new());
    }

    let files: Vec<String> = modified_files
        .iter()
        .take(IMPORT_TREE_FILE_LIMIT)
        .map(|f| normalize_path(f).into_owned())
        .collect();

    let import_trees_fut = join_all(files.iter().map(|file| {
        let client = client;
        async move {
            let fallback = ImportTree {
                target_file: file.clone(),
                ..ImportTree::default()
            };
            let tree = with_timeout(client.get_import_tree(file, repo_url, branch), fallback).await;
            (file.clone(), tree)
        }
    }));

    let hub_fut = with_timeout(
        client.get_hub_files(repo_url, branch, HUB_FILE_THRESHOLD, HUB_FILE_LIMIT),
        Default::default(),
    );

    let circular_fut = with_timeout(
        client.get_circular_dependencies(repo_url, branch),
        Default::default(),
    );

    let (import_tree_pairs, hub_resp, circular_resp) =
        tokio::join!(import_trees_fut, hub_fut, circular_fut);

    let import_trees: HashMap<String, ImportTree> = import_tree_pairs.into_iter().collect();

    let mut warnings = Vec::new();
    warnings.extend(high_impact_warnings(&import_trees));
    warnings.extend(hub_file_warnings(&hub_resp.hub_files, modified_files));
    warnings.extend(circular_dependency_warnings(&circular_resp.circular_dependencies, modified_files));

    warnings.sort_by(|a, b| a.severity.cmp(&b.severity));

    (warnings, import_trees)
}

fn high_impact_warnings(import_trees: &HashMap<String, ImportTree>) -> Vec<ImpactWarning> {
    let mut warnings = Vec::new();
    for tree in import_trees.values() {
        let importer_count = tree.direct_importers.len();
        if importer_count >= HIGH_IMPACT_MIN_IMPORTERS {
            let severity = if importer_count >= HIGH_IMPACT_SEVERE_THRESHOLD {
                Severity::High
            } else {
                Severity::Medium
            };
            let affected_files: Vec<String> = tree
                .direct_importers
                .iter()
                .take(HIGH_IMPACT_AFFECTED_CAP)
                .cloned()
                .collect();
            warnings.push(ImpactWarning {
                kind: ImpactKind::HighImpactChange,
                severity,
                file_path: tree.target_file.clone(),
                message: format!(
                    "{} is imported directly by {} files",
                    tree.target_file, importer_count
                ),
                details: ImpactDetails {
                    import_count: Some(importer_count as u32),
                    affected_files: Some(affected_files),
                    cycle: None,
                },
            });
        }
    }
    warnings
}

fn hub_file_warnings(hub_files: &[crate::index_client::HubFile], modified_files: &[String]) -> Vec<ImpactWarning> {
    let mut warnings = Vec::new();
    for hub in hub_files {
        let hub_path = normalize_path(&hub.file_path);
        if !modified_files.iter().any(|m| paths_match(m, &hub_path)) {
            continue;
        }
        let severity = if hub.import_count >= HUB_CRITICAL_THRESHOLD {
            Severity::Critical
        } else if hub.import_count >= HUB_HIGH_THRESHOLD {
            Severity::High
        } else {
            Severity::Medium
        };
        warnings.push(ImpactWarning {
            kind: ImpactKind::HubFile,
            severity,
            file_path: hub.file_path.clone(),
            message: format!("{} is a hub file imported by {} files", hub.file_path, hub.import_count),
            details: ImpactDetails {
                import_count: Some(hub.import_count),
                affected_files: Some(hub.importers.clone()),
                cycle: None,
            },
        });
    }
    warnings
}

fn circular_dependency_warnings(
    cycles: &[crate::index_client::CircularDependency],
    modified_files: &[String],
) -> Vec<ImpactWarning> {
    let mut warnings = Vec::new();
    let mut seen_file_paths = HashSet::new();

    for dep in cycles {
        let Some(modified_member) = dep
            .cycle
            .iter()
            .find(|member| modified_files.iter().any(|m| paths_match(m, member)))
        else {
            continue;
        };
        if !seen_file_paths.insert(modified_member.clone()) {
            continue;
        }
        let unique_files: HashSet<&String> = dep.cycle.iter().collect();
        let severity = if unique_files.len() == 2 {
            Severity::High
        } else {
            Severity::Medium
        };
        warnings.push(ImpactWarning {
            kind: ImpactKind::CircularDependency,
            severity,
            file_path: modified_member.clone(),
            message: format!("{} participates in a circular dependency", modified_member),
            details: ImpactDetails {
                import_count: None,
                affected_files: None,
                cycle: Some(dep.cycle.clone()),
            },
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_client::{CircularDependency, CycleType, HubFile};

    struct PanicsOnCallClient;

    impl crate::index_client::IndexClient for PanicsOnCallClient {
        async fn search(
            &self,
            _query: &str,
            _repo_url: &str,
            _top_k: usize,
            _branch: Option<&str>,
        ) -> crate::errors::EngineResult<Vec<crate::types::CodeChunk>> {
            panic!("search should not be called")
        }
        async fn keyword_search(
            &self,
            _query: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _limit: usize,
        ) -> crate::errors::EngineResult<crate::index_client::KeywordSearchResponse> {
            panic!("keyword_search should not be called")
        }
        async fn hybrid_search(
            &self,
            _query: &str,
            _repo_url: Option<&str>,
            _branch: Option<&str>,
            _limit: usize,
        ) -> crate::errors::EngineResult<crate::index_client::HybridSearchResponse> {
            panic!("hybrid_search should not be called")
        }
        async fn lookup_definitions(
            &self,
            _symbol: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _include_reexports: bool,
            _limit: usize,
        ) -> crate::errors::EngineResult<crate::index_client::DefinitionLookupResponse> {
            panic!("lookup_definitions should not be called")
        }
        async fn lookup_usages(
            &self,
            _symbol: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _limit: usize,
        ) -> crate::errors::EngineResult<crate::index_client::UsageLookupResponse> {
            panic!("lookup_usages should not be called")
        }
        async fn get_call_graph(
            &self,
            _function: &str,
            _repo_url: &str,
            _branch: Option<&str>,
            _direction: crate::index_client::CallGraphDirection,
            _depth: u32,
        ) -> crate::errors::EngineResult<crate::index_client::CallGraphResponse> {
            panic!("get_call_graph should not be called")
        }
        async fn get_import_tree(
            &self,
            _file_path: &str,
            _repo_url: &str,
            _branch: Option<&str>,
        ) -> crate::errors::EngineResult<ImportTree> {
            panic!("get_import_tree should not be called")
        }
        async fn get_hub_files(
            &self,
            _repo_url: &str,
            _branch: Option<&str>,
            _threshold: u32,
            _limit: usize,
        ) -> crate::errors::EngineResult<crate::index_client::HubFilesResponse> {
            panic!("get_hub_files should not be called")
        }
        async fn get_circular_dependencies(
            &self,
            _repo_url: &str,
            _branch: Option<&str>,
        ) -> crate::errors::EngineResult<crate::index_client::CircularDependenciesResponse> {
            panic!("get_circular_dependencies should not be called")
        }
        async fn health(&self) -> crate::errors::EngineResult<bool> {
            panic!("health should not be called")
        }
    }

    #[tokio::test]
    async fn empty_modified_files_issues_no_remote_calls() {
        let (warnings, trees) = analyze_impact(&PanicsOnCallClient, &[], "https://example.com/repo", None).await;
        assert!(warnings.is_empty());
        assert!(trees.is_empty());
    }

    #[test]
    fn scenario_s5_hub_file_warning_is_critical() {
        let hub_files = vec![HubFile {
            file_path: "src/core/index.ts".into(),
            import_count: 25,
            importers: vec![],
        }];
        let modified = vec!["src/core/index.ts".to_string()];
        let warnings = hub_file_warnings(&hub_files, &modified);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, ImpactKind::HubFile);
        assert_eq!(warnings[0].severity, Severity::Critical);
        assert_eq!(warnings[0].file_path, "src/core/index.ts");
    }

    #[test]
    fn warnings_sort_critical_first() {
        let mut warnings = vec![
            ImpactWarning {
                kind: ImpactKind::HighImpactChange,
                severity: Severity::Medium,
                file_path: "b.ts".into(),
                message: String::new(),
                details: ImpactDetails::default(),
            },
            ImpactWarning {
                kind: ImpactKind::HubFile,
                severity: Severity::Critical,
                file_path: "a.ts".into(),
                message: String::new(),
                details: ImpactDetails::default(),
            },
        ];
        warnings.sort_by(|a, b| a.severity.cmp(&b.severity));
        assert_eq!(warnings[0].severity, Severity::Critical);
    }

    #[test]
    fn circular_dependency_direct_cycle_is_high_severity() {
        let cycles = vec![CircularDependency {
            cycle: vec!["a.ts".into(), "b.ts".into()],
            cycle_type: CycleType::Direct,
        }];
        let modified = vec!["a.ts".to_string()];
        let warnings = circular_dependency_warnings(&cycles, &modified);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::High);
    }

    #[test]
    fn hub_warning_skipped_when_not_modified() {
        let hub_files = vec![HubFile {
            file_path: "src/unrelated.ts".into(),
            import_count: 25,
            importers: vec![],
        }];
        let modified = vec!["src/core/index.ts".to_string()];
        assert!(hub_file_warnings(&hub_files, &modified).is_empty());
    }
}
