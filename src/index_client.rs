//! Client for the external index service.
//!
//! The index service itself — vector/keyword storage, embeddings, structural
//! analysis — is out of scope for this crate; it is reached only through
//! `IndexClient`, a plain trait with one `async fn` per operation. No
//! `async-trait`, no `Box<dyn IndexClient>`: every caller in this crate is
//! generic over `C: IndexClient`, the same way the rest of the pipeline
//! avoids boxed futures.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineResult, IndexServiceError};

// ---------------------------------------------------------------------------
// Response DTOs (spec.md §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub file_path: String,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub chunk_type: Option<String>,
    pub symbol_names: Option<Vec<String>>,
    pub bm25_score: f32,
    pub exact_match_boost: Option<bool>,
    pub final_score: f32,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordSearchResponse {
    pub matches: Vec<KeywordMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HybridSource {
    Vector,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridMatch {
    pub file_path: String,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub chunk_type: Option<String>,
    pub symbol_names: Option<Vec<String>>,
    pub vector_score: f32,
    pub vector_rank: Option<u32>,
    pub keyword_score: f32,
    pub keyword_rank: Option<u32>,
    pub rrf_score: f32,
    pub sources: Vec<HybridSource>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    pub matches: Vec<HybridMatch>,
    pub quoted_phrases: Vec<String>,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionMatch {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub chunk_type: Option<String>,
    pub is_reexport: bool,
    pub reexport_source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionLookupResponse {
    pub definitions: Vec<DefinitionMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageType {
    Calls,
    Imports,
    References,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMatch {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub chunk_type: Option<String>,
    pub usage_type: UsageType,
    pub is_dynamic: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageLookupResponse {
    pub usages: Vec<UsageMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallGraphDirection {
    Callers,
    Callees,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallGraphNode {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    pub symbol_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallGraphResponse {
    pub nodes: Vec<CallGraphNode>,
    pub edges: Vec<(String, String)>,
    pub callers: Vec<CallGraphNode>,
    pub callees: Vec<CallGraphNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportTree {
    pub target_file: String,
    pub direct_imports: Vec<String>,
    pub direct_importers: Vec<String>,
    pub indirect_imports: Vec<String>,
    pub indirect_importers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubFile {
    pub file_path: String,
    pub import_count: u32,
    pub importers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubFilesResponse {
    pub hub_files: Vec<HubFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleType {
    Direct,
    Indirect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircularDependency {
    pub cycle: Vec<String>,
    pub cycle_type: CycleType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircularDependenciesResponse {
    pub circular_dependencies: Vec<CircularDependency>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One `async fn` per index-service operation from spec.md §6. Implementors
/// do not need to be `Send`-free or boxable — generic callers monomorphize.
pub trait IndexClient {
    async fn search(
        &self,
        query: &str,
        repo_url: &str,
        top_k: usize,
        branch: Option<&str>,
    ) -> EngineResult<Vec<crate::types::CodeChunk>>;

    async fn keyword_search(
        &self,
        query: &str,
        repo_url: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<KeywordSearchResponse>;

    async fn hybrid_search(
        &self,
        query: &str,
        repo_url: Option<&str>,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<HybridSearchResponse>;

    async fn lookup_definitions(
        &self,
        symbol: &str,
        repo_url: &str,
        branch: Option<&str>,
        include_reexports: bool,
        limit: usize,
    ) -> EngineResult<DefinitionLookupResponse>;

    async fn lookup_usages(
        &self,
        symbol: &str,
        repo_url: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<UsageLookupResponse>;

    async fn get_call_graph(
        &self,
        function: &str,
        repo_url: &str,
        branch: Option<&str>,
        direction: CallGraphDirection,
        depth: u32,
    ) -> EngineResult<CallGraphResponse>;

    async fn get_import_tree(
        &self,
        file_path: &str,
        repo_url: &str,
        branch: Option<&str>,
    ) -> EngineResult<ImportTree>;

    async fn get_hub_files(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        threshold: u32,
        limit: usize,
    ) -> EngineResult<HubFilesResponse>;

    async fn get_circular_dependencies(
        &self,
        repo_url: &str,
        branch: Option<&str>,
    ) -> EngineResult<CircularDependenciesResponse>;

    async fn health(&self) -> EngineResult<bool>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Default vector/keyword fusion weights and exact-match boost for hybrid search
/// (spec.md §6's default argument list).
const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;
const DEFAULT_KEYWORD_WEIGHT: f32 = 0.4;
const DEFAULT_EXACT_MATCH_BOOST: f32 = 3.0;

#[derive(Debug, Clone)]
pub struct HttpIndexClient {
    http: Client,
    base_url: String,
}

impl HttpIndexClient {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(crate::errors::ConfigError::InvalidBaseUrl(base_url).into());
        }
        let http = Client::builder().user_agent("context-retrieval-engine/0.1").build()?;
        Ok(Self { http, base_url })
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> EngineResult<T> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(IndexServiceError::from)?;
        map_status(&resp)?;
        resp.json::<T>()
            .await
            .map_err(|e| IndexServiceError::InvalidResponse(e.to_string()))
            .map_err(Into::into)
    }
}

fn map_status(resp: &reqwest::Response) -> Result<(), IndexServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    Err(match code {
        401 => IndexServiceError::Unauthorized,
        403 => IndexServiceError::Forbidden,
        404 => IndexServiceError::NotFound,
        429 => IndexServiceError::RateLimited {
            retry_after_secs: None,
        },
        500..=599 => IndexServiceError::Server(code),
        _ => IndexServiceError::HttpStatus(code),
    })
}

impl IndexClient for HttpIndexClient {
    async fn search(
        &self,
        query: &str,
        repo_url: &str,
        top_k: usize,
        branch: Option<&str>,
    ) -> EngineResult<Vec<crate::types::CodeChunk>> {
        let mut q = vec![
            ("query", query.to_string()),
            ("repoUrl", repo_url.to_string()),
            ("topK", top_k.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/search", &q).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        repo_url: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<KeywordSearchResponse> {
        let mut q = vec![
            ("query", query.to_string()),
            ("repoUrl", repo_url.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/keyword-search", &q).await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        repo_url: Option<&str>,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<HybridSearchResponse> {
        let mut q = vec![
            ("query", query.to_string()),
            ("limit", limit.to_string()),
            ("vectorWeight", DEFAULT_VECTOR_WEIGHT.to_string()),
            ("keywordWeight", DEFAULT_KEYWORD_WEIGHT.to_string()),
            ("exactMatchBoost", DEFAULT_EXACT_MATCH_BOOST.to_string()),
        ];
        if let Some(r) = repo_url {
            q.push(("repoUrl", r.to_string()));
        }
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/hybrid-search", &q).await
    }

    async fn lookup_definitions(
        &self,
        symbol: &str,
        repo_url: &str,
        branch: Option<&str>,
        include_reexports: bool,
        limit: usize,
    ) -> EngineResult<DefinitionLookupResponse> {
        let mut q = vec![
            ("symbol", symbol.to_string()),
            ("repoUrl", repo_url.to_string()),
            ("includeReexports", include_reexports.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/definitions", &q).await
    }

    async fn lookup_usages(
        &self,
        symbol: &str,
        repo_url: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> EngineResult<UsageLookupResponse> {
        let mut q = vec![
            ("symbol", symbol.to_string()),
            ("repoUrl", repo_url.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/usages", &q).await
    }

    async fn get_call_graph(
        &self,
        function: &str,
        repo_url: &str,
        branch: Option<&str>,
        direction: CallGraphDirection,
        depth: u32,
    ) -> EngineResult<CallGraphResponse> {
        let direction_str = match direction {
            CallGraphDirection::Callers => "callers",
            CallGraphDirection::Callees => "callees",
            CallGraphDirection::Both => "both",
        };
        let mut q = vec![
            ("function", function.to_string()),
            ("repoUrl", repo_url.to_string()),
            ("direction", direction_str.to_string()),
            ("depth", depth.min(5).to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/call-graph", &q).await
    }

    async fn get_import_tree(
        &self,
        file_path: &str,
        repo_url: &str,
        branch: Option<&str>,
    ) -> EngineResult<ImportTree> {
        let mut q = vec![
            ("filePath", file_path.to_string()),
            ("repoUrl", repo_url.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/import-tree", &q).await
    }

    async fn get_hub_files(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        threshold: u32,
        limit: usize,
    ) -> EngineResult<HubFilesResponse> {
        let mut q = vec![
            ("repoUrl", repo_url.to_string()),
            ("threshold", threshold.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/hub-files", &q).await
    }

    async fn get_circular_dependencies(
        &self,
        repo_url: &str,
        branch: Option<&str>,
    ) -> EngineResult<CircularDependenciesResponse> {
        let mut q = vec![("repoUrl", repo_url.to_string())];
        if let Some(b) = branch {
            q.push(("branch", b.to_string()));
        }
        self.get_json("/circular-dependencies", &q).await
    }

    async fn health(&self) -> EngineResult<bool> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(IndexServiceError::from)?;
        Ok(resp.status().is_success())
    }
}
