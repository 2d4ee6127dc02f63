//! Deterministic `IndexClient` test double.
//!
//! Every response set is fixed at construction time and keyed by the query
//! or symbol passed in; repeated identical calls return identical results,
//! which is what lets the integration tests assert the pipeline is
//! deterministic end to end (spec.md §8 invariant 8).

use std::collections::HashMap;

use context_retrieval_engine::errors::EngineResult;
use context_retrieval_engine::index_client::{
    CallGraphResponse, CircularDependenciesResponse, DefinitionLookupResponse,
    HubFilesResponse, HybridSearchResponse, ImportTree, IndexClient, KeywordSearchResponse,
    UsageLookupResponse,
};
use context_retrieval_engine::types::CodeChunk;

#[derive(Debug, Clone, Default)]
pub struct FakeIndexClient {
    pub search: HashMap<String, Vec<CodeChunk>>,
    pub keyword: HashMap<String, KeywordSearchResponse>,
    pub hybrid: HashMap<String, HybridSearchResponse>,
    pub definitions: HashMap<String, DefinitionLookupResponse>,
    pub usages: HashMap<String, UsageLookupResponse>,
    pub call_graph: HashMap<String, CallGraphResponse>,
    pub import_trees: HashMap<String, ImportTree>,
    pub hub_files: HubFilesResponse,
    pub circular_deps: CircularDependenciesResponse,
    pub healthy: bool,
}

impl FakeIndexClient {
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn with_keyword(mut self, query: &str, resp: KeywordSearchResponse) -> Self {
        self.keyword.insert(query.to_string(), resp);
        self
    }

    pub fn with_hybrid(mut self, query: &str, resp: HybridSearchResponse) -> Self {
        self.hybrid.insert(query.to_string(), resp);
        self
    }

    pub fn with_definition(mut self, symbol: &str, resp: DefinitionLookupResponse) -> Self {
        self.definitions.insert(symbol.to_string(), resp);
        self
    }

    pub fn with_usage(mut self, symbol: &str, resp: UsageLookupResponse) -> Self {
        self.usages.insert(symbol.to_string(), resp);
        self
    }

    pub fn with_import_tree(mut self, file_path: &str, tree: ImportTree) -> Self {
        self.import_trees.insert(file_path.to_string(), tree);
        self
    }

    pub fn with_hub_files(mut self, resp: HubFilesResponse) -> Self {
        self.hub_files = resp;
        self
    }

    pub fn with_circular_deps(mut self, resp: CircularDependenciesResponse) -> Self {
        self.circular_deps = resp;
        self
    }
}

impl IndexClient for FakeIndexClient {
    async fn search(
        &self,
        query: &str,
        _repo_url: &str,
        _top_k: usize,
        _branch: Option<&str>,
    ) -> EngineResult<Vec<CodeChunk>> {
        Ok(self.search.get(query).cloned().unwrap_or_default())
    }

    async fn keyword_search(
        &self,
        query: &str,
        _repo_url: &str,
        _branch: Option<&str>,
        _limit: usize,
    ) -> EngineResult<KeywordSearchResponse> {
        Ok(self.keyword.get(query).cloned().unwrap_or_default())
    }

    async fn hybrid_search(
        &self,
        query: &str,
        _repo_url: Option<&str>,
        _branch: Option<&str>,
        _limit: usize,
    ) -> EngineResult<HybridSearchResponse> {
        Ok(self.hybrid.get(query).cloned().unwrap_or_default())
    }

    async fn lookup_definitions(
        &self,
        symbol: &str,
        _repo_url: &str,
        _branch: Option<&str>,
        _include_reexports: bool,
        _limit: usize,
    ) -> EngineResult<DefinitionLookupResponse> {
        Ok(self.definitions.get(symbol).cloned().unwrap_or_default())
    }

    async fn lookup_usages(
        &self,
        symbol: &str,
        _repo_url: &str,
        _branch: Option<&str>,
        _limit: usize,
    ) -> EngineResult<UsageLookupResponse> {
        Ok(self.usages.get(symbol).cloned().unwrap_or_default())
    }

    async fn get_call_graph(
        &self,
        function: &str,
        _repo_url: &str,
        _branch: Option<&str>,
        _direction: context_retrieval_engine::index_client::CallGraphDirection,
        _depth: u32,
    ) -> EngineResult<CallGraphResponse> {
        Ok(self.call_graph.get(function).cloned().unwrap_or_default())
    }

    async fn get_import_tree(
        &self,
        file_path: &str,
        _repo_url: &str,
        _branch: Option<&str>,
    ) -> EngineResult<ImportTree> {
        Ok(self.import_trees.get(file_path).cloned().unwrap_or_else(|| ImportTree {
            target_file: file_path.to_string(),
            ..ImportTree::default()
        }))
    }

    async fn get_hub_files(
        &self,
        _repo_url: &str,
        _branch: Option<&str>,
        _threshold: u32,
        _limit: usize,
    ) -> EngineResult<HubFilesResponse> {
        Ok(self.hub_files.clone())
    }

    async fn get_circular_dependencies(
        &self,
        _repo_url: &str,
        _branch: Option<&str>,
    ) -> EngineResult<CircularDependenciesResponse> {
        Ok(self.circular_deps.clone())
    }

    async fn health(&self) -> EngineResult<bool> {
        Ok(self.healthy)
    }
}

pub fn chunk(filename: &str, start: u32, end: u32, score: f32, code: &str) -> CodeChunk {
    CodeChunk {
        filename: filename.to_string(),
        start_line: start,
        end_line: end,
        code: code.to_string(),
        score,
        repo_url: None,
        branch: None,
        chunk_type: None,
        symbol_names: None,
    }
}
