//! PR/MR description extraction: summary, key terms, mentioned paths,
//! technical concepts, and the description-sourced query set used to bias
//! retrieval toward the author's stated intent.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

const SUMMARY_MIN_LEN: usize = 20;
const SUMMARY_MAX_LEN: usize = 200;
const MAX_KEY_TERMS: usize = 20;
const MAX_FILE_PATHS: usize = 10;
const MAX_TECHNICAL_CONCEPTS: usize = 15;
const MAX_DESCRIPTION_QUERIES: usize = 8;
const KEY_TERM_MIN_LEN: usize = 4;

/// A compact English stopword set. Not exhaustive, but covers the common
/// function words a PR description is likely to use around its key terms.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "if", "then", "else", "when", "at", "by", "for",
        "with", "about", "against", "between", "into", "through", "during", "before", "after",
        "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under",
        "again", "further", "once", "here", "there", "all", "any", "both", "each", "few", "more",
        "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
        "too", "very", "can", "will", "just", "should", "now", "this", "that", "these", "those",
        "i", "me", "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it",
        "its", "they", "them", "their", "what", "which", "who", "whom", "is", "are", "was",
        "were", "be", "been", "being", "have", "has", "had", "having", "do", "does", "did",
        "doing", "would", "could", "might", "must", "shall", "of", "as", "because", "while",
        "also", "adds", "added", "adding", "update", "updates", "updated", "fix", "fixes",
        "fixed", "fixing", "change", "changes", "changed", "changing", "make", "makes", "made",
        "use", "uses", "used", "using", "like", "need", "needs", "needed", "new", "old", "please",
        "pr", "mr", "review", "thanks", "note", "notes", "issue", "issues", "ticket", "closes",
        "resolves", "related", "see", "includes", "including", "implements", "implementing",
        "allow", "allows", "allowing", "ensure", "ensures", "ensuring", "remove", "removes",
        "removed", "removing", "support", "supports", "supported", "supporting",
    ]
    .into_iter()
    .collect()
});

static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[\w.-]+/)*[\w.-]+\.[A-Za-z0-9]{1,6}\b|\b(?:src|lib|pkg|app|test|tests)/[\w./-]+\b").unwrap()
});

static TECHNICAL_CONCEPT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b[A-Z][a-zA-Z0-9]*(?:[A-Z][a-z0-9]+)+\b").unwrap(), // PascalCase
        Regex::new(r"\b[a-z][a-zA-Z0-9]*[A-Z][a-zA-Z0-9]*\b").unwrap(),  // camelCase
        Regex::new(r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b").unwrap(),       // snake_case
        Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").unwrap(),       // CONSTANT_CASE
        Regex::new(r"`([^`]+)`").unwrap(),                               // `backtick wrapped`
        Regex::new(r"\b\w+(?:Handler|Service|Controller|Manager|Repository|Factory|Provider|Adapter|Resolver|Middleware)\b").unwrap(),
    ]
});

#[derive(Debug, Clone, Default)]
pub struct DescriptionAnalysis {
    pub summary: Option<String>,
    pub key_terms: Vec<String>,
    pub mentioned_file_paths: Vec<String>,
    pub technical_concepts: Vec<String>,
    pub description_queries: Vec<String>,
}

fn is_markdown_header_or_list(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#')
        || trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed.starts_with("+ ")
        || trimmed.chars().next().is_some_and(|c| c.is_ascii_digit())
            && trimmed.find(". ").is_some_and(|i| i < 4)
}

fn extract_summary(description: &str) -> Option<String> {
    for paragraph in description.split("\n\n") {
        let line = paragraph.trim();
        if line.len() >= SUMMARY_MIN_LEN && !is_markdown_header_or_list(line) {
            let truncated: String = line.chars().take(SUMMARY_MAX_LEN).collect();
            return Some(truncated);
        }
    }
    None
}

fn extract_key_terms(description: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for word in description.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.len() < KEY_TERM_MIN_LEN {
            continue;
        }
        let lower = word.to_lowercase();
        if STOPWORDS.contains(lower.as_str()) {
            continue;
        }
        if seen.insert(lower) {
            terms.push(word.to_string());
        }
        if terms.len() >= MAX_KEY_TERMS {
            break;
        }
    }
    terms
}

fn extract_file_paths(description: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for caps in FILE_PATH_RE.find_iter(description) {
        let candidate = caps.as_str().to_string();
        if seen.insert(candidate.clone()) {
            paths.push(candidate);
        }
        if paths.len() >= MAX_FILE_PATHS {
            break;
        }
    }
    paths
}

fn extract_technical_concepts(description: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut concepts = Vec::new();
    for re in TECHNICAL_CONCEPT_RES.iter() {
        for caps in re.captures_iter(description) {
            let text = caps.get(1).or_else(|| caps.get(0)).unwrap().as_str().to_string();
            if seen.insert(text.clone()) {
                concepts.push(text);
            }
            if concepts.len() >= MAX_TECHNICAL_CONCEPTS {
                return concepts;
            }
        }
    }
    concepts
}

/// Analyzes a PR/MR description, deriving at most 8 description queries from
/// the key terms and technical concepts found (key terms first, since they
/// tend to be broader intent signals; technical concepts fill remaining slots).
pub fn analyze_description(description: &str) -> DescriptionAnalysis {
    let summary = extract_summary(description);
    let key_terms = extract_key_terms(description);
    let mentioned_file_paths = extract_file_paths(description);
    let technical_concepts = extract_technical_concepts(description);

    let mut description_queries = Vec::new();
    let mut seen = HashSet::new();
    for term in technical_concepts.iter().chain(key_terms.iter()) {
        let lower = term.to_lowercase();
        if seen.insert(lower) {
            description_queries.push(term.clone());
        }
        if description_queries.len() >= MAX_DESCRIPTION_QUERIES {
            break;
        }
    }

    DescriptionAnalysis {
        summary,
        key_terms,
        mentioned_file_paths,
        technical_concepts,
        description_queries,
    }
}
