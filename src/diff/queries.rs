//! Query and symbol extraction from a parsed diff.
//!
//! ~40 regexes across declaration syntax, import statements, type
//! annotations, and string-literal identifier patterns, compiled once and
//! shared as an immutable battery (spec.md §9: "compile once at startup and
//! share as immutable value").

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ChangeKind, ParsedDiff};

const MAX_QUERIES: usize = 15;
const MAX_SYMBOLS: usize = 20;
const MIN_TOKEN_LEN: usize = 3;
const MAX_TOKEN_LEN: usize = 600;
const RAW_SEMANTIC_QUERY_MIN: usize = 50;
const RAW_SEMANTIC_QUERY_CAP: usize = 500;
const HUNK_PHRASE_IDENTIFIER_COUNT: usize = 5;

static KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // JS/TS
        "function", "const", "let", "var", "class", "interface", "type", "import", "export",
        "from", "return", "if", "else", "for", "while", "switch", "case", "default", "break",
        "continue", "new", "this", "super", "extends", "implements", "async", "await", "try",
        "catch", "finally", "throw", "typeof", "instanceof", "void", "null", "undefined", "true",
        "false", "static", "public", "private", "protected", "readonly", "abstract", "enum",
        "namespace", "declare", "as", "in", "of", "yield", "delete", "do",
        // Python
        "def", "self", "elif", "pass", "lambda", "with", "global", "nonlocal", "raise", "assert",
        "yield", "except", "import", "from", "is", "not", "and", "or", "None", "True", "False",
        // Go
        "func", "package", "defer", "go", "chan", "select", "range", "struct", "map", "interface",
        "fallthrough", "goto",
        // Rust
        "fn", "mut", "struct", "enum", "trait", "impl", "pub", "mod", "use", "match", "loop",
        "unsafe", "dyn", "ref", "where", "Self", "crate", "move",
        // Java/Kotlin/C#
        "void", "fun", "val", "var", "override", "companion", "object", "namespace", "using",
        "sealed", "partial",
    ]
    .into_iter()
    .collect()
});

/// Declaration-name regex battery (function/class/interface/type/struct/impl/trait)
/// across TS/JS/Python/Go/Rust/Java/Kotlin/C#.
static DECLARATION_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\bfunction\s+(\w+)").unwrap(),
        Regex::new(r"\bclass\s+(\w+)").unwrap(),
        Regex::new(r"\binterface\s+(\w+)").unwrap(),
        Regex::new(r"\btype\s+(\w+)\s*=").unwrap(),
        Regex::new(r"\bconst\s+(\w+)\s*=\s*(?:async\s*)?\(").unwrap(),
        Regex::new(r"\bdef\s+(\w+)").unwrap(),
        Regex::new(r"\bfunc\s+(?:\([^)]*\)\s*)?(\w+)").unwrap(),
        Regex::new(r"\btype\s+(\w+)\s+(?:struct|interface)\b").unwrap(),
        Regex::new(r"\bfn\s+(\w+)").unwrap(),
        Regex::new(r"\bstruct\s+(\w+)").unwrap(),
        Regex::new(r"\benum\s+(\w+)").unwrap(),
        Regex::new(r"\btrait\s+(\w+)").unwrap(),
        Regex::new(r"\bimpl(?:<[^>]*>)?\s+(?:\w+\s+for\s+)?(\w+)").unwrap(),
        Regex::new(r"\bfun\s+(\w+)").unwrap(),
    ]
});

/// Import-statement recognition: captures both imported names and a raw module path
/// (cleaned separately by `clean_module_path`).
static IMPORT_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"import\s*\{([^}]+)\}\s*from\s*['"]([^'"]+)['"]"#).unwrap(),
        Regex::new(r#"import\s+(\w+)\s+from\s*['"]([^'"]+)['"]"#).unwrap(),
        Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap(),
        Regex::new(r"from\s+([\w.]+)\s+import\s+([\w, *]+)").unwrap(),
        Regex::new(r"^\s*import\s+([\w.]+)\s*$").unwrap(),
        Regex::new(r#"import\s+"([^"]+)""#).unwrap(),
        Regex::new(r"\buse\s+([\w:]+)(?:::\{([^}]+)\})?").unwrap(),
        Regex::new(r"import\s+([\w.]+);").unwrap(),
    ]
});

/// Type-annotation regexes.
static TYPE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r":\s*(\w+)(?:<[^>]*>)?").unwrap(),
        Regex::new(r"Promise<(\w+)>").unwrap(),
        Regex::new(r"Array<(\w+)>").unwrap(),
        Regex::new(r"Map<\s*(\w+)\s*,\s*(\w+)\s*>").unwrap(),
        Regex::new(r"\bas\s+(\w+)\b").unwrap(),
        Regex::new(r"\bimplements\s+([\w, ]+)").unwrap(),
        Regex::new(r"\bextends\s+(\w+)").unwrap(),
        Regex::new(r"->\s*(\w+)").unwrap(),
        Regex::new(r"\.\((\w+)\)").unwrap(),
    ]
});

/// String-literal identifier patterns: event names, action types, route paths, GraphQL ops.
static STRING_LITERAL_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"['"]([a-z]+(?:[A-Z][a-z0-9]*)*)['"]"#).unwrap(),
        Regex::new(r#"type:\s*['"]([A-Z_]+)['"]"#).unwrap(),
        Regex::new(r#"['"](/[\w/-]+)['"]"#).unwrap(),
        Regex::new(r"\b(?:query|mutation|subscription)\s+(\w+)").unwrap(),
    ]
});

/// Narrower battery for structural-lookup symbol candidates (declaration names only).
static SYMBOL_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| DECLARATION_REGEXES.clone());

fn clean_module_path(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    if let Some(rest) = s.strip_prefix('@') {
        // strip scope prefix up to the first `/`
        if let Some(idx) = rest.find('/') {
            s = rest[idx + 1..].to_string();
        } else {
            s = rest.to_string();
        }
    }
    while let Some(rest) = s.strip_prefix("./").or_else(|| s.strip_prefix("../")) {
        s = rest.to_string();
    }
    for ext in [".ts", ".tsx", ".js", ".jsx", ".py", ".go", ".rs", ".java", ".kt", ".cs"] {
        if let Some(rest) = s.strip_suffix(ext) {
            s = rest.to_string();
            break;
        }
    }
    s.replace('/', " ")
}

/// True if `token` is a language keyword, a single uppercase letter (generic
/// param), purely numeric, or outside the `[3, 600]` length window.
fn is_noise(token: &str) -> bool {
    if token.len() < MIN_TOKEN_LEN || token.len() > MAX_TOKEN_LEN {
        return true;
    }
    if token.chars().count() == 1 && token.chars().next().unwrap().is_ascii_uppercase() {
        return true;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if KEYWORDS.contains(token) {
        return true;
    }
    false
}

fn dedup_case_insensitive(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in tokens {
        let key = t.to_lowercase();
        if seen.insert(key) {
            out.push(t);
        }
    }
    out
}

fn is_identifier_like(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Orders identifier-like (`\w+`) queries first, then ascending by length; caps at 15.
fn order_and_cap(mut queries: Vec<String>) -> Vec<String> {
    queries.sort_by(|a, b| {
        let a_ident = is_identifier_like(a);
        let b_ident = is_identifier_like(b);
        b_ident.cmp(&a_ident).then(a.len().cmp(&b.len()))
    });
    queries.truncate(MAX_QUERIES);
    queries
}

/// Each changed line's added or modified content, concatenated per file (the
/// per-hunk aggregation `spec.md` describes, folded down to per-file since
/// `ParsedDiff` does not retain hunk boundaries past parsing).
fn added_content_by_file(parsed: &ParsedDiff) -> std::collections::HashMap<String, Vec<String>> {
    let mut out: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for change in &parsed.changes {
        if matches!(change.kind, ChangeKind::Add | ChangeKind::Mod) {
            out.entry(change.filename.clone()).or_default().push(change.content.clone());
        }
    }
    out
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extract_from_battery(regexes: &[Regex], text: &str, group: usize) -> Vec<String> {
    let mut out = Vec::new();
    for re in regexes {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(group) {
                out.push(m.as_str().to_string());
            }
        }
    }
    out
}

/// Extracts the ordered, capped, noise-filtered query list for a parsed diff.
pub fn extract_queries(parsed: &ParsedDiff) -> Vec<String> {
    let mut raw_tokens: Vec<String> = Vec::new();
    let by_file = added_content_by_file(parsed);

    for lines in by_file.values() {
        for line in lines {
            raw_tokens.extend(extract_from_battery(&DECLARATION_REGEXES, line, 1));
            for re in IMPORT_REGEXES.iter() {
                for caps in re.captures_iter(line) {
                    if let Some(names) = caps.get(1) {
                        for name in names.as_str().split(',') {
                            let name = name.trim().trim_start_matches("type ").trim();
                            if !name.is_empty() && name != "*" {
                                raw_tokens.push(name.to_string());
                            }
                        }
                    }
                    // Last capture group in an import regex is the module path when present.
                    if caps.len() > 2 {
                        if let Some(path) = caps.get(2) {
                            raw_tokens.push(clean_module_path(path.as_str()));
                        }
                    } else if let Some(path) = caps.get(1) {
                        let candidate = path.as_str();
                        if candidate.contains('/') || candidate.contains('.') {
                            raw_tokens.push(clean_module_path(candidate));
                        }
                    }
                }
            }
            raw_tokens.extend(extract_from_battery(&TYPE_REGEXES, line, 1));
            raw_tokens.extend(extract_from_battery(&STRING_LITERAL_REGEXES, line, 1));
        }
    }

    raw_tokens.retain(|t| !is_noise(t));
    let mut queries = dedup_case_insensitive(raw_tokens);

    // Per-file semantic phrase: basename + top five identifiers.
    for (filename, lines) in &by_file {
        let identifiers: Vec<&String> = queries
            .iter()
            .filter(|q| is_identifier_like(q))
            .take(HUNK_PHRASE_IDENTIFIER_COUNT)
            .collect();
        if !identifiers.is_empty() {
            let phrase = format!(
                "{} {}",
                basename(filename),
                identifiers
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            queries.push(phrase);
        }

        // Raw semantic query: up to 500 chars of aggregated added code, if >50 chars.
        let aggregated = lines.join("\n");
        if aggregated.len() > RAW_SEMANTIC_QUERY_MIN {
            let truncated: String = aggregated.chars().take(RAW_SEMANTIC_QUERY_CAP).collect();
            queries.push(truncated);
        }
    }

    order_and_cap(queries)
}

/// Narrower declaration-only symbol extraction for structural lookups, capped at 20.
pub fn extract_symbols(parsed: &ParsedDiff) -> Vec<String> {
    let by_file = added_content_by_file(parsed);
    let mut raw = Vec::new();
    for lines in by_file.values() {
        for line in lines {
            raw.extend(extract_from_battery(&SYMBOL_REGEXES, line, 1));
        }
    }
    raw.retain(|t| !is_noise(t));
    let mut symbols = dedup_case_insensitive(raw);
    symbols.sort_by_key(|s| s.len());
    symbols.truncate(MAX_SYMBOLS);
    symbols
}

/// Verbs that make a PascalCase-looking identifier plausibly function-like
/// even without a lowercase first letter (used by the structural pipeline
/// stage to decide whether to walk the call graph for a symbol).
const FUNCTION_VERB_PREFIXES: &[&str] = &[
    "Get", "Set", "Create", "Delete", "Update", "Handle", "Process", "Validate", "Parse", "Build",
    "Send", "Fetch",
];

/// True if `symbol` looks like a function/method rather than a bare type name.
pub fn is_function_like(symbol: &str) -> bool {
    let Some(first) = symbol.chars().next() else {
        return false;
    };
    if first.is_lowercase() {
        return true;
    }
    FUNCTION_VERB_PREFIXES.iter().any(|verb| symbol.starts_with(verb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parser::parse_unified_diff;

    #[test]
    fn extracts_function_and_class_declarations() {
        let diff = "diff --git a/a.ts b/a.ts\n\
@@ -1,1 +1,3 @@\n\
+function calculateTotalPrice(items) {}\n\
+class InvoiceGenerator {}\n";
        let parsed = parse_unified_diff(diff);
        let queries = extract_queries(&parsed);
        assert!(queries.iter().any(|q| q == "calculateTotalPrice"));
        assert!(queries.iter().any(|q| q == "InvoiceGenerator"));
    }

    #[test]
    fn noise_filter_drops_keywords_and_short_tokens() {
        assert!(is_noise("if"));
        assert!(is_noise("T"));
        assert!(is_noise("42"));
        assert!(is_noise("ab"));
        assert!(!is_noise("calculateTotal"));
    }

    #[test]
    fn caps_at_fifteen_queries() {
        let mut lines = String::new();
        for i in 0..30 {
            lines.push_str(&format!("+function uniqueFnName{i}() {{}}\n"));
        }
        let diff = format!("diff --git a/a.ts b/a.ts\n@@ -1,1 +1,30 @@\n{lines}");
        let parsed = parse_unified_diff(&diff);
        let queries = extract_queries(&parsed);
        assert!(queries.len() <= MAX_QUERIES);
    }

    #[test]
    fn function_like_detects_verb_prefixed_pascal_case() {
        assert!(is_function_like("getUserProfile"));
        assert!(is_function_like("GetUserProfile"));
        assert!(!is_function_like("UserProfile"));
    }

    #[test]
    fn empty_diff_yields_no_queries_or_symbols() {
        let parsed = parse_unified_diff("");
        assert!(extract_queries(&parsed).is_empty());
        assert!(extract_symbols(&parsed).is_empty());
    }
}
