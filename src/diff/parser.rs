//! Unified-diff parsing.
//!
//! Scans the diff text once, tracking old/new line counters per hunk and a
//! pending-deletions buffer used to pair adjacent `-`/`+` lines into `mod`
//! changes. Never fails — malformed input degrades to whatever could be
//! recovered, matching the "parser never fails" contract.

use std::collections::{HashMap, VecDeque};

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{ChangeKind, DiffChange, ParsedDiff, PerFileLines};

static GIT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").unwrap());
static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,\d+)? \+(\d+)(?:,\d+)? @@").unwrap());

struct ParserState {
    filename: Option<String>,
    old_line: u32,
    new_line: u32,
    in_hunk: bool,
    pending_dels: VecDeque<(u32, String)>,
    changes: Vec<DiffChange>,
    per_file: HashMap<String, PerFileLines>,
}

impl ParserState {
    fn new() -> Self {
        Self {
            filename: None,
            old_line: 0,
            new_line: 0,
            in_hunk: false,
            pending_dels: VecDeque::new(),
            changes: Vec::new(),
            per_file: HashMap::new(),
        }
    }

    fn entry(&mut self) -> &mut PerFileLines {
        let filename = self.filename.clone().unwrap_or_default();
        self.per_file.entry(filename).or_default()
    }

    /// Flush buffered `-` lines as pure `del` changes (end of hunk, new hunk,
    /// new file, or end of input).
    fn flush_pending(&mut self) {
        if self.pending_dels.is_empty() {
            return;
        }
        let filename = self.filename.clone().unwrap_or_default();
        let drained: Vec<(u32, String)> = self.pending_dels.drain(..).collect();
        for (line, content) in drained {
            self.changes.push(DiffChange {
                filename: filename.clone(),
                line,
                content,
                kind: ChangeKind::Del,
            });
            self.per_file.entry(filename.clone()).or_default().dels.push(line);
        }
    }

    fn handle_git_header(&mut self, line: &str) {
        self.flush_pending();
        if let Some(caps) = GIT_HEADER.captures(line) {
            self.filename = Some(caps[2].to_string());
        }
        self.in_hunk = false;
    }

    fn handle_hunk_header(&mut self, line: &str) {
        self.flush_pending();
        if let Some(caps) = HUNK_HEADER.captures(line) {
            self.old_line = caps[1].parse().unwrap_or(1);
            self.new_line = caps[2].parse().unwrap_or(1);
            self.in_hunk = true;
        }
    }

    fn handle_context_or_blank(&mut self) {
        self.flush_pending();
        self.old_line += 1;
        self.new_line += 1;
    }

    fn handle_del(&mut self, content: String) {
        self.pending_dels.push_back((self.old_line, content));
        self.old_line += 1;
    }

    fn handle_add(&mut self, content: String) {
        let new_line = self.new_line;
        if let Some((old_line, old_content)) = self.pending_dels.pop_front() {
            let filename = self.filename.clone().unwrap_or_default();
            self.changes.push(DiffChange {
                filename: filename.clone(),
                line: new_line,
                content,
                kind: ChangeKind::Mod,
            });
            self.changes.push(DiffChange {
                filename: filename.clone(),
                line: old_line,
                content: old_content,
                kind: ChangeKind::Mod,
            });
            let entry = self.entry();
            entry.mods.push(new_line);
            entry.mods.push(old_line);
        } else {
            let filename = self.filename.clone().unwrap_or_default();
            self.changes.push(DiffChange {
                filename: filename.clone(),
                line: new_line,
                content,
                kind: ChangeKind::Add,
            });
            self.entry().adds.push(new_line);
        }
        self.new_line += 1;
    }
}

fn is_skippable_preamble(line: &str) -> bool {
    line.starts_with("+++")
        || line.starts_with("---")
        || line.starts_with("index ")
        || line.starts_with("new file")
        || line.starts_with("deleted file")
        || line.starts_with("Binary ")
        || line.starts_with("\\ No newline")
}

/// Parses a unified diff into change records grouped per file. Tolerant of
/// malformed input; an empty or unparseable diff yields an empty `ParsedDiff`.
pub fn parse_unified_diff(diff_content: &str) -> ParsedDiff {
    let mut state = ParserState::new();

    for line in diff_content.lines() {
        if line.starts_with("diff --git ") {
            state.handle_git_header(line);
            continue;
        }
        if line.starts_with("@@") {
            state.handle_hunk_header(line);
            continue;
        }
        if is_skippable_preamble(line) {
            continue;
        }
        if !state.in_hunk {
            continue;
        }
        if let Some(rest) = line.strip_prefix('-') {
            state.handle_del(rest.to_string());
        } else if let Some(rest) = line.strip_prefix('+') {
            state.handle_add(rest.to_string());
        } else if line.starts_with(' ') || line.is_empty() {
            state.handle_context_or_blank();
        } else {
            // Unrecognized line shape inside a hunk (rare) — treat like context
            // rather than dropping the sync between old/new counters.
            state.handle_context_or_blank();
        }
    }
    state.flush_pending();

    ParsedDiff {
        changes: state.changes,
        per_file: state.per_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeKind;

    #[test]
    fn empty_diff_yields_empty_output() {
        let parsed = parse_unified_diff("");
        assert!(parsed.changes.is_empty());
        assert!(parsed.per_file.is_empty());
    }

    #[test]
    fn mod_pairing_scenario_s2() {
        let diff = "diff --git a/src/values.rs b/src/values.rs\n\
@@ -50,2 +50,2 @@\n\
-const oldValue = 'old'\n\
+const newValue = 'new'\n";
        let parsed = parse_unified_diff(diff);
        let mods: Vec<_> = parsed
            .changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Mod)
            .collect();
        assert_eq!(mods.len(), 2);
        assert!(mods.iter().any(|c| c.line == 50 && c.content == "const newValue = 'new'"));
        assert!(mods.iter().any(|c| c.line == 50 && c.content == "const oldValue = 'old'"));
        let per_file = parsed.per_file.get("src/values.rs").unwrap();
        assert_eq!(per_file.mods, vec![50, 50]);
    }

    #[test]
    fn pure_addition_has_no_pairing() {
        let diff = "diff --git a/a.rs b/a.rs\n\
@@ -1,1 +1,2 @@\n\
 fn a() {}\n\
+fn b() {}\n";
        let parsed = parse_unified_diff(diff);
        assert_eq!(parsed.changes.len(), 1);
        assert_eq!(parsed.changes[0].kind, ChangeKind::Add);
        assert_eq!(parsed.changes[0].line, 2);
    }

    #[test]
    fn trailing_deletions_flush_at_end_of_input() {
        let diff = "diff --git a/a.rs b/a.rs\n\
@@ -1,2 +1,0 @@\n\
-fn a() {}\n\
-fn b() {}\n";
        let parsed = parse_unified_diff(diff);
        assert_eq!(parsed.changes.len(), 2);
        assert!(parsed.changes.iter().all(|c| c.kind == ChangeKind::Del));
        assert_eq!(parsed.per_file["a.rs"].dels, vec![1, 2]);
    }

    #[test]
    fn binary_and_preamble_lines_are_skipped() {
        let diff = "diff --git a/img.png b/img.png\nindex abc..def 100644\nBinary files a/img.png and b/img.png differ\n";
        let parsed = parse_unified_diff(diff);
        assert!(parsed.changes.is_empty());
    }
}
