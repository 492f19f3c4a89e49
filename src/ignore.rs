//! Ignore-file matcher deciding which paths belong to a deployed tree.
//!
//! The rule syntax is a simplified gitignore:
//!
//! ```text
//! # comment
//! build/            directory-only: the directory and everything beneath it
//! /config.json      anchored: only relative to the ignore root
//! *.o               unanchored: tried against the full path and every path suffix
//! !build/keep.txt   negation: re-include what an earlier rule excluded
//! ```
//!
//! Rules are evaluated in file order and the last matching rule wins. Globs use shell
//! semantics on the whole candidate string, so `*` also crosses `/`. This is intentionally
//! not segment-aware; existing ignore-files rely on it.

use std::fs;
use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::error::{DeployError, Result};

/// Default name of the ignore-file looked up in the applications directory.
pub const DEFAULT_IGNORE_FILE: &str = ".rpiignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A single compiled ignore rule.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Pattern text with `!`, leading `/` and trailing `/` stripped.
    pub pattern: String,
    /// Only matched against the path from the ignore root.
    pub anchored: bool,
    /// Matches the directory itself and its descendants only.
    pub directory_only: bool,
    /// A match re-includes instead of excluding.
    pub negated: bool,
    glob: Pattern,
}

impl IgnoreRule {
    /// Parse one non-comment line. Returns `None` when nothing is left of the pattern.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (anchored, rest) = match rest.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let (directory_only, rest) = match rest.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        if rest.is_empty() {
            return None;
        }

        Some(Self {
            pattern: rest.to_string(),
            anchored,
            directory_only,
            negated,
            glob: compile_glob(rest),
        })
    }

    /// Whether this rule matches `rel_path`, ignoring negation.
    pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let mut candidates = std::iter::once(rel_path).chain(
            rel_path
                .match_indices('/')
                .map(|(idx, _)| &rel_path[idx + 1..])
                .take_while(|_| !self.anchored),
        );

        if self.directory_only {
            candidates.any(|candidate| {
                (is_dir && candidate == self.pattern)
                    || candidate
                        .strip_prefix(self.pattern.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        } else {
            candidates.any(|candidate| self.glob.matches_with(candidate, MATCH_OPTIONS))
        }
    }
}

/// Compile a shell glob. Runs of `*` collapse to one `*`, since `**` carries no special
/// meaning here. A `[` with no closing `]` is taken literally; the rest of the pattern keeps
/// its wildcards.
fn compile_glob(pattern: &str) -> Pattern {
    let mut collapsed = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if ch == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(ch);
    }

    let repaired = escape_unclosed_brackets(&collapsed);
    match Pattern::new(&repaired) {
        Ok(glob) => glob,
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "invalid glob, matching literally");
            Pattern::new(&Pattern::escape(pattern)).unwrap_or_default()
        }
    }
}

/// Rewrite every `[` that does not open a complete character class as `[[]`.
///
/// A class is `[`, an optional `!`, at least one member (a leading `]` is a member), then `]`.
fn escape_unclosed_brackets(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '[' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut first_member = i + 1;
        if chars.get(first_member) == Some(&'!') {
            first_member += 1;
        }
        let close = chars
            .iter()
            .enumerate()
            .skip(first_member + 1)
            .find(|(_, c)| **c == ']')
            .map(|(idx, _)| idx);
        match close {
            Some(end) if first_member < chars.len() => {
                out.extend(&chars[i..=end]);
                i = end + 1;
            }
            _ => {
                out.push_str("[[]");
                i += 1;
            }
        }
    }
    out
}

/// Ordered list of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Compile rule text. Blank lines and `#` comments are skipped; order is preserved.
    pub fn compile(text: &str) -> Self {
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(IgnoreRule::parse)
            .collect();
        Self { rules }
    }

    /// Read and compile an ignore-file. A missing file is a configuration error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DeployError::Configuration(format!(
                "ignore file not found at {}",
                path.display()
            )));
        }
        let bytes = fs::read(path).map_err(|e| {
            DeployError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let matcher = Self::compile(&String::from_utf8_lossy(&bytes));
        tracing::debug!(path = %path.display(), rules = matcher.len(), "loaded ignore rules");
        Ok(matcher)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `rel_path` (POSIX separators, relative to the ignore root) is part of the tree.
    ///
    /// Starts from "included" and lets every matching rule overwrite the decision, so the
    /// last matching rule wins.
    pub fn includes(&self, rel_path: &str, is_dir: bool) -> bool {
        self.rules.iter().fold(true, |included, rule| {
            if rule.matches(rel_path, is_dir) {
                rule.negated
            } else {
                included
            }
        })
    }
}
