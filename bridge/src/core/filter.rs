//! Gitignore-style exclusion matching for the sync walk.
//!
//! Semantics:
//! - `*` and `?` never cross `/`; `**` matches across directory levels.
//! - A pattern without an inner `/` matches at any depth (`*.pyc`), one with
//!   an inner or leading `/` is anchored to the source root (`.venv/**`).
//! - A trailing `/` restricts the pattern to directories.
//! - `!pattern` re-includes paths excluded by earlier patterns; the last
//!   matching pattern wins.
//!
//! Directories and files are checked separately so a walk can prune a
//! directory without looking inside it. A file under a pruned directory is
//! never visited, so [`PathFilter::is_file_excluded`] only evaluates the file's
//! own path.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::SyncError;

/// Patterns applied before any project or user patterns.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "__pycache__/",
    "*.pyc",
    ".venv/",
    "venv/",
    ".ipynb_checkpoints/",
    "node_modules/",
    ".mypy_cache/",
    ".pytest_cache/",
    ".ruff_cache/",
    ".databricks/",
];

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    /// For `dir/**` patterns: matches `dir` itself so it can be pruned.
    contents_of: Option<GlobMatcher>,
    negated: bool,
    dir_only: bool,
}

impl Rule {
    fn compile(raw: &str) -> Result<Option<Self>, SyncError> {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line.strip_prefix('\\').unwrap_or(line)),
        };
        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Ok(None);
        }

        let glob = if anchored {
            body.to_string()
        } else {
            format!("**/{body}")
        };
        let matcher = build_matcher(raw, &glob)?;
        let contents_of = match glob.strip_suffix("/**") {
            Some(stem) if !stem.is_empty() => Some(build_matcher(raw, stem)?),
            _ => None,
        };

        Ok(Some(Self {
            matcher,
            contents_of,
            negated,
            dir_only,
        }))
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.matcher.is_match(relative) {
            return true;
        }
        is_dir
            && self
                .contents_of
                .as_ref()
                .is_some_and(|matcher| matcher.is_match(relative))
    }
}

fn build_matcher(raw: &str, glob: &str) -> Result<GlobMatcher, SyncError> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| SyncError::Pattern {
            pattern: raw.to_string(),
            message: err.kind().to_string(),
        })
}

/// Compiled, ordered exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    rules: Vec<Rule>,
}

impl PathFilter {
    /// Compile `patterns` in order. Blank lines and `#` comments are ignored.
    pub fn new<I, S>(patterns: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            if let Some(rule) = Rule::compile(pattern.as_ref())? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if the directory at `relative` (slash-separated, relative to the
    /// source root) must not be descended into.
    pub fn is_dir_pruned(&self, relative: &str) -> bool {
        self.evaluate(relative, true)
    }

    /// True if the file at `relative` is excluded.
    pub fn is_file_excluded(&self, relative: &str) -> bool {
        self.evaluate(relative, false)
    }

    fn evaluate(&self, relative: &str, is_dir: bool) -> bool {
        let relative = relative.trim_end_matches('/');
        let mut excluded = false;
        for rule in &self.rules {
            if rule.matches(relative, is_dir) {
                excluded = !rule.negated;
            }
        }
        excluded
    }
}
