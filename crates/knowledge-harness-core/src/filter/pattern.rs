//! Gitignore-style pattern language for user ignore lists and per-directory
//! ignore files, plus explicit include globs.
//!
//! Syntax, one rule per line:
//!
//! - blank lines and lines starting with `#` are skipped
//! - a leading `!` negates the rule (re-admits what an earlier rule ignored)
//! - a trailing `/` restricts the rule to directories
//! - a leading `/`, or any `/` inside the pattern, anchors it to the
//!   directory holding the rules; otherwise it matches a name at any depth
//! - `*`, `?`, `[..]` and `**` behave as in gitignore
//!
//! The last matching rule wins, and a file inside an ignored directory
//! cannot be re-admitted by a negation.

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone)]
struct IgnoreRule {
    source: String,
    matcher: GlobMatcher,
    negated: bool,
    dir_only: bool,
    basename_only: bool,
}

/// Compiled ignore rules scoped to one directory.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    /// `/`-separated directory the rules apply to; empty for the root.
    base: String,
    rules: Vec<IgnoreRule>,
    invalid: Vec<String>,
}

impl IgnoreRules {
    /// Parse ignore-file text whose rules apply beneath `base`.
    ///
    /// Lines that are not valid globs are kept aside (see
    /// [`invalid_lines`](Self::invalid_lines)) instead of failing the parse.
    pub fn parse(base: &str, text: &str) -> Self {
        let mut rules = IgnoreRules {
            base: base.trim_matches('/').to_string(),
            rules: Vec::new(),
            invalid: Vec::new(),
        };
        for line in text.lines() {
            rules.push_line(line);
        }
        rules
    }

    /// Build rules from a list of patterns (e.g. the `ignore` config key).
    pub fn from_patterns(base: &str, patterns: &[String]) -> Self {
        Self::parse(base, &patterns.join("\n"))
    }

    fn push_line(&mut self, line: &str) {
        let line = line.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        let mut pattern = trimmed;
        let mut negated = false;
        if let Some(rest) = pattern.strip_prefix('!') {
            negated = true;
            pattern = rest;
        } else if let Some(rest) = pattern.strip_prefix('\\') {
            // `\#` and `\!` escape a literal leading character
            pattern = rest;
        }

        let mut dir_only = false;
        if let Some(rest) = pattern.strip_suffix('/') {
            dir_only = true;
            pattern = rest;
        }

        let anchored = pattern.starts_with('/');
        let pattern = pattern.trim_start_matches('/');
        if pattern.is_empty() {
            return;
        }
        let basename_only = !anchored && !pattern.contains('/');

        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => self.rules.push(IgnoreRule {
                source: trimmed.to_string(),
                matcher: glob.compile_matcher(),
                negated,
                dir_only,
                basename_only,
            }),
            Err(_) => self.invalid.push(trimmed.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Lines that failed to compile as globs.
    pub fn invalid_lines(&self) -> &[String] {
        &self.invalid
    }

    /// Path relative to `base`, or `None` when `rel_path` lies outside it.
    fn localize<'a>(&self, rel_path: &'a str) -> Option<&'a str> {
        if self.base.is_empty() {
            return Some(rel_path);
        }
        rel_path
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    /// Last rule matching `local` itself (ancestors not considered).
    fn last_match(&self, local: &str, is_dir: bool) -> Option<&IgnoreRule> {
        let name = local.rsplit('/').next().unwrap_or(local);
        self.rules.iter().rev().find(|rule| {
            if rule.dir_only && !is_dir {
                return false;
            }
            let candidate = if rule.basename_only { name } else { local };
            rule.matcher.is_match(candidate)
        })
    }

    /// Returns the rule that ignores `rel_path`, if any.
    ///
    /// `rel_path` is relative to the scan root and `/`-separated.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> Option<&str> {
        let local = self.localize(rel_path)?;

        let mut end = 0;
        while let Some(pos) = local[end..].find('/') {
            let ancestor = &local[..end + pos];
            if let Some(rule) = self.last_match(ancestor, true) {
                if !rule.negated {
                    return Some(&rule.source);
                }
            }
            end += pos + 1;
        }

        match self.last_match(local, is_dir) {
            Some(rule) if !rule.negated => Some(&rule.source),
            _ => None,
        }
    }
}

/// User-declared include globs.
///
/// A glob matches when it matches the relative path or the file name.
#[derive(Debug, Clone)]
pub struct IncludePatterns {
    set: GlobSet,
    sources: Vec<String>,
    /// Literal leading directories of each glob, e.g. `docs/private`
    /// for `docs/private/*.md`.
    prefixes: Vec<String>,
}

impl IncludePatterns {
    /// Compile include globs. Invalid globs are returned as an error
    /// message naming the pattern.
    pub fn new(patterns: &[String]) -> Result<Self, String> {
        let mut builder = GlobSetBuilder::new();
        let mut prefixes = Vec::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| format!("invalid include pattern '{}': {}", pattern, e))?;
            builder.add(glob);
            prefixes.push(literal_prefix(pattern));
        }
        let set = builder
            .build()
            .map_err(|e| format!("invalid include patterns: {}", e))?;
        Ok(Self {
            set,
            sources: patterns.to_vec(),
            prefixes,
        })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            sources: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The first include glob matching the file, if any.
    pub fn matched(&self, rel_path: &str) -> Option<&str> {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let mut hits = self.set.matches(rel_path);
        if hits.is_empty() {
            hits = self.set.matches(name);
        }
        hits.first().map(|&i| self.sources[i].as_str())
    }

    /// Whether some include glob may match a file beneath `dir`, which
    /// keeps the directory from being pruned.
    ///
    /// Globs without a literal leading directory (like `**/*.md`) never
    /// protect a directory.
    pub fn protects_dir(&self, dir: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            !prefix.is_empty()
                && (prefix == dir
                    || prefix
                        .strip_prefix(dir)
                        .is_some_and(|rest| rest.starts_with('/'))
                    || dir
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/')))
        })
    }
}

fn literal_prefix(pattern: &str) -> String {
    let pattern = pattern.trim_start_matches('/');
    let components: Vec<&str> = pattern.split('/').collect();
    let literal: Vec<&str> = components
        .iter()
        .take(components.len().saturating_sub(1))
        .take_while(|c| !c.contains(|ch: char| matches!(ch, '*' | '?' | '[' | '{')))
        .copied()
        .collect();
    literal.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blanks_skipped() {
        let rules = IgnoreRules::parse("", "# comment\n\n   \n*.log\n");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.is_ignored("app.log", false), Some("*.log"));
    }

    #[test]
    fn test_basename_matches_any_depth() {
        let rules = IgnoreRules::parse("", "*.tmp");
        assert!(rules.is_ignored("a/b/c.tmp", false).is_some());
        assert!(rules.is_ignored("c.txt", false).is_none());
    }

    #[test]
    fn test_negation_last_rule_wins() {
        let rules = IgnoreRules::parse("", "*.md\n!keep.md");
        assert!(rules.is_ignored("drop.md", false).is_some());
        assert!(rules.is_ignored("keep.md", false).is_none());
        assert!(rules.is_ignored("docs/keep.md", false).is_none());
    }

    #[test]
    fn test_directory_marker() {
        let rules = IgnoreRules::parse("", "drafts/");
        assert!(rules.is_ignored("drafts", true).is_some());
        assert!(rules.is_ignored("drafts", false).is_none());
        // files beneath an ignored directory are ignored too
        assert!(rules.is_ignored("drafts/today.md", false).is_some());
        assert!(rules.is_ignored("notes/drafts/today.md", false).is_some());
    }

    #[test]
    fn test_negation_cannot_reach_into_ignored_dir() {
        let rules = IgnoreRules::parse("", "private/\n!private/ok.md");
        assert!(rules.is_ignored("private/ok.md", false).is_some());
    }

    #[test]
    fn test_anchored_patterns() {
        let rules = IgnoreRules::parse("", "/build\ndocs/*.html");
        assert!(rules.is_ignored("build", true).is_some());
        assert!(rules.is_ignored("src/build", true).is_none());
        assert!(rules.is_ignored("docs/index.html", false).is_some());
        assert!(rules.is_ignored("docs/api/index.html", false).is_none());
        assert!(rules.is_ignored("other/docs/index.html", false).is_none());
    }

    #[test]
    fn test_double_star() {
        let rules = IgnoreRules::parse("", "docs/**/draft-*.md");
        assert!(rules.is_ignored("docs/draft-1.md", false).is_some());
        assert!(rules.is_ignored("docs/a/b/draft-2.md", false).is_some());
    }

    #[test]
    fn test_scoped_to_base_directory() {
        let rules = IgnoreRules::parse("projects/alpha", "*.csv\n/raw");
        assert!(rules.is_ignored("projects/alpha/data.csv", false).is_some());
        assert!(rules.is_ignored("projects/alpha/raw/x.txt", false).is_some());
        assert!(rules.is_ignored("projects/beta/data.csv", false).is_none());
        assert!(rules.is_ignored("raw/x.txt", false).is_none());
    }

    #[test]
    fn test_escaped_hash() {
        let rules = IgnoreRules::parse("", "\\#notes.md");
        assert!(rules.is_ignored("#notes.md", false).is_some());
    }

    #[test]
    fn test_include_matching() {
        let inc = IncludePatterns::new(&["*.lock".to_string(), "vendor/docs/*.md".to_string()])
            .unwrap();
        assert_eq!(inc.matched("Cargo.lock"), Some("*.lock"));
        assert_eq!(inc.matched("vendor/docs/guide.md"), Some("vendor/docs/*.md"));
        assert_eq!(inc.matched("src/main.rs"), None);
    }

    #[test]
    fn test_include_protects_directories() {
        let inc = IncludePatterns::new(&["vendor/docs/*.md".to_string(), "**/*.md".to_string()])
            .unwrap();
        assert!(inc.protects_dir("vendor"));
        assert!(inc.protects_dir("vendor/docs"));
        assert!(!inc.protects_dir("vendor/lib"));
        assert!(!inc.protects_dir("node_modules"));
        assert!(!inc.protects_dir("vend"));
    }

    #[test]
    fn test_include_rejects_bad_glob() {
        assert!(IncludePatterns::new(&["a[".to_string()]).is_err());
    }
}
