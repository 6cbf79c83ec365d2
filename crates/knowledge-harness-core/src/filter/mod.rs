//! Content admission filter.
//!
//! Decides, per path, whether content may enter a knowledge base. The filter
//! is pure: it never touches the filesystem. The caller enumerates entries,
//! optionally reads a content peek, and hands each entry over as a
//! [`Candidate`].
//!
//! # Rule order
//!
//! First match wins:
//!
//! 1. sensitive names (credential files, keys, env files, cloud configs):
//!    always rejected, whatever the preset or include list says
//! 2. explicit includes: admitted, but still scanned for secrets when a
//!    peek is available
//! 3. custom ignore rules (user list and per-directory ignore files)
//! 4. built-in directory and file exclusions
//! 5. size bounds of the active preset
//! 6. content: secret patterns (when scanning is enabled), then binary,
//!    minified and generated-file heuristics
//!
//! The `none` preset keeps step 1 and skips 3 to 6.
//!
//! Directories are evaluated too. A rejected directory must not be
//! descended into; its whole subtree counts as one rejection.

mod content;
pub mod pattern;
pub mod preset;
pub mod rules;

use std::collections::BTreeMap;
use std::fmt;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{KbError, Result};
use content::ContentRules;
pub use content::SECRET_SCAN_BYTES;
pub use pattern::{IgnoreRules, IncludePatterns};
pub use preset::{DirectoryTier, Preset, PresetOptions};
pub use rules::RuleSet;

/// Why a path was kept out of the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Pattern,
    SensitiveName,
    SensitiveContent,
    Size,
    /// Binary content, or a path that could not be read at all.
    Binary,
    Quality,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Pattern => "pattern",
            RejectReason::SensitiveName => "sensitive-name",
            RejectReason::SensitiveContent => "sensitive-content",
            RejectReason::Size => "size",
            RejectReason::Binary => "binary",
            RejectReason::Quality => "quality",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

/// Outcome of evaluating one path. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub path: String,
    pub verdict: Verdict,
    /// The rule that decided, e.g. `sensitive-name: *.pem`.
    pub matched_rule: Option<String>,
}

impl AdmissionDecision {
    pub fn admit(path: &str, rule: Option<String>) -> Self {
        Self {
            path: path.to_string(),
            verdict: Verdict::Admit,
            matched_rule: rule,
        }
    }

    pub fn reject(path: &str, reason: RejectReason, rule: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            verdict: Verdict::Reject(reason),
            matched_rule: Some(rule.into()),
        }
    }

    /// A path that could not be read (permission error, broken link).
    pub fn unreadable(path: &str, cause: &str) -> Self {
        Self::reject(path, RejectReason::Binary, format!("unreadable: {}", cause))
    }

    pub fn is_admitted(&self) -> bool {
        self.verdict == Verdict::Admit
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self.verdict {
            Verdict::Admit => None,
            Verdict::Reject(reason) => Some(reason),
        }
    }
}

/// One directory entry as seen by the filter.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Path relative to the scan root, `/`-separated.
    pub path: &'a str,
    pub is_dir: bool,
    pub size: u64,
    /// Leading text of the file, when the caller read it.
    pub peek: Option<&'a str>,
}

impl<'a> Candidate<'a> {
    pub fn file(path: &'a str, size: u64) -> Self {
        Self {
            path,
            is_dir: false,
            size,
            peek: None,
        }
    }

    pub fn dir(path: &'a str) -> Self {
        Self {
            path,
            is_dir: true,
            size: 0,
            peek: None,
        }
    }

    pub fn with_peek(mut self, peek: &'a str) -> Self {
        self.peek = Some(peek);
        self
    }
}

/// User-facing filter configuration.
#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    pub preset: Option<Preset>,
    pub include: Vec<String>,
    pub ignore: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub sensitive_scan: Option<bool>,
}

/// Case-insensitive globs split into name globs and path globs.
#[derive(Debug, Clone)]
struct NameMatcher {
    names: GlobSet,
    name_sources: Vec<String>,
    paths: GlobSet,
    path_sources: Vec<String>,
}

impl NameMatcher {
    fn new<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Result<Self> {
        let mut names = GlobSetBuilder::new();
        let mut name_sources = Vec::new();
        let mut paths = GlobSetBuilder::new();
        let mut path_sources = Vec::new();
        for pattern in patterns {
            let (builder, sources, glob) = if pattern.contains('/') {
                (&mut paths, &mut path_sources, format!("**/{}", pattern))
            } else {
                (&mut names, &mut name_sources, pattern.clone())
            };
            let compiled = GlobBuilder::new(&glob)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| KbError::InvalidInput(format!("bad glob '{}': {}", pattern, e)))?;
            builder.add(compiled);
            sources.push(pattern.clone());
        }
        let build = |b: GlobSetBuilder| {
            b.build()
                .map_err(|e| KbError::InvalidInput(format!("bad glob set: {}", e)))
        };
        Ok(Self {
            names: build(names)?,
            name_sources,
            paths: build(paths)?,
            path_sources,
        })
    }

    fn find(&self, rel_path: &str) -> Option<&str> {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if let Some(&i) = self.names.matches(name).first() {
            return Some(&self.name_sources[i]);
        }
        self.paths
            .matches(rel_path)
            .first()
            .map(|&i| self.path_sources[i].as_str())
    }

    /// Match any ancestor directory of `rel_path` by name.
    fn find_ancestor(&self, rel_path: &str) -> Option<&str> {
        let mut end = 0;
        while let Some(pos) = rel_path[end..].find('/') {
            let ancestor = &rel_path[..end + pos];
            if let Some(rule) = self.find(ancestor) {
                return Some(rule);
            }
            end += pos + 1;
        }
        None
    }
}

/// The admission filter for one scan root.
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    preset: Preset,
    options: PresetOptions,
    sensitive_names: NameMatcher,
    sensitive_dirs: NameMatcher,
    excluded_dirs: NameMatcher,
    excluded_files: NameMatcher,
    content: ContentRules,
    ignore: IgnoreRules,
    include: IncludePatterns,
}

impl AdmissionFilter {
    /// Build a filter from rule tables, user settings and the names of the
    /// root directory's entries (consulted by the `auto` preset).
    pub fn new(rules: &RuleSet, settings: &FilterSettings, root_entries: &[String]) -> Result<Self> {
        let requested = settings.preset.unwrap_or(Preset::Auto);
        let preset = requested.resolve(rules.is_code_project(root_entries.iter().map(String::as_str)));
        let options = preset.options().with_overrides(
            settings.min_size,
            settings.max_size,
            settings.sensitive_scan,
        );

        let sensitive_dir_patterns: Vec<String> = rules
            .sensitive_names
            .iter()
            .filter_map(|p| p.strip_suffix("/**").map(str::to_string))
            .collect();

        let mut dir_patterns: Vec<&String> = Vec::new();
        if options.directory_tier != DirectoryTier::Off {
            dir_patterns.extend(&rules.standard_dirs);
        }
        if options.directory_tier == DirectoryTier::Aggressive {
            dir_patterns.extend(&rules.aggressive_dirs);
        }

        let file_patterns: Vec<&String> = if options.file_exclusions {
            rules
                .excluded_files
                .iter()
                .filter(|p| !(options.admit_pdf && p.eq_ignore_ascii_case("*.pdf")))
                .collect()
        } else {
            Vec::new()
        };

        let content = ContentRules::new(&rules.sensitive_content, &rules.generated_markers)
            .map_err(KbError::InvalidInput)?;
        let include = IncludePatterns::new(&settings.include).map_err(KbError::InvalidInput)?;

        Ok(Self {
            preset,
            options,
            sensitive_names: NameMatcher::new(&rules.sensitive_names)?,
            sensitive_dirs: NameMatcher::new(&sensitive_dir_patterns)?,
            excluded_dirs: NameMatcher::new(dir_patterns)?,
            excluded_files: NameMatcher::new(file_patterns)?,
            content,
            ignore: IgnoreRules::from_patterns("", &settings.ignore),
            include,
        })
    }

    /// The resolved preset (never `Auto`).
    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn options(&self) -> &PresetOptions {
        &self.options
    }

    /// Whether a content peek can change the decision for admitted names.
    pub fn wants_peek(&self) -> bool {
        self.options.sensitive_scan || self.options.quality_checks || !self.include.is_empty()
    }

    pub fn evaluate(&self, candidate: &Candidate<'_>) -> AdmissionDecision {
        self.evaluate_scoped(candidate, &[])
    }

    /// Evaluate with extra per-directory ignore rules in effect.
    pub fn evaluate_scoped(
        &self,
        candidate: &Candidate<'_>,
        local_ignores: &[&IgnoreRules],
    ) -> AdmissionDecision {
        if candidate.is_dir {
            self.evaluate_dir(candidate.path, local_ignores)
        } else {
            self.evaluate_file(candidate, local_ignores)
        }
    }

    fn custom_ignore(&self, path: &str, is_dir: bool, local: &[&IgnoreRules]) -> Option<String> {
        self.ignore
            .is_ignored(path, is_dir)
            .or_else(|| local.iter().find_map(|rules| rules.is_ignored(path, is_dir)))
            .map(|rule| format!("ignore: {}", rule))
    }

    fn evaluate_dir(&self, path: &str, local: &[&IgnoreRules]) -> AdmissionDecision {
        if let Some(rule) = self.sensitive_dirs.find(path) {
            return AdmissionDecision::reject(
                path,
                RejectReason::SensitiveName,
                format!("sensitive-name: {}/", rule),
            );
        }
        if self.include.protects_dir(path) || self.preset == Preset::None {
            return AdmissionDecision::admit(path, None);
        }
        if let Some(rule) = self.custom_ignore(path, true, local) {
            return AdmissionDecision::reject(path, RejectReason::Pattern, rule);
        }
        if let Some(rule) = self.excluded_dirs.find(path) {
            return AdmissionDecision::reject(
                path,
                RejectReason::Pattern,
                format!("excluded directory: {}", rule),
            );
        }
        AdmissionDecision::admit(path, None)
    }

    fn evaluate_file(&self, c: &Candidate<'_>, local: &[&IgnoreRules]) -> AdmissionDecision {
        let path = c.path;

        if let Some(rule) = self
            .sensitive_names
            .find(path)
            .or_else(|| self.sensitive_dirs.find_ancestor(path))
        {
            return AdmissionDecision::reject(
                path,
                RejectReason::SensitiveName,
                format!("sensitive-name: {}", rule),
            );
        }

        if let Some(rule) = self.include.matched(path) {
            if let Some(secret) = c.peek.and_then(|peek| self.content.find_secret(peek)) {
                return AdmissionDecision::reject(
                    path,
                    RejectReason::SensitiveContent,
                    format!("sensitive-content: {}", secret),
                );
            }
            return AdmissionDecision::admit(path, Some(format!("include: {}", rule)));
        }

        if self.preset == Preset::None {
            return AdmissionDecision::admit(path, None);
        }

        if let Some(rule) = self.custom_ignore(path, false, local) {
            return AdmissionDecision::reject(path, RejectReason::Pattern, rule);
        }

        if let Some(rule) = self.excluded_dirs.find_ancestor(path) {
            return AdmissionDecision::reject(
                path,
                RejectReason::Pattern,
                format!("excluded directory: {}", rule),
            );
        }
        if let Some(rule) = self.excluded_files.find(path) {
            return AdmissionDecision::reject(
                path,
                RejectReason::Pattern,
                format!("excluded file: {}", rule),
            );
        }

        if let Some(min) = self.options.min_size {
            if c.size < min {
                return AdmissionDecision::reject(
                    path,
                    RejectReason::Size,
                    format!("size: {} bytes < minimum {}", c.size, min),
                );
            }
        }
        if let Some(max) = self.options.max_size {
            if c.size > max {
                return AdmissionDecision::reject(
                    path,
                    RejectReason::Size,
                    format!("size: {} bytes > maximum {}", c.size, max),
                );
            }
        }

        if let Some(peek) = c.peek {
            if self.options.sensitive_scan {
                if let Some(secret) = self.content.find_secret(peek) {
                    return AdmissionDecision::reject(
                        path,
                        RejectReason::SensitiveContent,
                        format!("sensitive-content: {}", secret),
                    );
                }
            }
            if self.options.quality_checks {
                if let Some((reason, rule)) = self.content.quality_issue(peek) {
                    return AdmissionDecision::reject(path, reason, rule);
                }
            }
        }

        AdmissionDecision::admit(path, None)
    }
}

/// Aggregated admission counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Entries evaluated (pruned directories count once).
    pub scanned: u64,
    pub admitted: u64,
    pub rejected: BTreeMap<RejectReason, u64>,
}

impl FilterStats {
    pub fn record(&mut self, decision: &AdmissionDecision) {
        self.scanned += 1;
        match decision.verdict {
            Verdict::Admit => self.admitted += 1,
            Verdict::Reject(reason) => *self.rejected.entry(reason).or_insert(0) += 1,
        }
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn merge(&mut self, other: &FilterStats) {
        self.scanned += other.scanned;
        self.admitted += other.admitted;
        for (reason, count) in &other.rejected {
            *self.rejected.entry(*reason).or_insert(0) += count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(preset: Preset) -> AdmissionFilter {
        let settings = FilterSettings {
            preset: Some(preset),
            ..Default::default()
        };
        AdmissionFilter::new(&RuleSet::builtin(), &settings, &[]).unwrap()
    }

    fn file(f: &AdmissionFilter, path: &str, size: u64) -> AdmissionDecision {
        f.evaluate(&Candidate::file(path, size))
    }

    #[test]
    fn test_sensitive_names_rejected_under_every_preset() {
        let names = [
            ".env",
            ".env.production",
            "config/credentials.json",
            "id_rsa",
            "server.pem",
            "home/.ssh/config",
            "deploy/prod.tfvars",
            ".aws/credentials",
            "service-account-prod.json",
            ".bash_history",
        ];
        for preset in Preset::ALL {
            let f = filter(preset);
            for name in names {
                let d = file(&f, name, 500);
                assert_eq!(
                    d.reason(),
                    Some(RejectReason::SensitiveName),
                    "{name} under {preset}"
                );
            }
        }
    }

    #[test]
    fn test_sensitive_name_beats_include() {
        let settings = FilterSettings {
            preset: Some(Preset::Notes),
            include: vec!["*.pem".to_string(), ".env".to_string()],
            ..Default::default()
        };
        let f = AdmissionFilter::new(&RuleSet::builtin(), &settings, &[]).unwrap();
        assert_eq!(file(&f, "cert.pem", 500).reason(), Some(RejectReason::SensitiveName));
        assert_eq!(file(&f, ".env", 500).reason(), Some(RejectReason::SensitiveName));
    }

    #[test]
    fn test_include_overrides_exclusions_but_not_secrets() {
        let settings = FilterSettings {
            preset: Some(Preset::Code),
            include: vec!["Cargo.lock".to_string(), "vendor/**".to_string()],
            ..Default::default()
        };
        let f = AdmissionFilter::new(&RuleSet::builtin(), &settings, &[]).unwrap();
        let d = file(&f, "Cargo.lock", 1);
        assert!(d.is_admitted());
        assert_eq!(d.matched_rule.as_deref(), Some("include: Cargo.lock"));
        assert!(f.evaluate(&Candidate::dir("vendor")).is_admitted());

        let secret = format!("key = sk-{}", "a".repeat(48));
        let d = f.evaluate(&Candidate::file("vendor/notes.txt", 900).with_peek(&secret));
        assert_eq!(d.reason(), Some(RejectReason::SensitiveContent));
    }

    #[test]
    fn test_builtin_directory_exclusion() {
        let f = filter(Preset::Notes);
        let d = f.evaluate(&Candidate::dir("node_modules"));
        assert_eq!(d.reason(), Some(RejectReason::Pattern));
        let d = f.evaluate(&Candidate::dir("src/.git"));
        assert_eq!(d.reason(), Some(RejectReason::Pattern));
        // standard tier keeps build output
        assert!(f.evaluate(&Candidate::dir("build")).is_admitted());
        assert_eq!(
            filter(Preset::Code)
                .evaluate(&Candidate::dir("build"))
                .reason(),
            Some(RejectReason::Pattern)
        );
        // files under excluded directories are rejected when evaluated alone
        assert_eq!(
            file(&f, "node_modules/pkg/index.js", 2000).reason(),
            Some(RejectReason::Pattern)
        );
    }

    #[test]
    fn test_sensitive_directory_pruned_even_without_filter() {
        let f = filter(Preset::None);
        let d = f.evaluate(&Candidate::dir("home/.ssh"));
        assert_eq!(d.reason(), Some(RejectReason::SensitiveName));
        assert!(f.evaluate(&Candidate::dir("node_modules")).is_admitted());
    }

    #[test]
    fn test_excluded_files() {
        let f = filter(Preset::Code);
        for name in ["package-lock.json", "app.min.js", "logo.PNG", "lib.so", "paper.pdf"] {
            assert_eq!(file(&f, name, 500).reason(), Some(RejectReason::Pattern), "{name}");
        }
        assert!(file(&filter(Preset::Research), "paper.pdf", 5000).is_admitted());
    }

    #[test]
    fn test_size_bounds() {
        let f = filter(Preset::Default);
        assert_eq!(file(&f, "tiny.md", 10).reason(), Some(RejectReason::Size));
        assert_eq!(
            file(&f, "huge.md", 11 * 1024 * 1024).reason(),
            Some(RejectReason::Size)
        );
        assert!(file(&f, "fine.md", 5000).is_admitted());
        assert!(file(&filter(Preset::None), "tiny.md", 0).is_admitted());
    }

    #[test]
    fn test_content_scan_respects_preset() {
        let peek = "aws_secret_access_key = abcdefghijklmnopqrstuvwxyz0123456789ABCD";
        let code = filter(Preset::Code);
        let d = code.evaluate(&Candidate::file("deploy.sh", 500).with_peek(peek));
        assert_eq!(d.reason(), Some(RejectReason::SensitiveContent));

        let notes = filter(Preset::Notes);
        assert!(notes
            .evaluate(&Candidate::file("deploy.md", 500).with_peek(peek))
            .is_admitted());
    }

    #[test]
    fn test_quality_heuristics() {
        let f = filter(Preset::Code);
        let d = f.evaluate(
            &Candidate::file("schema.rs", 500).with_peek("// @generated by build.rs\nfn x() {}\n"),
        );
        assert_eq!(d.reason(), Some(RejectReason::Quality));
        let d = f.evaluate(&Candidate::file("blob.txt", 500).with_peek("ab\0cd"));
        assert_eq!(d.reason(), Some(RejectReason::Binary));
    }

    #[test]
    fn test_custom_ignore_rules() {
        let settings = FilterSettings {
            preset: Some(Preset::Notes),
            ignore: vec!["drafts/".to_string(), "*.log".to_string()],
            ..Default::default()
        };
        let f = AdmissionFilter::new(&RuleSet::builtin(), &settings, &[]).unwrap();
        assert_eq!(
            f.evaluate(&Candidate::dir("drafts")).reason(),
            Some(RejectReason::Pattern)
        );
        assert_eq!(file(&f, "run.log", 500).reason(), Some(RejectReason::Pattern));

        let local = IgnoreRules::parse("journal", "private-*.md");
        let d = f.evaluate_scoped(&Candidate::file("journal/private-1.md", 500), &[&local]);
        assert_eq!(d.reason(), Some(RejectReason::Pattern));
        let d = f.evaluate_scoped(&Candidate::file("private-1.md", 500), &[&local]);
        assert!(d.is_admitted());
    }

    #[test]
    fn test_auto_preset_uses_project_markers() {
        let settings = FilterSettings::default();
        let rules = RuleSet::builtin();
        let code = AdmissionFilter::new(&rules, &settings, &["Cargo.toml".to_string()]).unwrap();
        assert_eq!(code.preset(), Preset::Code);
        let notes = AdmissionFilter::new(&rules, &settings, &["notes.md".to_string()]).unwrap();
        assert_eq!(notes.preset(), Preset::Notes);
    }

    #[test]
    fn test_parallel_filters_with_different_tables() {
        let mut custom = RuleSet::empty();
        custom.sensitive_names.push("*.private".to_string());
        let settings = FilterSettings {
            preset: Some(Preset::Notes),
            ..Default::default()
        };
        let strict = AdmissionFilter::new(&custom, &settings, &[]).unwrap();
        let builtin = AdmissionFilter::new(&RuleSet::builtin(), &settings, &[]).unwrap();
        assert_eq!(
            file(&strict, "a.private", 500).reason(),
            Some(RejectReason::SensitiveName)
        );
        assert!(file(&builtin, "a.private", 500).is_admitted());
        assert!(file(&strict, ".env", 500).is_admitted());
    }

    #[test]
    fn test_stats_histogram() {
        let f = filter(Preset::Notes);
        let mut stats = FilterStats::default();
        stats.record(&file(&f, "notes.md", 500));
        stats.record(&file(&f, ".env", 20));
        stats.record(&f.evaluate(&Candidate::dir("node_modules")));
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.rejected.get(&RejectReason::SensitiveName), Some(&1));
        assert_eq!(stats.rejected.get(&RejectReason::Pattern), Some(&1));
        assert_eq!(stats.rejected_total(), 2);
    }

    #[test]
    fn test_unreadable_is_binary() {
        let d = AdmissionDecision::unreadable("locked.md", "permission denied");
        assert_eq!(d.reason(), Some(RejectReason::Binary));
        assert_eq!(d.matched_rule.as_deref(), Some("unreadable: permission denied"));
    }

    #[test]
    fn test_decision_json_shape() {
        let d = AdmissionDecision::reject(".env", RejectReason::SensitiveName, "sensitive-name: .env");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["verdict"]["reject"], "sensitive-name");
        let admitted = serde_json::to_value(AdmissionDecision::admit("a.md", None)).unwrap();
        assert_eq!(admitted["verdict"], "admit");
    }
}
