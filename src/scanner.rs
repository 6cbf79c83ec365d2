//! Directory traversal feeding the admission filter.
//!
//! Walks a root with `walkdir`, hands every entry to the
//! [`AdmissionFilter`] and prunes rejected directories without descending
//! into them. Per-directory ignore files are loaded as directories are
//! entered and scoped to the directory that holds them.
//!
//! Entries are visited in file-name order so reports are deterministic.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use knowledge_harness_core::filter::{
    AdmissionDecision, AdmissionFilter, Candidate, FilterStats, IgnoreRules, Preset, RuleSet,
};
use knowledge_harness_core::models::DocumentKind;

use crate::config::FilterConfig;

/// Bytes read from a text-like file for content heuristics.
pub const PEEK_BYTES: u64 = 50 * 1024;

/// Result of one traversal.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub root: PathBuf,
    pub preset: Preset,
    /// Every file decision plus pruned directories, in visit order.
    pub decisions: Vec<AdmissionDecision>,
    /// Admitted file paths, relative and `/`-separated.
    pub admitted: Vec<String>,
    pub stats: FilterStats,
}

impl ScanReport {
    fn record(&mut self, decision: AdmissionDecision, is_file: bool) {
        self.stats.record(&decision);
        if is_file && decision.is_admitted() {
            self.admitted.push(decision.path.clone());
        }
        self.decisions.push(decision);
    }
}

pub struct Scanner {
    root: PathBuf,
    filter: AdmissionFilter,
    ignore_file: String,
    /// Ignore rules by directory; `None` when the directory has no ignore file.
    local: BTreeMap<String, Option<IgnoreRules>>,
}

impl Scanner {
    /// Build a scanner for `root`, resolving the `auto` preset from the
    /// root's entries.
    pub fn new(root: &Path, config: &FilterConfig, preset_override: Option<Preset>) -> Result<Self> {
        if !root.is_dir() {
            bail!("Root is not a directory: {}", root.display());
        }
        let root_entries: Vec<String> = std::fs::read_dir(root)
            .with_context(|| format!("Failed to read directory: {}", root.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();

        let settings = config.settings(preset_override)?;
        let filter = AdmissionFilter::new(&RuleSet::builtin(), &settings, &root_entries)?;

        Ok(Self {
            root: root.to_path_buf(),
            filter,
            ignore_file: config.ignore_file.clone(),
            local: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preset(&self) -> Preset {
        self.filter.preset()
    }

    /// Walk the whole root.
    pub fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport {
            root: self.root.clone(),
            preset: self.filter.preset(),
            decisions: Vec::new(),
            admitted: Vec::new(),
            stats: FilterStats::default(),
        };
        self.load_ignores("");

        let mut walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let rel = err.path().map(|p| self.relative(p)).unwrap_or_default();
                    if rel.is_empty() {
                        warn!(error = %err, "walk error");
                        continue;
                    }
                    let cause = err
                        .io_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| err.to_string());
                    warn!(path = %rel, %cause, "unreadable entry");
                    report.record(AdmissionDecision::unreadable(&rel, &cause), true);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let rel = self.relative(entry.path());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let decision = self.evaluate_dir(&rel);
                if decision.is_admitted() {
                    self.load_ignores(&rel);
                } else {
                    debug!(path = %rel, rule = ?decision.matched_rule, "pruned directory");
                    walker.skip_current_dir();
                    report.record(decision, false);
                }
                continue;
            }

            let size = if file_type.is_symlink() {
                match std::fs::metadata(entry.path()) {
                    Ok(meta) if meta.is_file() => meta.len(),
                    Ok(_) => continue,
                    Err(e) => {
                        let cause = format!("broken symlink: {}", e);
                        report.record(AdmissionDecision::unreadable(&rel, &cause), true);
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        report.record(AdmissionDecision::unreadable(&rel, &e.to_string()), true);
                        continue;
                    }
                }
            };

            let decision = self.evaluate_file(&rel, size);
            if !decision.is_admitted() {
                debug!(path = %rel, rule = ?decision.matched_rule, "rejected file");
            }
            report.record(decision, true);
        }

        report
    }

    /// Evaluate one file as a full scan would, including the rules of its
    /// ancestor directories. The file must exist.
    pub fn evaluate_path(&mut self, rel_path: &str) -> AdmissionDecision {
        let rel_path = rel_path.trim_matches('/');
        self.load_ignores("");

        let mut end = 0;
        while let Some(pos) = rel_path[end..].find('/') {
            let dir = &rel_path[..end + pos];
            let decision = self.evaluate_dir(dir);
            if let Some(reason) = decision.reason() {
                let rule = decision.matched_rule.unwrap_or_default();
                return AdmissionDecision::reject(rel_path, reason, rule);
            }
            self.load_ignores(dir);
            end += pos + 1;
        }

        match std::fs::metadata(self.root.join(rel_path)) {
            Ok(meta) => self.evaluate_file(rel_path, meta.len()),
            Err(e) => AdmissionDecision::unreadable(rel_path, &e.to_string()),
        }
    }

    fn evaluate_dir(&self, rel: &str) -> AdmissionDecision {
        let scoped = self.scoped(rel);
        self.filter.evaluate_scoped(&Candidate::dir(rel), &scoped)
    }

    fn evaluate_file(&self, rel: &str, size: u64) -> AdmissionDecision {
        let candidate = Candidate::file(rel, size);
        let scoped = self.scoped(rel);

        if !self.filter.wants_peek() || !DocumentKind::from_path(rel).is_text_like() {
            return self.filter.evaluate_scoped(&candidate, &scoped);
        }
        match read_peek(&self.root.join(rel)) {
            Ok(peek) => self
                .filter
                .evaluate_scoped(&candidate.with_peek(&peek), &scoped),
            Err(e) => AdmissionDecision::unreadable(rel, &e.to_string()),
        }
    }

    /// Ignore rules of every directory above `rel`, root first.
    fn scoped(&self, rel: &str) -> Vec<&IgnoreRules> {
        let mut dirs = vec![""];
        let mut end = 0;
        while let Some(pos) = rel[end..].find('/') {
            dirs.push(&rel[..end + pos]);
            end += pos + 1;
        }
        dirs.into_iter()
            .filter_map(|d| self.local.get(d).and_then(Option::as_ref))
            .collect()
    }

    fn load_ignores(&mut self, rel_dir: &str) {
        if self.local.contains_key(rel_dir) {
            return;
        }
        let path = self.root.join(rel_dir).join(&self.ignore_file);
        let rules = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let rules = IgnoreRules::parse(rel_dir, &text);
                for line in rules.invalid_lines() {
                    warn!(file = %path.display(), line = %line, "invalid ignore pattern");
                }
                Some(rules)
            }
            Err(_) => None,
        };
        self.local.insert(rel_dir.to_string(), rules);
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn read_peek(path: &Path) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    File::open(path)?.take(PEEK_BYTES).read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
