//! Dry-run admission report.
//!
//! Runs the scanner without reading documents fully, embedding or writing
//! anything, and reports what an index run would take in and what it
//! would skip, grouped by rejection reason.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use knowledge_harness_core::filter::{Preset, RejectReason};

use crate::config::FilterConfig;
use crate::scanner::{ScanReport, Scanner};

/// Admitted paths listed in a preview.
pub const PREVIEW_PATHS: usize = 50;
/// Example paths listed per rejection reason.
pub const SKIP_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SkipGroup {
    pub count: u64,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub root: PathBuf,
    pub preset: Preset,
    pub high_risk: bool,
    pub total_files: u64,
    pub will_index: u64,
    pub will_skip: u64,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    pub index_preview: Vec<String>,
    pub skip_summary: BTreeMap<RejectReason, SkipGroup>,
}

impl From<&ScanReport> for Preview {
    fn from(report: &ScanReport) -> Self {
        let mut skip_summary: BTreeMap<RejectReason, SkipGroup> = BTreeMap::new();
        for decision in &report.decisions {
            if let Some(reason) = decision.reason() {
                let group = skip_summary.entry(reason).or_insert(SkipGroup {
                    count: 0,
                    examples: Vec::new(),
                });
                group.count += 1;
                if group.examples.len() < SKIP_EXAMPLES {
                    group.examples.push(decision.path.clone());
                }
            }
        }

        Preview {
            root: report.root.clone(),
            preset: report.preset,
            high_risk: report.preset.is_high_risk(),
            total_files: report.stats.scanned,
            will_index: report.stats.admitted,
            will_skip: report.stats.rejected_total(),
            rejected_by_reason: report.stats.rejected.clone(),
            index_preview: report.admitted.iter().take(PREVIEW_PATHS).cloned().collect(),
            skip_summary,
        }
    }
}

/// Scan `root` and build a preview. Writes nothing.
pub async fn preview(root: &Path, filter: &FilterConfig, preset: Option<Preset>) -> Result<Preview> {
    let mut scanner = Scanner::new(root, filter, preset)?;
    let report = tokio::task::spawn_blocking(move || scanner.scan()).await?;
    Ok(Preview::from(&report))
}

pub async fn run_preview(
    root: &Path,
    filter: &FilterConfig,
    preset: Option<Preset>,
    json: bool,
) -> Result<()> {
    let preview = preview(root, filter, preset).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    println!("preview {} (preset: {})", preview.root.display(), preview.preset);
    if preview.high_risk {
        println!("  WARNING: preset 'none' admits almost everything; only sensitive names are blocked");
    }
    println!("  entries scanned: {}", preview.total_files);
    println!("  will index:      {}", preview.will_index);
    println!("  will skip:       {}", preview.will_skip);

    if !preview.skip_summary.is_empty() {
        println!();
        for (reason, group) in &preview.skip_summary {
            println!("  {:<18} {:>6}", reason.as_str(), group.count);
            for example in &group.examples {
                println!("      {}", example);
            }
        }
    }

    if !preview.index_preview.is_empty() {
        println!();
        println!("  first files to index:");
        for path in &preview.index_preview {
            println!("    {}", path);
        }
        let rest = preview.will_index.saturating_sub(preview.index_preview.len() as u64);
        if rest > 0 {
            println!("    ... and {} more", rest);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_preview_payload() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "notes.md", &"meeting notes\n".repeat(36));
        write(tmp.path(), ".env", "SECRET=abcdefghijkl");
        write(tmp.path(), "node_modules/pkg/index.js", &"x\n".repeat(1000));

        let p = preview(tmp.path(), &FilterConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(p.preset, Preset::Notes);
        assert!(!p.high_risk);
        assert_eq!(p.will_index, 1);
        assert_eq!(p.will_skip, 2);
        assert_eq!(p.index_preview, vec!["notes.md".to_string()]);
        let sensitive = &p.skip_summary[&RejectReason::SensitiveName];
        assert_eq!(sensitive.count, 1);
        assert_eq!(sensitive.examples, vec![".env".to_string()]);

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["preset"], "notes");
        assert_eq!(json["rejected_by_reason"]["pattern"], 1);
        assert_eq!(json["skip_summary"]["sensitive-name"]["count"], 1);
    }

    #[tokio::test]
    async fn test_none_preset_is_high_risk() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.txt", "hello");
        let p = preview(tmp.path(), &FilterConfig::default(), Some(Preset::None))
            .await
            .unwrap();
        assert!(p.high_risk);
        assert_eq!(p.will_index, 1);
    }

    #[tokio::test]
    async fn test_examples_are_capped() {
        let tmp = TempDir::new().unwrap();
        for i in 0..8 {
            write(tmp.path(), &format!("f{}.png", i), "not really an image");
        }
        let p = preview(tmp.path(), &FilterConfig::default(), None)
            .await
            .unwrap();
        let pattern = &p.skip_summary[&RejectReason::Pattern];
        assert_eq!(pattern.count, 8);
        assert_eq!(pattern.examples.len(), SKIP_EXAMPLES);
    }
}
