//! Named filter presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much of the built-in directory exclusion table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryTier {
    /// No directory is pruned by the built-in tables.
    Off,
    /// Version control, dependency, environment, IDE and cache directories.
    Standard,
    /// `Standard` plus build output, coverage, site output, logs and temp.
    Aggressive,
}

/// A named filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// `Code` when the root holds a project marker, `Notes` otherwise.
    Auto,
    Code,
    Notes,
    Research,
    Default,
    /// Only the sensitive-name block applies. High risk.
    None,
}

/// Effective knobs of a resolved preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetOptions {
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub sensitive_scan: bool,
    pub directory_tier: DirectoryTier,
    /// Apply the built-in file exclusion table.
    pub file_exclusions: bool,
    /// Apply generated/minified/binary content heuristics.
    pub quality_checks: bool,
    /// Lift the PDF exclusion.
    pub admit_pdf: bool,
}

const MB: u64 = 1024 * 1024;

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Auto,
        Preset::Code,
        Preset::Notes,
        Preset::Research,
        Preset::Default,
        Preset::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Auto => "auto",
            Preset::Code => "code",
            Preset::Notes => "notes",
            Preset::Research => "research",
            Preset::Default => "default",
            Preset::None => "none",
        }
    }

    /// Resolve `Auto` into a concrete preset. Other presets are unchanged.
    pub fn resolve(self, is_code_project: bool) -> Preset {
        match self {
            Preset::Auto if is_code_project => Preset::Code,
            Preset::Auto => Preset::Notes,
            other => other,
        }
    }

    pub fn is_high_risk(&self) -> bool {
        matches!(self, Preset::None)
    }

    /// Options for a resolved preset. `Auto` maps to the `Notes` options;
    /// resolve it first to honour project markers.
    pub fn options(&self) -> PresetOptions {
        match self {
            Preset::Code => PresetOptions {
                min_size: Some(10),
                max_size: Some(5 * MB),
                sensitive_scan: true,
                directory_tier: DirectoryTier::Aggressive,
                file_exclusions: true,
                quality_checks: true,
                admit_pdf: false,
            },
            Preset::Notes | Preset::Auto => PresetOptions {
                min_size: Some(10),
                max_size: Some(50 * MB),
                sensitive_scan: false,
                directory_tier: DirectoryTier::Standard,
                file_exclusions: true,
                quality_checks: true,
                admit_pdf: false,
            },
            Preset::Research => PresetOptions {
                min_size: Some(100),
                max_size: Some(100 * MB),
                sensitive_scan: false,
                directory_tier: DirectoryTier::Standard,
                file_exclusions: true,
                quality_checks: true,
                admit_pdf: true,
            },
            Preset::Default => PresetOptions {
                min_size: Some(50),
                max_size: Some(10 * MB),
                sensitive_scan: true,
                directory_tier: DirectoryTier::Aggressive,
                file_exclusions: true,
                quality_checks: true,
                admit_pdf: false,
            },
            Preset::None => PresetOptions {
                min_size: None,
                max_size: None,
                sensitive_scan: false,
                directory_tier: DirectoryTier::Off,
                file_exclusions: false,
                quality_checks: false,
                admit_pdf: true,
            },
        }
    }
}

impl PresetOptions {
    /// Apply user overrides on top of preset defaults.
    pub fn with_overrides(
        mut self,
        min_size: Option<u64>,
        max_size: Option<u64>,
        sensitive_scan: Option<bool>,
    ) -> Self {
        if min_size.is_some() {
            self.min_size = min_size;
        }
        if max_size.is_some() {
            self.max_size = max_size;
        }
        if let Some(scan) = sensitive_scan {
            self.sensitive_scan = scan;
        }
        self
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown filter preset '{}'. Use auto, code, notes, research, default, or none.",
                    s
                )
            })
    }
}
