//! Merge-conflict detection and resolution.
//!
//! [`ConflictResolver`] drives the engine: it performs a trial merge in a
//! throwaway branch, classifies what it finds, and can rewrite conflicted
//! files according to a [`ResolutionStrategy`]. The marker-level parsing
//! lives in [`markers`].

pub mod markers;
mod resolver;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use markers::{apply_strategy, is_auto_resolvable, parse_conflict_markers, ConflictSection};
pub use resolver::ConflictResolver;

/// File extensions that normally hold binary content. Conflicts in these
/// cannot be resolved textually.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "jar", "so", "dylib", "dll",
    "exe", "bin", "woff", "woff2",
];

/// Extensions of configuration files, where silent auto-resolution tends
/// to produce broken deployments.
const CONFIG_EXTENSIONS: &[&str] =
    &["json", "yaml", "yml", "toml", "ini", "cfg", "env", "properties"];

/// What kind of conflict a file is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Competing textual edits inside the file.
    Content,
    /// The file is binary; no textual resolution possible.
    Binary,
    /// Renamed on one side, changed or renamed on the other.
    Rename,
    /// Deleted on one side, modified on the other.
    DeleteModify,
    /// Added independently on both sides.
    BothAdded,
    /// Modified on both sides (reported by merge output without content
    /// detail).
    BothModified,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::Content => "content",
            ConflictKind::Binary => "binary",
            ConflictKind::Rename => "rename",
            ConflictKind::DeleteModify => "delete_modify",
            ConflictKind::BothAdded => "both_added",
            ConflictKind::BothModified => "both_modified",
        };
        f.write_str(s)
    }
}

/// How a conflicted file should be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the current branch's side of every section.
    AcceptCurrent,
    /// Keep the incoming branch's side of every section.
    AcceptIncoming,
    /// Keep both sides, current first.
    AutoMerge,
    /// Leave the file for a human.
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionStrategy::AcceptCurrent => "accept_current",
            ResolutionStrategy::AcceptIncoming => "accept_incoming",
            ResolutionStrategy::AutoMerge => "auto_merge",
            ResolutionStrategy::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl ResolutionStrategy {
    /// The equivalent strategy when the merge runs in the opposite
    /// direction, where the current and incoming sides swap.
    pub fn flip_sides(self) -> Self {
        match self {
            Self::AcceptCurrent => Self::AcceptIncoming,
            Self::AcceptIncoming => Self::AcceptCurrent,
            other => other,
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "accept_current" => Some(Self::AcceptCurrent),
            "accept_incoming" => Some(Self::AcceptIncoming),
            "auto_merge" => Some(Self::AutoMerge),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Per-resolution-call strategy selection: a fixed strategy for every
/// file, or the per-conflict suggestion recorded at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyChoice {
    Fixed(ResolutionStrategy),
    /// Use each conflict's own suggested strategy.
    Smart,
}

/// How a conflict was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// A real `git merge` was attempted in a sandbox branch.
    TrialMerge,
    /// Fallback: overlap of changed paths between the branches. Cheaper,
    /// but cannot see section content.
    Diff,
}

/// One conflicted file, fully analyzed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub file_path: String,
    pub kind: ConflictKind,
    /// Parsed marker sections; empty for non-content kinds.
    pub sections: Vec<ConflictSection>,
    /// The strategy the engine would pick for this file.
    pub suggested: ResolutionStrategy,
    /// Whether every section is safe to resolve without a human.
    pub auto_resolvable: bool,
    pub detected_via: DetectionMethod,
}

/// Outcome of a detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub source_branch: String,
    pub target_branch: String,
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
    /// True when the trial merge completed cleanly.
    pub merge_possible: bool,
    pub detected_via: DetectionMethod,
}

/// A file the resolver could not rewrite, with the reason it gave up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedResolution {
    pub file_path: String,
    pub reason: String,
}

/// Outcome of a resolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Paths rewritten and staged.
    pub resolved: Vec<String>,
    pub failed: Vec<FailedResolution>,
}

impl ResolutionReport {
    pub fn all_resolved(&self) -> bool {
        self.failed.is_empty()
    }
}

fn extension(path: &str) -> Option<&str> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
}

/// Whether a path looks like a test file: a `test`/`tests`/`spec`
/// path component, or a file name shaped like `test_x`, `x_test`,
/// `x.test` or the `spec` equivalents.
pub fn is_test_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let components: Vec<&str> = lower.split('/').collect();
    if components
        .iter()
        .take(components.len().saturating_sub(1))
        .any(|c| matches!(*c, "test" | "tests" | "spec" | "specs" | "__tests__"))
    {
        return true;
    }
    components
        .last()
        .map(|name| {
            let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
            stem.starts_with("test_")
                || stem.starts_with("spec_")
                || stem.ends_with("_test")
                || stem.ends_with("_spec")
                || stem.ends_with(".test")
                || stem.ends_with(".spec")
        })
        .unwrap_or(false)
}

pub fn is_config_file(path: &str) -> bool {
    if let Some(ext) = extension(path) {
        return CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str());
    }
    // Dotfiles like `.env` carry the format in the name itself.
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix('.'))
        .map(|n| CONFIG_EXTENSIONS.contains(&n.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_binary_file(path: &str) -> bool {
    extension(path)
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pick the strategy the engine would apply to a conflicted file.
///
/// Test files take the incoming side (the branch under review owns its
/// own tests). Config and binary files always go to a human. A simple
/// content conflict, one whose every section passes the auto-resolvable
/// check, gets merged automatically. Everything else goes to a human.
pub fn suggest_strategy(path: &str, kind: ConflictKind, sections: &[ConflictSection]) -> ResolutionStrategy {
    if is_test_file(path) {
        return ResolutionStrategy::AcceptIncoming;
    }
    if is_config_file(path) || is_binary_file(path) || kind == ConflictKind::Binary {
        return ResolutionStrategy::Manual;
    }
    if kind == ConflictKind::Content && !sections.is_empty() && is_auto_resolvable(sections) {
        return ResolutionStrategy::AutoMerge;
    }
    ResolutionStrategy::Manual
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_file_detection() {
        assert!(is_test_file("tests/workflow.rs"));
        assert!(is_test_file("src/payment_test.go"));
        assert!(is_test_file("spec/models/user_spec.rb"));
        assert!(is_test_file("app/__tests__/button.tsx"));
        assert!(is_test_file("src/test_retry.py"));
        assert!(is_test_file("app/button.test.tsx"));
        assert!(!is_test_file("src/payment.rs"));
        // "test" in a non-final component only counts for known dirs.
        assert!(!is_test_file("contest/entry.rs"));
        // A name merely containing "test" or "spec" is not a test file.
        assert!(!is_test_file("src/latest.py"));
        assert!(!is_test_file("src/inspect.py"));
    }

    #[test]
    fn test_config_and_binary_detection() {
        assert!(is_config_file("config/app.yaml"));
        assert!(is_config_file(".env"));
        assert!(!is_config_file("src/main.rs"));
        assert!(is_binary_file("assets/logo.PNG"));
        assert!(!is_binary_file("README.md"));
    }

    fn disjoint_section() -> ConflictSection {
        ConflictSection {
            current_branch: "HEAD".into(),
            incoming_branch: "feature".into(),
            current_content: "a".into(),
            incoming_content: "b".into(),
            start_line: 0,
            end_line: 4,
        }
    }

    #[test]
    fn test_suggestion_order() {
        let sections = vec![disjoint_section()];
        // Test file wins even with a config extension.
        assert_eq!(
            suggest_strategy("tests/fixtures.json", ConflictKind::Content, &sections),
            ResolutionStrategy::AcceptIncoming
        );
        assert_eq!(
            suggest_strategy("app.toml", ConflictKind::Content, &sections),
            ResolutionStrategy::Manual
        );
        assert_eq!(
            suggest_strategy("logo.png", ConflictKind::Binary, &[]),
            ResolutionStrategy::Manual
        );
        assert_eq!(
            suggest_strategy("src/lib.rs", ConflictKind::Content, &sections),
            ResolutionStrategy::AutoMerge
        );
        // No sections to inspect: not provably simple.
        assert_eq!(
            suggest_strategy("src/lib.rs", ConflictKind::Content, &[]),
            ResolutionStrategy::Manual
        );
        assert_eq!(
            suggest_strategy("src/lib.rs", ConflictKind::DeleteModify, &[]),
            ResolutionStrategy::Manual
        );
    }
}
