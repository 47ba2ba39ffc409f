//! Conflict detection and resolution engine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::errors::ConflictError;
use crate::git::VersionControlBackend;
use crate::models::{GitOperation, GitOperationKind};

use super::markers::{is_auto_resolvable, parse_conflict_markers};
use super::{
    apply_strategy, suggest_strategy, Conflict, ConflictKind, ConflictReport, DetectionMethod,
    FailedResolution, ResolutionReport, ResolutionStrategy, StrategyChoice,
};

const TRIGGERED_BY: &str = "conflict_resolver";

/// Detects and resolves merge conflicts for one repository.
///
/// Detection runs a real trial merge in a throwaway sandbox branch and
/// reads the conflicted working tree. If the merge machinery itself
/// faults, detection degrades to a branch diff that can flag likely
/// conflicts but not inspect them.
pub struct ConflictResolver {
    repository_id: String,
    backend: Arc<dyn VersionControlBackend>,
    db: Arc<Database>,
}

impl ConflictResolver {
    pub fn new(
        repository_id: impl Into<String>,
        backend: Arc<dyn VersionControlBackend>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            backend,
            db,
        }
    }

    /// Detect conflicts that merging `source` into `target` would cause.
    ///
    /// The working tree is always restored: the sandbox branch is deleted
    /// and `target` checked back out whether detection succeeds or not.
    pub async fn detect_conflicts(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ConflictReport, ConflictError> {
        let op = GitOperation::begin(
            &self.repository_id,
            None,
            GitOperationKind::Merge,
            TRIGGERED_BY,
        );
        self.db.insert_operation(&op)?;

        info!(
            repository = %self.repository_id,
            %source,
            %target,
            "detecting merge conflicts"
        );

        match self.detect_via_trial_merge(source, target).await {
            Ok(report) => {
                self.db.complete_operation(
                    &op.id,
                    &format!(
                        "trial merge {source} -> {target}: {} conflict(s)",
                        report.conflicts.len()
                    ),
                    None,
                )?;
                Ok(report)
            }
            Err(merge_err) => {
                warn!(
                    error = %merge_err,
                    "trial merge unavailable, falling back to branch diff"
                );
                match self.detect_via_diff(source, target).await {
                    Ok(report) => {
                        self.db.complete_operation(
                            &op.id,
                            &format!(
                                "diff fallback {source} -> {target}: {} candidate(s)",
                                report.conflicts.len()
                            ),
                            None,
                        )?;
                        Ok(report)
                    }
                    Err(diff_err) => {
                        let err = ConflictError::DetectionFailed {
                            source_branch: source.to_string(),
                            target_branch: target.to_string(),
                            detail: format!("merge: {merge_err}; diff: {diff_err}"),
                        };
                        self.db.fail_operation(&op.id, &err.to_string())?;
                        Err(err)
                    }
                }
            }
        }
    }

    async fn detect_via_trial_merge(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ConflictReport, ConflictError> {
        self.backend.checkout(target).await?;
        self.backend.pull().await?;

        let sandbox = format!("merge-check/{}", Uuid::new_v4());
        self.backend.create_branch(&sandbox).await?;
        self.backend.checkout(&sandbox).await?;

        // The sandbox must come down even when analysis fails, so the
        // fallible part runs first and cleanup is unconditional.
        let outcome = self.run_trial_merge(source, target).await;

        if let Err(e) = self.backend.checkout(target).await {
            warn!(error = %e, branch = %sandbox, "failed to leave sandbox branch");
        }
        if let Err(e) = self.backend.delete_branch(&sandbox, true).await {
            warn!(error = %e, branch = %sandbox, "failed to delete sandbox branch");
        }

        outcome
    }

    async fn run_trial_merge(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ConflictReport, ConflictError> {
        let merge = self.backend.trial_merge(source).await?;

        if merge.clean {
            // An up-to-date merge leaves nothing in progress, so there may
            // be no merge to abort.
            if let Err(e) = self.backend.abort_merge().await {
                debug!(error = %e, "no in-progress merge to abort");
            }
            debug!(%source, %target, "trial merge clean");
            return Ok(ConflictReport {
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                has_conflicts: false,
                conflicts: Vec::new(),
                merge_possible: true,
                detected_via: DetectionMethod::TrialMerge,
            });
        }

        let kinds = classify_from_output(&merge.raw_output);

        // Rename and delete conflicts show up only in the merge output,
        // not as unmerged working-tree paths; fold those in too.
        let mut paths = merge.conflicted_paths.clone();
        let mut extras: Vec<&String> = kinds
            .keys()
            .filter(|k| !paths.contains(*k))
            .collect();
        extras.sort();
        paths.extend(extras.into_iter().cloned());

        let mut conflicts = Vec::with_capacity(paths.len());
        for path in &paths {
            conflicts.push(self.analyze_file(path, &kinds).await);
        }

        self.backend.abort_merge().await?;

        info!(
            %source,
            %target,
            count = conflicts.len(),
            "trial merge found conflicts"
        );
        Ok(ConflictReport {
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            merge_possible: false,
            detected_via: DetectionMethod::TrialMerge,
        })
    }

    /// Build a [`Conflict`] for one unmerged path of an in-progress merge.
    async fn analyze_file(&self, path: &str, kinds: &HashMap<String, ConflictKind>) -> Conflict {
        if super::is_binary_file(path) {
            return Conflict {
                file_path: path.to_string(),
                kind: ConflictKind::Binary,
                sections: Vec::new(),
                suggested: suggest_strategy(path, ConflictKind::Binary, &[]),
                auto_resolvable: false,
                detected_via: DetectionMethod::TrialMerge,
            };
        }

        let sections = match self.backend.read_file(path).await {
            Ok(content) => parse_conflict_markers(&content),
            Err(e) => {
                // Deleted on one side, or unreadable as text.
                debug!(%path, error = %e, "conflicted file not readable");
                Vec::new()
            }
        };

        let kind = match kinds.get(path) {
            Some(k) => *k,
            None if !sections.is_empty() => ConflictKind::Content,
            None => ConflictKind::BothModified,
        };

        let auto_resolvable =
            kind == ConflictKind::Content && !sections.is_empty() && is_auto_resolvable(&sections);
        let suggested = suggest_strategy(path, kind, &sections);

        Conflict {
            file_path: path.to_string(),
            kind,
            sections,
            suggested,
            auto_resolvable,
            detected_via: DetectionMethod::TrialMerge,
        }
    }

    /// Cheap fallback: every path that differs between the branches is a
    /// potential conflict. No section content is available, so nothing is
    /// auto-resolvable this way.
    async fn detect_via_diff(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ConflictReport, ConflictError> {
        let paths = self.backend.diff_name_only(target, source).await?;
        let conflicts: Vec<Conflict> = paths
            .into_iter()
            .map(|path| Conflict {
                kind: ConflictKind::Content,
                sections: Vec::new(),
                suggested: ResolutionStrategy::Manual,
                auto_resolvable: false,
                detected_via: DetectionMethod::Diff,
                file_path: path,
            })
            .collect();

        Ok(ConflictReport {
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            merge_possible: false,
            detected_via: DetectionMethod::Diff,
        })
    }

    /// Rewrite conflicted files in the working tree per the chosen
    /// strategy, staging each file that was actually resolved.
    ///
    /// Conflicts not flagged auto-resolvable are never touched, whatever
    /// the strategy says. Those, files whose strategy is `Manual`, and
    /// files a textual rewrite cannot fix are reported as failed rather
    /// than erroring; partial resolution is a normal outcome.
    pub async fn auto_resolve_conflicts(
        &self,
        conflicts: &[Conflict],
        choice: StrategyChoice,
    ) -> Result<ResolutionReport, ConflictError> {
        let mut resolved = Vec::new();
        let mut failed = Vec::new();

        for conflict in conflicts {
            if !conflict.auto_resolvable {
                failed.push(FailedResolution {
                    file_path: conflict.file_path.clone(),
                    reason: "not safe to resolve automatically".to_string(),
                });
                continue;
            }

            let strategy = match choice {
                StrategyChoice::Fixed(s) => s,
                StrategyChoice::Smart => conflict.suggested,
            };

            if strategy == ResolutionStrategy::Manual {
                failed.push(FailedResolution {
                    file_path: conflict.file_path.clone(),
                    reason: "manual resolution required".to_string(),
                });
                continue;
            }
            if !matches!(conflict.kind, ConflictKind::Content | ConflictKind::BothModified) {
                failed.push(FailedResolution {
                    file_path: conflict.file_path.clone(),
                    reason: format!("{} conflict cannot be resolved textually", conflict.kind),
                });
                continue;
            }

            match self.resolve_file(&conflict.file_path, strategy).await {
                Ok(()) => {
                    info!(path = %conflict.file_path, %strategy, "conflict resolved");
                    resolved.push(conflict.file_path.clone());
                }
                Err(reason) => {
                    warn!(path = %conflict.file_path, %reason, "conflict not resolved");
                    failed.push(FailedResolution {
                        file_path: conflict.file_path.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(ResolutionReport { resolved, failed })
    }

    async fn resolve_file(
        &self,
        path: &str,
        strategy: ResolutionStrategy,
    ) -> Result<(), String> {
        let content = self
            .backend
            .read_file(path)
            .await
            .map_err(|e| e.to_string())?;

        if parse_conflict_markers(&content).is_empty() {
            return Err("no conflict markers found".to_string());
        }

        let rewritten = apply_strategy(&content, strategy);
        if !parse_conflict_markers(&rewritten).is_empty() {
            return Err("conflict markers remain after rewrite".to_string());
        }

        self.backend
            .write_file(path, &rewritten)
            .await
            .map_err(|e| e.to_string())?;
        self.backend
            .stage_file(path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Map conflicted paths to kinds from `git merge` output lines such as
/// `CONFLICT (rename/delete): ...` and `CONFLICT (add/add): Merge
/// conflict in path`.
fn classify_from_output(raw: &str) -> HashMap<String, ConflictKind> {
    let mut kinds = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("CONFLICT (") else {
            continue;
        };
        let Some((tag, detail)) = rest.split_once("):") else {
            continue;
        };
        let kind = if tag.contains("rename") {
            ConflictKind::Rename
        } else if tag.contains("delete") {
            ConflictKind::DeleteModify
        } else if tag == "add/add" {
            ConflictKind::BothAdded
        } else {
            ConflictKind::Content
        };
        if let Some(path) = extract_conflict_path(detail) {
            kinds.insert(path, kind);
        }
    }
    kinds
}

fn extract_conflict_path(detail: &str) -> Option<String> {
    let detail = detail.trim();
    if let Some(path) = detail.strip_prefix("Merge conflict in ") {
        return Some(path.trim().to_string());
    }
    // "modify/delete" style: "path deleted in <ref> and modified in <ref>..."
    detail
        .split_whitespace()
        .next()
        .map(|p| p.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::errors::GitError;
    use crate::git::MergeOutcome;

    use super::*;

    /// Scripted backend: files are an in-memory map, merges return a
    /// canned outcome, and operational faults can be injected.
    #[derive(Default)]
    struct FakeBackend {
        files: Mutex<HashMap<String, String>>,
        staged: Mutex<Vec<String>>,
        merge_outcome: Mutex<Option<Result<MergeOutcome, String>>>,
        diff_paths: Mutex<Vec<String>>,
        diff_fails: bool,
        abort_fails: bool,
    }

    impl FakeBackend {
        fn with_file(self, path: &str, content: &str) -> Self {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            self
        }

        fn with_merge(self, outcome: Result<MergeOutcome, String>) -> Self {
            *self.merge_outcome.lock().unwrap() = Some(outcome);
            self
        }
    }

    #[async_trait]
    impl VersionControlBackend for FakeBackend {
        async fn checkout(&self, _branch: &str) -> Result<(), GitError> {
            Ok(())
        }
        async fn pull(&self) -> Result<(), GitError> {
            Ok(())
        }
        async fn create_branch(&self, _name: &str) -> Result<(), GitError> {
            Ok(())
        }
        async fn delete_branch(&self, _name: &str, _ignore_missing: bool) -> Result<bool, GitError> {
            Ok(true)
        }
        async fn trial_merge(&self, _source: &str) -> Result<MergeOutcome, GitError> {
            match self.merge_outcome.lock().unwrap().clone() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(msg)) => Err(GitError::CommandFailed {
                    exit_code: 128,
                    stderr: msg,
                }),
                None => Ok(MergeOutcome {
                    clean: true,
                    ..Default::default()
                }),
            }
        }
        async fn abort_merge(&self) -> Result<(), GitError> {
            if self.abort_fails {
                return Err(GitError::CommandFailed {
                    exit_code: 128,
                    stderr: "fatal: There is no merge to abort (MERGE_HEAD missing).".into(),
                });
            }
            Ok(())
        }
        async fn stage_and_commit(&self, _paths: &[String], _message: &str) -> Result<String, GitError> {
            Ok("0".repeat(40))
        }
        async fn diff_name_only(&self, _a: &str, _b: &str) -> Result<Vec<String>, GitError> {
            if self.diff_fails {
                return Err(GitError::CommandFailed {
                    exit_code: 1,
                    stderr: "diff failed".into(),
                });
            }
            Ok(self.diff_paths.lock().unwrap().clone())
        }
        async fn read_file(&self, path: &str) -> Result<String, GitError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| GitError::WorkingTreeFile {
                    path: path.to_string(),
                    detail: "missing".to_string(),
                })
        }
        async fn write_file(&self, path: &str, content: &str) -> Result<(), GitError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            Ok(())
        }
        async fn stage_file(&self, path: &str) -> Result<(), GitError> {
            self.staged.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn resolver(backend: FakeBackend) -> ConflictResolver {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        ConflictResolver::new("repo-1", Arc::new(backend), db)
    }

    const CONFLICTED: &str = "\
<<<<<<< HEAD
current
=======
incoming
>>>>>>> feature/x
";

    #[tokio::test]
    async fn test_detect_clean_merge() {
        let backend = FakeBackend::default().with_merge(Ok(MergeOutcome {
            clean: true,
            ..Default::default()
        }));
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        assert!(!report.has_conflicts);
        assert!(report.merge_possible);
        assert_eq!(report.detected_via, DetectionMethod::TrialMerge);
    }

    #[tokio::test]
    async fn test_detect_content_conflict_with_sections() {
        let backend = FakeBackend::default()
            .with_file("src/payment.rs", CONFLICTED)
            .with_merge(Ok(MergeOutcome {
                clean: false,
                conflicted_paths: vec!["src/payment.rs".into()],
                raw_output: "CONFLICT (content): Merge conflict in src/payment.rs".into(),
            }));
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        assert!(report.has_conflicts);
        assert!(!report.merge_possible);
        let c = &report.conflicts[0];
        assert_eq!(c.kind, ConflictKind::Content);
        assert_eq!(c.sections.len(), 1);
        assert!(c.auto_resolvable);
        assert_eq!(c.suggested, ResolutionStrategy::AutoMerge);
    }

    #[tokio::test]
    async fn test_detect_classifies_from_merge_output() {
        let backend = FakeBackend::default().with_merge(Ok(MergeOutcome {
            clean: false,
            conflicted_paths: vec!["old.rs".into(), "gone.rs".into(), "new.rs".into()],
            raw_output: "\
CONFLICT (rename/rename): old.rs renamed differently
CONFLICT (modify/delete): gone.rs deleted in main and modified in feature/x
CONFLICT (add/add): Merge conflict in new.rs"
                .into(),
        }));
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        let kind_of = |p: &str| {
            report
                .conflicts
                .iter()
                .find(|c| c.file_path == p)
                .unwrap()
                .kind
        };
        assert_eq!(kind_of("old.rs"), ConflictKind::Rename);
        assert_eq!(kind_of("gone.rs"), ConflictKind::DeleteModify);
        assert_eq!(kind_of("new.rs"), ConflictKind::BothAdded);
    }

    #[tokio::test]
    async fn test_detect_includes_paths_only_in_merge_output() {
        // A deleted file never shows up as an unmerged working-tree path.
        let backend = FakeBackend::default()
            .with_file("src/lib.rs", CONFLICTED)
            .with_merge(Ok(MergeOutcome {
                clean: false,
                conflicted_paths: vec!["src/lib.rs".into()],
                raw_output: "\
CONFLICT (content): Merge conflict in src/lib.rs
CONFLICT (modify/delete): gone.rs deleted in main and modified in feature/x"
                    .into(),
            }));
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        assert_eq!(report.conflicts.len(), 2);
        let gone = report
            .conflicts
            .iter()
            .find(|c| c.file_path == "gone.rs")
            .unwrap();
        assert_eq!(gone.kind, ConflictKind::DeleteModify);
        assert!(!gone.auto_resolvable);
        assert_eq!(gone.suggested, ResolutionStrategy::Manual);
    }

    #[tokio::test]
    async fn test_detect_clean_merge_tolerates_failed_abort() {
        // "Already up to date" leaves no merge in progress to abort.
        let backend = FakeBackend {
            abort_fails: true,
            ..Default::default()
        }
        .with_merge(Ok(MergeOutcome {
            clean: true,
            ..Default::default()
        }));
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        assert!(!report.has_conflicts);
        assert!(report.merge_possible);
        assert_eq!(report.detected_via, DetectionMethod::TrialMerge);
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_diff() {
        let backend = FakeBackend::default().with_merge(Err("not a git repository".into()));
        backend
            .diff_paths
            .lock()
            .unwrap()
            .push("src/lib.rs".to_string());
        let report = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap();
        assert_eq!(report.detected_via, DetectionMethod::Diff);
        assert!(report.has_conflicts);
        let c = &report.conflicts[0];
        assert!(!c.auto_resolvable);
        assert_eq!(c.suggested, ResolutionStrategy::Manual);
    }

    #[tokio::test]
    async fn test_detect_fails_when_both_paths_fail() {
        let backend = FakeBackend {
            diff_fails: true,
            ..Default::default()
        }
        .with_merge(Err("boom".into()));
        let err = resolver(backend)
            .detect_conflicts("feature/x", "main")
            .await
            .unwrap_err();
        assert!(matches!(err, ConflictError::DetectionFailed { .. }));
    }

    fn content_conflict(path: &str, suggested: ResolutionStrategy) -> Conflict {
        Conflict {
            file_path: path.to_string(),
            kind: ConflictKind::Content,
            sections: parse_conflict_markers(CONFLICTED),
            suggested,
            auto_resolvable: true,
            detected_via: DetectionMethod::TrialMerge,
        }
    }

    #[tokio::test]
    async fn test_auto_resolve_fixed_strategy() {
        let backend = FakeBackend::default().with_file("a.rs", CONFLICTED);
        let r = resolver(backend);
        let report = r
            .auto_resolve_conflicts(
                &[content_conflict("a.rs", ResolutionStrategy::AutoMerge)],
                StrategyChoice::Fixed(ResolutionStrategy::AcceptIncoming),
            )
            .await
            .unwrap();
        assert!(report.all_resolved());
        assert_eq!(report.resolved, vec!["a.rs"]);
        let content = r.backend.read_file("a.rs").await.unwrap();
        assert_eq!(content, "incoming\n");
    }

    #[tokio::test]
    async fn test_auto_resolve_smart_uses_suggestions() {
        let backend = FakeBackend::default()
            .with_file("a.rs", CONFLICTED)
            .with_file("app.toml", CONFLICTED);
        let report = resolver(backend)
            .auto_resolve_conflicts(
                &[
                    content_conflict("a.rs", ResolutionStrategy::AutoMerge),
                    content_conflict("app.toml", ResolutionStrategy::Manual),
                ],
                StrategyChoice::Smart,
            )
            .await
            .unwrap();
        assert_eq!(report.resolved, vec!["a.rs"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file_path, "app.toml");
    }

    #[tokio::test]
    async fn test_auto_resolve_leaves_unsafe_conflict_untouched() {
        let backend = FakeBackend::default().with_file("tests/test_x.py", CONFLICTED);
        let mut conflict = content_conflict("tests/test_x.py", ResolutionStrategy::AcceptIncoming);
        conflict.auto_resolvable = false;

        let r = resolver(backend);
        let report = r
            .auto_resolve_conflicts(&[conflict], StrategyChoice::Smart)
            .await
            .unwrap();
        assert!(report.resolved.is_empty());
        assert_eq!(report.failed[0].file_path, "tests/test_x.py");
        // The file keeps its markers; nothing was rewritten or staged.
        let content = r.backend.read_file("tests/test_x.py").await.unwrap();
        assert_eq!(content, CONFLICTED);
    }

    #[tokio::test]
    async fn test_auto_resolve_skips_non_textual_kinds() {
        let conflict = Conflict {
            file_path: "logo.png".into(),
            kind: ConflictKind::Binary,
            sections: Vec::new(),
            suggested: ResolutionStrategy::Manual,
            auto_resolvable: false,
            detected_via: DetectionMethod::TrialMerge,
        };
        let report = resolver(FakeBackend::default())
            .auto_resolve_conflicts(
                &[conflict],
                StrategyChoice::Fixed(ResolutionStrategy::AcceptCurrent),
            )
            .await
            .unwrap();
        assert!(!report.all_resolved());
    }

    #[tokio::test]
    async fn test_auto_resolve_file_without_markers_fails() {
        let backend = FakeBackend::default().with_file("a.rs", "clean file\n");
        let report = resolver(backend)
            .auto_resolve_conflicts(
                &[content_conflict("a.rs", ResolutionStrategy::AutoMerge)],
                StrategyChoice::Fixed(ResolutionStrategy::AcceptIncoming),
            )
            .await
            .unwrap();
        assert_eq!(report.failed[0].reason, "no conflict markers found");
    }
}
