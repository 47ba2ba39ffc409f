//! Local working-copy operations via `git2`, with the `git` binary for the
//! merge machinery (libgit2 has no equivalent of `merge --no-commit
//! --no-ff` that leaves standard conflict markers in the working tree).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{BranchType, Repository, Signature};
use tracing::{debug, info, instrument, warn};

use super::{MergeOutcome, VersionControlBackend};
use crate::errors::GitError;

/// Committer identity used for pipeline-generated commits.
const COMMITTER_NAME: &str = "mergeflow";
const COMMITTER_EMAIL: &str = "pipeline@mergeflow.local";

/// Production backend over one local git working copy.
///
/// The `git2::Repository` handle is opened per call rather than held: the
/// handle is not `Sync`, and the merge paths await subprocess output.
pub struct GitWorkingCopy {
    repo_path: PathBuf,
}

impl GitWorkingCopy {
    /// Open an existing working copy at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        // Validate the path up front so a bad configuration fails at open
        // time, not mid-workflow.
        Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        info!(path = %path.display(), "opened git working copy");
        Ok(Self {
            repo_path: path.to_path_buf(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn repo(&self) -> Result<Repository, GitError> {
        Repository::open(&self.repo_path)
            .map_err(|_| GitError::RepositoryNotFound(self.repo_path.display().to_string()))
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.repo_path.join(rel)
    }

    async fn run_git(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        use tokio::process::Command;
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .await
            .map_err(GitError::IoError)?;
        Ok(output)
    }
}

#[async_trait]
impl VersionControlBackend for GitWorkingCopy {
    #[instrument(skip(self))]
    async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        repo.find_branch(branch, BranchType::Local)
            .map_err(|_| GitError::RefNotFound(branch.to_string()))?;
        repo.set_head(&format!("refs/heads/{branch}"))?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        debug!(branch, "checked out branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull(&self) -> Result<(), GitError> {
        let (has_remote, head_ref_name, branch) = {
            let repo = self.repo()?;
            let has_remote = repo.find_remote("origin").is_ok();
            let head = repo.head()?;
            (
                has_remote,
                head.name().unwrap_or("HEAD").to_string(),
                head.shorthand().unwrap_or("HEAD").to_string(),
            )
        };

        if !has_remote {
            debug!("no origin remote, skipping pull");
            return Ok(());
        }

        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&[] as &[&str], None, None)?;

        // Fast-forward the current branch onto the fetched tip.
        let fetch_ref = format!("refs/remotes/origin/{branch}");
        let fetch_commit = match repo.find_reference(&fetch_ref) {
            Ok(reference) => reference.peel_to_commit()?,
            Err(_) => {
                debug!(branch, "branch not tracked on origin, skipping pull");
                return Ok(());
            }
        };
        let mut head_ref = repo.find_reference(&head_ref_name)?;
        head_ref.set_target(fetch_commit.id(), "mergeflow: fast-forward pull")?;
        repo.set_head(&head_ref_name)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        info!(branch, "pull completed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, name: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let head_commit = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head_commit, true)?;
        info!(name, "created branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_branch(&self, name: &str, ignore_missing: bool) -> Result<bool, GitError> {
        let repo = self.repo()?;
        let mut branch = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(e) if e.code() == git2::ErrorCode::NotFound && ignore_missing => {
                debug!(name, "branch already gone");
                return Ok(false);
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                return Err(GitError::RefNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        branch.delete()?;
        info!(name, "deleted branch");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn trial_merge(&self, source: &str) -> Result<MergeOutcome, GitError> {
        // An explicit identity keeps the merge working on hosts without
        // user.name / user.email configured.
        let name_cfg = format!("user.name={COMMITTER_NAME}");
        let email_cfg = format!("user.email={COMMITTER_EMAIL}");
        let output = self
            .run_git(&[
                "-c",
                &name_cfg,
                "-c",
                &email_cfg,
                "merge",
                "--no-commit",
                "--no-ff",
                source,
            ])
            .await?;

        let raw_output = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if output.status.success() {
            debug!(source, "trial merge is clean");
            return Ok(MergeOutcome {
                clean: true,
                conflicted_paths: Vec::new(),
                raw_output,
            });
        }

        // The merge stopped. Unmerged working-tree paths are the primary
        // conflict source; the raw output covers rename / delete cases.
        let unmerged = self
            .run_git(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let conflicted_paths: Vec<String> = String::from_utf8_lossy(&unmerged.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        if conflicted_paths.is_empty() && !raw_output.contains("CONFLICT") {
            // Not a conflict at all: missing ref, dirty tree, etc.
            return Err(GitError::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: raw_output,
            });
        }

        warn!(
            source,
            conflicted = conflicted_paths.len(),
            "trial merge found conflicts"
        );
        Ok(MergeOutcome {
            clean: false,
            conflicted_paths,
            raw_output,
        })
    }

    #[instrument(skip(self))]
    async fn abort_merge(&self) -> Result<(), GitError> {
        let output = self.run_git(&["merge", "--abort"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        debug!("merge aborted");
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn stage_and_commit(&self, paths: &[String], message: &str) -> Result<String, GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in paths {
            index.add_path(Path::new(path))?;
        }
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let sig = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
        let parent_commit = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        // A merge in progress contributes MERGE_HEAD as a second parent;
        // the commit then concludes that merge.
        let merge_commit = match repo.find_reference("MERGE_HEAD") {
            Ok(reference) => Some(reference.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> =
            parent_commit.iter().chain(merge_commit.iter()).collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        if merge_commit.is_some() {
            repo.cleanup_state()?;
        }
        info!(sha = %oid, files = paths.len(), "created commit");
        Ok(oid.to_string())
    }

    async fn diff_name_only(&self, a: &str, b: &str) -> Result<Vec<String>, GitError> {
        let repo = self.repo()?;
        let tree_a = repo
            .revparse_single(a)
            .map_err(|_| GitError::RefNotFound(a.to_string()))?
            .peel_to_commit()?
            .tree()?;
        let tree_b = repo
            .revparse_single(b)
            .map_err(|_| GitError::RefNotFound(b.to_string()))?
            .peel_to_commit()?
            .tree()?;
        let diff = repo.diff_tree_to_tree(Some(&tree_a), Some(&tree_b), None)?;

        let mut paths = Vec::new();
        for delta in diff.deltas() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned());
            if let Some(path) = path {
                paths.push(path);
            }
        }
        debug!(a, b, count = paths.len(), "diffed branches");
        Ok(paths)
    }

    async fn read_file(&self, path: &str) -> Result<String, GitError> {
        std::fs::read_to_string(self.abs(path)).map_err(|e| GitError::WorkingTreeFile {
            path: path.to_string(),
            detail: e.to_string(),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), GitError> {
        let abs = self.abs(path);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::WorkingTreeFile {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        }
        std::fs::write(&abs, content).map_err(|e| GitError::WorkingTreeFile {
            path: path.to_string(),
            detail: e.to_string(),
        })
    }

    async fn stage_file(&self, path: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_cli_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) -> (GitWorkingCopy, String) {
        Repository::init(dir).unwrap();
        let wc = GitWorkingCopy::open(dir).unwrap();
        wc.write_file("a.txt", "base\n").await.unwrap();
        wc.stage_and_commit(&["a.txt".into()], "init").await.unwrap();
        let default_branch = {
            let repo = wc.repo().unwrap();
            let head = repo.head().unwrap();
            head.shorthand().unwrap().to_string()
        };
        (wc, default_branch)
    }

    #[tokio::test]
    async fn test_open_missing_repo() {
        assert!(matches!(
            GitWorkingCopy::open("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_branch_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (wc, default_branch) = init_repo(dir.path()).await;

        wc.create_branch("feature").await.unwrap();
        wc.checkout("feature").await.unwrap();
        wc.checkout(&default_branch).await.unwrap();

        assert!(wc.delete_branch("feature", false).await.unwrap());
        // Second delete: gone, skipped without error.
        assert!(!wc.delete_branch("feature", true).await.unwrap());
        assert!(matches!(
            wc.delete_branch("feature", false).await,
            Err(GitError::RefNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_branch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (wc, _) = init_repo(dir.path()).await;

        wc.create_branch("test-review/1-x").await.unwrap();
        wc.create_branch("test-review/1-x").await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        let (wc, default_branch) = init_repo(dir.path()).await;

        wc.create_branch("feature").await.unwrap();
        wc.checkout("feature").await.unwrap();
        wc.write_file("tests/test_new.py", "assert True\n").await.unwrap();
        let sha = wc
            .stage_and_commit(&["tests/test_new.py".into()], "add test")
            .await
            .unwrap();
        assert_eq!(sha.len(), 40);

        let changed = wc.diff_name_only(&default_branch, "feature").await.unwrap();
        assert_eq!(changed, vec!["tests/test_new.py".to_string()]);
    }

    #[tokio::test]
    async fn test_trial_merge_conflict_and_abort() {
        if !git_cli_available() {
            eprintln!("git binary not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (wc, default_branch) = init_repo(dir.path()).await;

        wc.create_branch("feature").await.unwrap();
        wc.checkout("feature").await.unwrap();
        wc.write_file("a.txt", "feature side\n").await.unwrap();
        wc.stage_and_commit(&["a.txt".into()], "feature edit").await.unwrap();

        wc.checkout(&default_branch).await.unwrap();
        wc.write_file("a.txt", "main side\n").await.unwrap();
        wc.stage_and_commit(&["a.txt".into()], "main edit").await.unwrap();

        let outcome = wc.trial_merge("feature").await.unwrap();
        assert!(!outcome.clean);
        assert_eq!(outcome.conflicted_paths, vec!["a.txt".to_string()]);

        // The working tree now carries markers.
        let content = wc.read_file("a.txt").await.unwrap();
        assert!(content.contains("<<<<<<<"));

        wc.abort_merge().await.unwrap();
        let content = wc.read_file("a.txt").await.unwrap();
        assert_eq!(content, "main side\n");
    }

    #[tokio::test]
    async fn test_commit_during_merge_concludes_it() {
        if !git_cli_available() {
            eprintln!("git binary not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (wc, default_branch) = init_repo(dir.path()).await;

        wc.create_branch("feature").await.unwrap();
        wc.checkout("feature").await.unwrap();
        wc.write_file("a.txt", "feature side\n").await.unwrap();
        wc.stage_and_commit(&["a.txt".into()], "feature edit").await.unwrap();

        wc.checkout(&default_branch).await.unwrap();
        wc.write_file("a.txt", "main side\n").await.unwrap();
        wc.stage_and_commit(&["a.txt".into()], "main edit").await.unwrap();

        let outcome = wc.trial_merge("feature").await.unwrap();
        assert!(!outcome.clean);

        // Resolve in place and commit while the merge is in progress.
        wc.write_file("a.txt", "merged\n").await.unwrap();
        let sha = wc
            .stage_and_commit(&["a.txt".into()], "resolve conflict")
            .await
            .unwrap();

        let repo = wc.repo().unwrap();
        let commit = repo
            .find_commit(git2::Oid::from_str(&sha).unwrap())
            .unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert!(repo.find_reference("MERGE_HEAD").is_err());

        // The working copy accepts a fresh merge afterwards.
        let outcome = wc.trial_merge("feature").await.unwrap();
        assert!(outcome.clean);
    }

    #[tokio::test]
    async fn test_trial_merge_clean() {
        if !git_cli_available() {
            eprintln!("git binary not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (wc, default_branch) = init_repo(dir.path()).await;

        wc.create_branch("feature").await.unwrap();
        wc.checkout("feature").await.unwrap();
        wc.write_file("b.txt", "new file\n").await.unwrap();
        wc.stage_and_commit(&["b.txt".into()], "add b").await.unwrap();

        wc.checkout(&default_branch).await.unwrap();
        let outcome = wc.trial_merge("feature").await.unwrap();
        assert!(outcome.clean);
        wc.abort_merge().await.ok();
    }

    #[tokio::test]
    async fn test_trial_merge_missing_ref_is_fault() {
        if !git_cli_available() {
            eprintln!("git binary not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (wc, _) = init_repo(dir.path()).await;

        let err = wc.trial_merge("no-such-branch").await.unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }
}
