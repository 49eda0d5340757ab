//! Thin wrapper over the git binary for worker clone management.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::subprocess::Tool;

pub struct Git {
    repo_dir: PathBuf,
}

impl Git {
    pub fn new(repo_dir: &Path) -> Self {
        Self {
            repo_dir: repo_dir.to_path_buf(),
        }
    }

    /// Clone `url` into `dest` (dest must not exist).
    pub fn clone(url: &str, dest: &Path) -> anyhow::Result<()> {
        let dest_s = dest.to_string_lossy();
        Tool::new("git")
            .args(&["clone", url, &dest_s])
            .run_ok()
            .with_context(|| format!("cloning {url}"))?;
        Ok(())
    }

    pub fn create_branch(&self, name: &str) -> anyhow::Result<()> {
        Tool::new("git")
            .args(&["branch", name])
            .current_dir(&self.repo_dir)
            .run_ok()
            .with_context(|| format!("creating branch {name}"))?;
        Ok(())
    }

    pub fn checkout(&self, name: &str) -> anyhow::Result<()> {
        Tool::new("git")
            .args(&["checkout", name])
            .current_dir(&self.repo_dir)
            .run_ok()
            .with_context(|| format!("checking out {name}"))?;
        Ok(())
    }

    /// True when the working tree has uncommitted changes.
    pub fn has_uncommitted_changes(&self) -> anyhow::Result<bool> {
        let out = Tool::new("git")
            .args(&["status", "--porcelain"])
            .current_dir(&self.repo_dir)
            .run_ok()
            .context("git status")?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Pull the current branch from origin with rebase.
    pub fn pull_rebase(&self) -> anyhow::Result<()> {
        Tool::new("git")
            .args(&["pull", "--rebase", "origin"])
            .current_dir(&self.repo_dir)
            .run_ok()
            .context("git pull --rebase")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::run_command;

    fn init_repo(dir: &Path) {
        run_command("git", &["init", "-q"], Some(dir)).unwrap();
        run_command("git", &["config", "user.email", "t@example.com"], Some(dir)).unwrap();
        run_command("git", &["config", "user.name", "t"], Some(dir)).unwrap();
        std::fs::write(dir.join("README.md"), "seed\n").unwrap();
        run_command("git", &["add", "."], Some(dir)).unwrap();
        run_command("git", &["commit", "-q", "-m", "seed"], Some(dir)).unwrap();
    }

    #[test]
    fn clean_tree_has_no_changes() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let git = Git::new(tmp.path());
        assert!(!git.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn dirty_tree_has_changes() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("dirty.txt"), "x").unwrap();
        let git = Git::new(tmp.path());
        assert!(git.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn branch_and_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let git = Git::new(tmp.path());
        git.create_branch("crew/max").unwrap();
        git.checkout("crew/max").unwrap();
        let head = run_command(
            "git",
            &["symbolic-ref", "--short", "HEAD"],
            Some(tmp.path()),
        )
        .unwrap();
        assert_eq!(head.trim(), "crew/max");
    }
}
