//! Crew and polecat workspace management.
//!
//! Both kinds of worker get a clone of the rig repository wired to the
//! rig's shared issue store through a redirect file. Crew workspaces are
//! persistent and user-managed; polecat workspaces are ephemeral and
//! witness-managed. The manager never touches database branches — branch
//! cleanup belongs to the supervisor at polecat-complete time.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::beads::Beads;
use crate::git::Git;
use crate::paths;
use crate::rigs::Rig;

const WORKER_PROMPT_TEMPLATE: &str = include_str!("templates/worker-prompt.md.jinja");

/// The two kinds of worker workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Crew,
    Polecat,
}

impl WorkerKind {
    /// Directory under the rig root holding this kind's workspaces.
    pub fn dir_name(self) -> &'static str {
        match self {
            WorkerKind::Crew => "crew",
            WorkerKind::Polecat => "polecats",
        }
    }

    /// Git branch prefix for branch-mode workspaces.
    pub fn branch_prefix(self) -> &'static str {
        match self {
            WorkerKind::Crew => "crew",
            WorkerKind::Polecat => "polecat",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Crew => "crew",
            WorkerKind::Polecat => "polecat",
        }
    }
}

/// Persisted per-worker record (`state.json` in the workspace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub name: String,
    pub rig: String,
    pub clone_path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a pristine pass over a worker clone.
#[derive(Debug, Clone, Serialize)]
pub struct PristineResult {
    pub name: String,
    pub had_changes: bool,
    pub pulled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_error: Option<String>,
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

/// Workspace manager for one rig and one worker kind.
pub struct Manager {
    rig: Rig,
    kind: WorkerKind,
}

impl Manager {
    pub fn new(rig: Rig, kind: WorkerKind) -> Self {
        Self { rig, kind }
    }

    pub fn worker_dir(&self, name: &str) -> PathBuf {
        self.rig.path.join(self.kind.dir_name()).join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.worker_dir(name).join("state.json")
    }

    fn exists(&self, name: &str) -> bool {
        self.worker_dir(name).exists()
    }

    /// Create a worker workspace: clone, optional branch, mail dir,
    /// shared-store redirect, prompt file, record. Any failure after the
    /// clone rolls the workspace directory back.
    pub fn add(&self, name: &str, create_branch: bool) -> anyhow::Result<WorkerRecord> {
        if self.exists(name) {
            bail!("{} worker {name:?} already exists", self.kind.as_str());
        }

        let worker_path = self.worker_dir(name);
        let base_dir = self.rig.path.join(self.kind.dir_name());
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("creating {}", base_dir.display()))?;

        Git::clone(&self.rig.git_url, &worker_path).context("cloning rig")?;

        let result = self.finish_add(name, &worker_path, create_branch);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&worker_path);
        }
        result
    }

    fn finish_add(
        &self,
        name: &str,
        worker_path: &Path,
        create_branch: bool,
    ) -> anyhow::Result<WorkerRecord> {
        let git = Git::new(worker_path);
        let mut branch = "main".to_string();
        if create_branch {
            branch = format!("{}/{name}", self.kind.branch_prefix());
            git.create_branch(&branch).context("creating branch")?;
            git.checkout(&branch).context("checking out branch")?;
        }

        std::fs::create_dir_all(worker_path.join("mail")).context("creating mail dir")?;

        if let Err(e) = self.install_redirect(worker_path) {
            // The worker can still run against a local store; warn only.
            eprintln!("Warning: could not set up shared issue store: {e:#}");
        }

        self.write_prompt(name, worker_path, &branch)
            .context("writing worker prompt")?;

        let now = Utc::now();
        let record = WorkerRecord {
            name: name.to_string(),
            rig: self.rig.name.clone(),
            clone_path: worker_path.to_path_buf(),
            branch,
            created_at: now,
            updated_at: now,
        };
        self.save_record(&record).context("saving worker record")?;

        Ok(record)
    }

    /// Point the worker's local store at the rig's shared one.
    ///
    /// All workers in a rig share a single database; the redirect file is
    /// the indirection that unifies them. Preference order matches the
    /// rig store resolution: `../../mayor/rig/.beads` when that exists,
    /// else `../../.beads`.
    fn install_redirect(&self, worker_path: &Path) -> anyhow::Result<()> {
        let mayor_store = self.rig.path.join("mayor").join("rig").join(paths::STORE_DIR);
        let rig_store = self.rig.path.join(paths::STORE_DIR);

        let relative = if mayor_store.exists() {
            format!("../../mayor/rig/{}\n", paths::STORE_DIR)
        } else if rig_store.exists() {
            format!("../../{}\n", paths::STORE_DIR)
        } else {
            bail!("no shared issue store found in rig {}", self.rig.name);
        };

        let store_dir = worker_path.join(paths::STORE_DIR);
        std::fs::create_dir_all(&store_dir)
            .with_context(|| format!("creating {}", store_dir.display()))?;
        std::fs::write(store_dir.join("redirect"), relative).context("writing redirect file")?;
        Ok(())
    }

    fn write_prompt(&self, name: &str, worker_path: &Path, branch: &str) -> anyhow::Result<()> {
        let mut env = Environment::new();
        env.add_template("worker-prompt", WORKER_PROMPT_TEMPLATE)
            .context("loading worker prompt template")?;
        let tmpl = env.get_template("worker-prompt")?;
        let content = tmpl.render(minijinja::context! {
            name => name,
            rig => self.rig.name,
            kind => self.kind.as_str(),
            kind_title => match self.kind {
                WorkerKind::Crew => "Crew",
                WorkerKind::Polecat => "Polecat",
            },
            branch => branch,
        })?;
        std::fs::write(worker_path.join("CLAUDE.md"), content)?;
        Ok(())
    }

    /// Remove a worker workspace. Refuses when the working tree has
    /// uncommitted changes unless forced. Database branches are not
    /// pruned here.
    pub fn remove(&self, name: &str, force: bool) -> anyhow::Result<()> {
        if !self.exists(name) {
            bail!("{} worker {name:?} not found", self.kind.as_str());
        }

        let worker_path = self.worker_dir(name);
        if !force {
            let git = Git::new(&worker_path);
            if let Ok(true) = git.has_uncommitted_changes() {
                bail!(
                    "{} worker {name:?} has uncommitted changes (use --force to discard)",
                    self.kind.as_str()
                );
            }
        }

        std::fs::remove_dir_all(&worker_path)
            .with_context(|| format!("removing {}", worker_path.display()))?;
        Ok(())
    }

    /// All workers of this kind in the rig. Workers whose record is
    /// unreadable are skipped.
    pub fn list(&self) -> anyhow::Result<Vec<WorkerRecord>> {
        let base_dir = self.rig.path.join(self.kind.dir_name());
        let entries = match std::fs::read_dir(&base_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("reading {}", base_dir.display()));
            }
        };

        let mut workers = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if let Ok(worker) = self.get(&name) {
                workers.push(worker);
            }
        }
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workers)
    }

    /// A worker by name. A missing record file yields a minimal record so
    /// half-created workspaces still show up.
    pub fn get(&self, name: &str) -> anyhow::Result<WorkerRecord> {
        if !self.exists(name) {
            bail!("{} worker {name:?} not found", self.kind.as_str());
        }
        self.load_record(name)
    }

    fn save_record(&self, record: &WorkerRecord) -> anyhow::Result<()> {
        let path = self.record_path(&record.name);
        let data = serde_json::to_vec_pretty(record).context("serializing worker record")?;
        std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn load_record(&self, name: &str) -> anyhow::Result<WorkerRecord> {
        let path = self.record_path(name);
        match std::fs::read_to_string(&path) {
            Ok(data) => {
                serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let now = Utc::now();
                Ok(WorkerRecord {
                    name: name.to_string(),
                    rig: self.rig.name.clone(),
                    clone_path: self.worker_dir(name),
                    branch: String::new(),
                    created_at: now,
                    updated_at: now,
                })
            }
            Err(e) => {
                Err(anyhow::Error::new(e)).with_context(|| format!("reading {}", path.display()))
            }
        }
    }

    /// Rename a worker. The directory renames first; a record-write
    /// failure rolls the rename back.
    pub fn rename(&self, old_name: &str, new_name: &str) -> anyhow::Result<()> {
        if !self.exists(old_name) {
            bail!("{} worker {old_name:?} not found", self.kind.as_str());
        }
        if self.exists(new_name) {
            bail!("{} worker {new_name:?} already exists", self.kind.as_str());
        }

        let old_path = self.worker_dir(old_name);
        let new_path = self.worker_dir(new_name);
        std::fs::rename(&old_path, &new_path).with_context(|| {
            format!("renaming {} to {}", old_path.display(), new_path.display())
        })?;

        let result = self.load_record(new_name).and_then(|mut record| {
            record.name = new_name.to_string();
            record.clone_path = new_path.clone();
            record.updated_at = Utc::now();
            self.save_record(&record)
        });

        if let Err(e) = result {
            let _ = std::fs::rename(&new_path, &old_path);
            return Err(e.context("updating worker record"));
        }
        Ok(())
    }

    /// Bring a worker clone up to date: `git pull --rebase` plus an issue
    /// sync, each step reported separately.
    pub fn pristine(&self, name: &str) -> anyhow::Result<PristineResult> {
        if !self.exists(name) {
            bail!("{} worker {name:?} not found", self.kind.as_str());
        }

        let worker_path = self.worker_dir(name);
        let git = Git::new(&worker_path);

        let had_changes = git
            .has_uncommitted_changes()
            .context("checking for changes")?;

        let mut result = PristineResult {
            name: name.to_string(),
            had_changes,
            pulled: false,
            pull_error: None,
            synced: false,
            sync_error: None,
        };

        match git.pull_rebase() {
            Ok(()) => result.pulled = true,
            Err(e) => result.pull_error = Some(format!("{e:#}")),
        }

        match Beads::new(&worker_path).sync() {
            Ok(()) => result.synced = true,
            Err(e) => result.sync_error = Some(format!("{e:#}")),
        }

        Ok(result)
    }
}
