//! Batch Orchestrator - applies rule sets across a disassembled tree.
//!
//! Files are addressed as `directory/file` relative to a configured root.
//! Missing files are skipped, failing files are counted, and neither stops
//! the rest of the batch. Files share no state, so they can be processed on
//! a bounded rayon pool; counters are atomic and the per-file reports keep
//! the declared order either way.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::rule::PatchRule;
use crate::session::{PatchResult, PatchSession};

/// A directory and the files to patch inside it, both relative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub directory: String,
    pub files: Vec<String>,
}

impl TargetGroup {
    pub fn new(directory: &str, files: &[&str]) -> Self {
        Self {
            directory: directory.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Picks the rules for one file, addressed as `directory/file`.
pub trait RuleSelector: Sync {
    fn rules_for(&self, relative: &str) -> &[PatchRule];
}

impl RuleSelector for [PatchRule] {
    fn rules_for(&self, _relative: &str) -> &[PatchRule] {
        self
    }
}

impl RuleSelector for Vec<PatchRule> {
    fn rules_for(&self, _relative: &str) -> &[PatchRule] {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Patched,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub relative: String,
    pub status: FileStatus,
    /// Absent for skipped files.
    pub result: Option<PatchResult>,
}

/// Aggregate outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub patched: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: Vec<FileReport>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.patched + self.unchanged + self.skipped + self.failed
    }

    /// Folds another summary into this one.
    pub fn merge(&mut self, other: BatchSummary) {
        self.patched += other.patched;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.files.extend(other.files);
    }
}

#[derive(Default)]
struct Counters {
    patched: AtomicUsize,
    unchanged: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, status: FileStatus) {
        let counter = match status {
            FileStatus::Patched => &self.patched,
            FileStatus::Unchanged => &self.unchanged,
            FileStatus::Skipped => &self.skipped,
            FileStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    root: PathBuf,
    /// 1 = sequential in declared order, 0 = rayon default.
    workers: usize,
    dry_run: bool,
}

impl BatchOrchestrator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workers: 1,
            dry_run: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.root).with_workers(config.workers)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the selected rules over every target file.
    pub fn run<S>(&self, targets: &[TargetGroup], rules: &S) -> BatchSummary
    where
        S: RuleSelector + ?Sized,
    {
        let jobs: Vec<(&TargetGroup, &String)> = targets
            .iter()
            .flat_map(|group| group.files.iter().map(move |file| (group, file)))
            .collect();
        let counters = Counters::default();
        let process = |&(group, file): &(&TargetGroup, &String)| {
            let report = self.process(group, file, rules);
            counters.record(report.status);
            report
        };

        let files: Vec<FileReport> = if self.workers == 1 {
            jobs.iter().map(process).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
            {
                Ok(pool) => pool.install(|| jobs.par_iter().map(process).collect()),
                Err(e) => {
                    warn!(error = %e, "could not build worker pool, patching sequentially");
                    jobs.iter().map(process).collect()
                }
            }
        };

        BatchSummary {
            patched: counters.patched.load(Ordering::Relaxed),
            unchanged: counters.unchanged.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            files,
        }
    }

    fn process<S>(&self, group: &TargetGroup, file: &str, rules: &S) -> FileReport
    where
        S: RuleSelector + ?Sized,
    {
        let relative = format!("{}/{}", group.directory.trim_end_matches('/'), file);
        let path = resolve(&self.root, &relative);

        if !path.is_file() {
            info!(file = %relative, "skipped, not found");
            return FileReport {
                relative,
                status: FileStatus::Skipped,
                result: None,
            };
        }

        let result = PatchSession::new(rules.rules_for(&relative))
            .dry_run(self.dry_run)
            .apply(&path);
        let status = if let Some(error) = &result.error {
            warn!(file = %relative, kind = error.kind(), %error, written = result.changed, "patch failed");
            FileStatus::Failed
        } else if result.changed {
            info!(file = %relative, dry_run = self.dry_run, "patched");
            FileStatus::Patched
        } else {
            FileStatus::Unchanged
        };
        FileReport {
            relative,
            status,
            result: Some(result),
        }
    }
}

/// Joins a `/`-separated relative path onto `root` component by component.
fn resolve(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}
