//! # Patch Session
//!
//! Drives one file through an ordered rule list.
//!
//! Rule order is part of the contract: each rule sees the output of the
//! rules before it, not the original bytes. The file is written once, in
//! full, and only when at least one rule changed something. Every failure is
//! captured in the returned [`PatchResult`] instead of being propagated.
//!
//! A rule that fails does not undo the rules that succeeded: their changes
//! are still written, and the first rule failure becomes the file's error.

use crate::diff;
use crate::error::PatchError;
use crate::rule::{PatchRule, RuleOutcome};
use crate::scanner;
use crate::source::SourceFile;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One rule's outcome within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub rule: String,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
    pub path: PathBuf,
    pub changed: bool,
    /// The file-level failure, or else the first rule failure.
    pub error: Option<PatchError>,
    pub rules: Vec<RuleReport>,
    /// Colored preview of the change, present when `changed` is set.
    pub diff: Option<String>,
}

impl PatchResult {
    fn failed(path: &Path, error: PatchError) -> Self {
        Self {
            path: path.to_path_buf(),
            changed: false,
            error: Some(error),
            rules: Vec::new(),
            diff: None,
        }
    }

    /// Rule-level failures that did not stop the session.
    pub fn rule_errors(&self) -> impl Iterator<Item = (&str, &PatchError)> {
        self.rules
            .iter()
            .filter_map(|report| Some((report.rule.as_str(), report.outcome.error()?)))
    }
}

pub struct PatchSession<'r> {
    rules: &'r [PatchRule],
    dry_run: bool,
}

impl<'r> PatchSession<'r> {
    pub fn new(rules: &'r [PatchRule]) -> Self {
        Self {
            rules,
            dry_run: false,
        }
    }

    /// Compute results and diffs without touching the disk.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies every rule to `source` in memory.
    ///
    /// A rule that fails is recorded and skipped; the remaining rules still
    /// run. Only a structurally broken file aborts the session, leaving
    /// `source` untouched.
    pub fn apply_to_source(&self, source: &mut SourceFile) -> Result<Vec<RuleReport>, PatchError> {
        scanner::scan(&source.lines)?;

        let original = source.lines.clone();
        let mut reports = Vec::with_capacity(self.rules.len());
        for rule in self.rules {
            let outcome = match rule.apply(source) {
                Ok(outcome @ RuleOutcome::Partial { .. }) => {
                    if let Some(error) = outcome.error() {
                        warn!(path = %source.path.display(), rule = %rule.name, %error, "rule partly applied");
                    }
                    outcome
                }
                Ok(outcome) => outcome,
                Err(error @ PatchError::MalformedSource { .. }) => {
                    source.lines = original;
                    return Err(error);
                }
                Err(error) => {
                    warn!(path = %source.path.display(), rule = %rule.name, %error, "rule skipped");
                    RuleOutcome::Failed { error }
                }
            };
            debug!(path = %source.path.display(), rule = %rule.name, ?outcome, "rule evaluated");
            reports.push(RuleReport {
                rule: rule.name.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    /// Reads, patches and (when something changed) rewrites the file at `path`.
    pub fn apply(&self, path: &Path) -> PatchResult {
        let mut source = match SourceFile::read(path) {
            Ok(source) => source,
            Err(error) => return PatchResult::failed(path, error),
        };
        let original = source.lines.clone();

        let rules = match self.apply_to_source(&mut source) {
            Ok(rules) => rules,
            Err(error) => return PatchResult::failed(path, error),
        };

        let changed = rules.iter().any(|report| report.outcome.changed());
        let mut result = PatchResult {
            path: path.to_path_buf(),
            changed,
            error: None,
            rules,
            diff: None,
        };
        let first_error = result.rule_errors().next().map(|(_, error)| error.clone());
        result.error = first_error;
        if !changed {
            return result;
        }

        result.diff = Some(diff::generate_line_diff(&original, &source.lines));
        if !self.dry_run {
            if let Err(error) = write_atomically(path, &source.content()) {
                result.changed = false;
                result.error = Some(error);
            }
        }
        result
    }
}

/// Replaces the file through a temporary sibling, so readers never observe
/// a half-written file.
fn write_atomically(path: &Path, content: &str) -> Result<(), PatchError> {
    let write_failure = |reason: String| PatchError::WriteFailure {
        path: path.to_path_buf(),
        reason,
    };
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_failure(e.to_string()))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| write_failure(e.to_string()))?;
    if let Ok(metadata) = std::fs::metadata(path) {
        // Keep the original permissions on the replacement file.
        let _ = std::fs::set_permissions(temp.path(), metadata.permissions());
    }
    temp.persist(path)
        .map_err(|e| write_failure(e.error.to_string()))?;
    Ok(())
}
