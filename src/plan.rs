//! Patch plans: which files to visit and which rules to run on each.

use crate::batch::{RuleSelector, TargetGroup};
use crate::rule::PatchRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPlan {
    pub name: String,
    /// Skip this plan when feature mods are switched off.
    #[serde(default)]
    pub optional: bool,
    pub targets: Vec<TargetGroup>,
    /// Rules for every file without a `per_file` entry.
    #[serde(default)]
    pub rules: Vec<PatchRule>,
    /// Rules keyed by `directory/file`.
    #[serde(default)]
    pub per_file: BTreeMap<String, Vec<PatchRule>>,
}

impl RuleSelector for PatchPlan {
    fn rules_for(&self, relative: &str) -> &[PatchRule] {
        self.per_file
            .get(relative)
            .map_or(self.rules.as_slice(), Vec::as_slice)
    }
}

#[derive(Deserialize)]
struct PlanFile {
    #[serde(default)]
    plan: Vec<PatchPlan>,
}

pub fn plans_from_str(content: &str) -> Result<Vec<PatchPlan>> {
    let file: PlanFile = toml::from_str(content)?;
    Ok(file.plan)
}

/// Loads `[[plan]]` entries from a TOML file.
pub fn load_plans(path: &Path) -> Result<Vec<PatchPlan>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    plans_from_str(&content).with_context(|| format!("Invalid plan file {}", path.display()))
}
