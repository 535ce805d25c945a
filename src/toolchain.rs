//! Adapter for the external smali assembler and baksmali disassembler.
//!
//! Both tools run as `java -jar <tool>.jar ...` and block until they exit.
//! A failed invocation becomes [`PatchError::ExternalToolFailure`] for that
//! unit only; callers decide whether to carry on.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::PatchError;

/// Directories produced by disassembly are named `smali_<dex stem>`.
const SMALI_DIR_PREFIX: &str = "smali_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub java: String,
    pub smali_jar: PathBuf,
    pub baksmali_jar: PathBuf,
    pub api_level: u32,
}

impl Toolchain {
    pub fn from_config(config: &Config) -> Self {
        Self {
            java: config.java.clone(),
            smali_jar: config.smali_jar.clone(),
            baksmali_jar: config.baksmali_jar.clone(),
            api_level: config.api_level,
        }
    }

    /// Fails with the first tool jar that does not exist.
    pub fn check(&self) -> Result<(), PatchError> {
        for (tool, jar) in [("smali", &self.smali_jar), ("baksmali", &self.baksmali_jar)] {
            if !jar.is_file() {
                return Err(PatchError::ExternalToolFailure {
                    tool: tool.to_string(),
                    status: "missing".to_string(),
                    stderr: format!("{} does not exist", jar.display()),
                });
            }
        }
        Ok(())
    }

    /// `baksmali d <dex> -o <out_dir>`
    pub fn disassemble(&self, dex: &Path, out_dir: &Path) -> Result<(), PatchError> {
        let mut command = Command::new(&self.java);
        command
            .arg("-jar")
            .arg(&self.baksmali_jar)
            .arg("d")
            .arg(dex)
            .arg("-o")
            .arg(out_dir);
        run_tool("baksmali", command)?;
        info!(dex = %dex.display(), out = %out_dir.display(), "disassembled");
        Ok(())
    }

    /// `smali a <dir> -o <out_dex> --api <level>`
    pub fn assemble(&self, smali_dir: &Path, out_dex: &Path) -> Result<(), PatchError> {
        let mut command = Command::new(&self.java);
        command
            .arg("-jar")
            .arg(&self.smali_jar)
            .arg("a")
            .arg(smali_dir)
            .arg("-o")
            .arg(out_dex)
            .arg("--api")
            .arg(self.api_level.to_string());
        run_tool("smali", command)?;
        info!(dir = %smali_dir.display(), dex = %out_dex.display(), "assembled");
        Ok(())
    }

    /// Disassembles every `*.dex` in `dir` into a sibling `smali_<stem>`
    /// directory. Returns one result per dex file, in name order.
    pub fn disassemble_all(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<(), PatchError>)>, PatchError> {
        let dex_files = children(dir, |path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == "dex")
        })?;
        Ok(dex_files
            .into_iter()
            .map(|dex| {
                let stem = dex.file_stem().unwrap_or_default().to_string_lossy();
                let out_dir = dir.join(format!("{SMALI_DIR_PREFIX}{stem}"));
                let result = self.disassemble(&dex, &out_dir);
                (dex, result)
            })
            .collect())
    }

    /// Assembles every `smali_classes*` directory in `dir` back into
    /// `classes*.dex` next to it.
    pub fn assemble_all(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<(), PatchError>)>, PatchError> {
        let smali_dirs = children(dir, |path| {
            path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("smali_classes"))
        })?;
        Ok(smali_dirs
            .into_iter()
            .map(|smali_dir| {
                let out_dex = dex_path_for(&smali_dir);
                let result = self.assemble(&smali_dir, &out_dex);
                (smali_dir, result)
            })
            .collect())
    }
}

/// `.../smali_classes2` -> `.../classes2.dex`
pub fn dex_path_for(smali_dir: &Path) -> PathBuf {
    let name = smali_dir.file_name().unwrap_or_default().to_string_lossy();
    let stem = name.strip_prefix(SMALI_DIR_PREFIX).unwrap_or(&name);
    smali_dir.with_file_name(format!("{stem}.dex"))
}

fn children(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, PatchError> {
    let entries = fs::read_dir(dir).map_err(|e| PatchError::ReadFailure {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| keep(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn run_tool(tool: &str, mut command: Command) -> Result<(), PatchError> {
    debug!(tool, ?command, "running external tool");
    let output = command.output().map_err(|e| PatchError::ExternalToolFailure {
        tool: tool.to_string(),
        status: "not started".to_string(),
        stderr: e.to_string(),
    })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let status = output
        .status
        .code()
        .map_or_else(|| "killed".to_string(), |code| format!("exit code {code}"));
    warn!(tool, %status, %stderr, "external tool failed");
    Err(PatchError::ExternalToolFailure {
        tool: tool.to_string(),
        status,
        stderr,
    })
}
