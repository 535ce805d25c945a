//! # Source File Model
//!
//! A disassembled class file held in memory as an ordered list of lines.
//!
//! Each line keeps its own terminator so that anything the patcher does not
//! touch is written back byte-for-byte, including blank-line layout, `\r\n`
//! endings and a missing newline at the end of the file. Lines produced by the
//! patcher use the file's dominant terminator.

use crate::error::PatchError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Lines including their terminators. Only the last one may lack it.
    pub lines: Vec<String>,
    line_ending: &'static str,
}

impl SourceFile {
    /// Splits `content` into terminated lines.
    pub fn new(path: PathBuf, content: &str) -> Self {
        let lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
        let line_ending = match lines.first() {
            Some(first) if first.ends_with("\r\n") => "\r\n",
            _ => "\n",
        };
        Self {
            path,
            lines,
            line_ending,
        }
    }

    /// Reads a file from disk. Content must be valid UTF-8; a lossy decode
    /// would corrupt untouched bytes on write-back.
    pub fn read(path: &Path) -> Result<Self, PatchError> {
        let bytes = fs::read(path).map_err(|e| PatchError::ReadFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let content = String::from_utf8(bytes).map_err(|e| PatchError::ReadFailure {
            path: path.to_path_buf(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
        Ok(Self::new(path.to_path_buf(), &content))
    }

    pub fn line_ending(&self) -> &'static str {
        self.line_ending
    }

    /// Reassembles the full file content.
    pub fn content(&self) -> String {
        self.lines.concat()
    }

    /// Makes sure the line at `index` ends with a terminator, so that text
    /// spliced after it starts on a fresh line.
    pub(crate) fn terminate_line(&mut self, index: usize) {
        let line_ending = self.line_ending;
        if let Some(line) = self.lines.get_mut(index) {
            if !line.ends_with('\n') {
                line.push_str(line_ending);
            }
        }
    }
}

/// Returns the whitespace prefix of a line.
pub fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Splits a line into its text and its terminator (`""`, `"\n"` or `"\r\n"`).
pub fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(text) = line.strip_suffix("\r\n") {
        (text, "\r\n")
    } else if let Some(text) = line.strip_suffix('\n') {
        (text, "\n")
    } else {
        (line, "")
    }
}

/// Turns caller-supplied payload lines into terminated source lines.
///
/// Blank entries become bare blank lines; everything else gets `indent`
/// prepended.
pub fn render_payload(payload: &[String], indent: &str, line_ending: &str) -> Vec<String> {
    payload
        .iter()
        .map(|text| {
            if text.trim().is_empty() {
                line_ending.to_string()
            } else {
                format!("{indent}{text}{line_ending}")
            }
        })
        .collect()
}
