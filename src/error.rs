//! Error taxonomy for the patch engine.
//!
//! Every variant is cheap to clone so a failure can be stored in a
//! [`PatchResult`](crate::session::PatchResult) and reported after the batch
//! has finished.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A `.method` directive was never closed before end of file.
    #[error("unterminated method block opened at line {line}")]
    MalformedSource { line: usize },

    /// A member payload opens a `.method` it never closes. `line` counts
    /// from the start of the payload.
    #[error("member payload leaves the method opened at payload line {line} unterminated")]
    MalformedPayload { line: usize },

    /// The section marker an `InsertMember` rule anchors on is absent.
    #[error("section marker `{marker}` not found")]
    MarkerNotFound { marker: String },

    /// An injected payload declares fewer registers than its instructions use.
    #[error(
        "payload for `{method}` declares {declared} registers but needs {required}"
    )]
    InconsistentRegisters {
        method: String,
        declared: u32,
        required: u32,
    },

    #[error("failed to read {}: {reason}", path.display())]
    ReadFailure { path: PathBuf, reason: String },

    #[error("failed to write {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    /// The disassembler or assembler exited unsuccessfully.
    #[error("`{tool}` failed ({status}): {stderr}")]
    ExternalToolFailure {
        tool: String,
        status: String,
        stderr: String,
    },
}

impl PatchError {
    /// Short, stable name of the error kind, used in summaries and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSource { .. } => "malformed_source",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::MarkerNotFound { .. } => "marker_not_found",
            Self::InconsistentRegisters { .. } => "inconsistent_registers",
            Self::ReadFailure { .. } => "read_failure",
            Self::WriteFailure { .. } => "write_failure",
            Self::ExternalToolFailure { .. } => "external_tool_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = PatchError::ReadFailure {
            path: PathBuf::from("a/B.smali"),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to read a/B.smali: No such file or directory"
        );
        assert_eq!(err.kind(), "read_failure");

        let err = PatchError::MarkerNotFound {
            marker: "# static fields".to_string(),
        };
        assert_eq!(err.to_string(), "section marker `# static fields` not found");
    }
}
