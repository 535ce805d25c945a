//! # Class Member Injector
//!
//! Inserts fields and whole method blocks below a section marker comment
//! (`# static fields`, `# instance fields`, `# direct methods`, ...).
//!
//! The marker and the blank lines after it are kept; the new member goes in
//! front of the first existing member of the section and takes over its
//! indentation. Existing members keep their order and count.

use crate::error::PatchError;
use crate::registers;
use crate::scanner;
use crate::source::{SourceFile, leading_whitespace, render_payload};

pub struct ClassMemberInjector<'a> {
    marker: &'a str,
}

impl<'a> ClassMemberInjector<'a> {
    pub fn new(marker: &'a str) -> Self {
        Self {
            marker: marker.trim(),
        }
    }

    /// Index of the marker line.
    pub fn locate(&self, source: &SourceFile) -> Result<usize, PatchError> {
        source
            .lines
            .iter()
            .position(|line| line.trim() == self.marker)
            .ok_or_else(|| PatchError::MarkerNotFound {
                marker: self.marker.to_string(),
            })
    }

    /// Inserts `member` and returns the number of lines added.
    ///
    /// Returns `Ok(0)` when the member's first line is already in the file.
    /// Method blocks inside `member` must be closed and carry consistent
    /// register counts.
    pub fn inject(&self, source: &mut SourceFile, member: &[String]) -> Result<usize, PatchError> {
        let marker_index = self.locate(source)?;

        let Some(first) = member.iter().map(|line| line.trim()).find(|line| !line.is_empty())
        else {
            return Ok(0);
        };
        if source.lines.iter().any(|line| line.trim() == first) {
            return Ok(0);
        }

        let segments = scanner::scan(member).map_err(|error| match error {
            PatchError::MalformedSource { line } => PatchError::MalformedPayload { line },
            other => other,
        })?;
        for block in scanner::methods(&segments) {
            registers::check_payload(&block.signature(), &block.body)?;
        }

        source.terminate_line(marker_index);
        let insert_at = source
            .lines
            .iter()
            .skip(marker_index + 1)
            .position(|line| !line.trim().is_empty())
            .map_or(source.lines.len(), |offset| marker_index + 1 + offset);
        let indent = source
            .lines
            .get(insert_at)
            .map_or("", |line| leading_whitespace(line))
            .to_string();

        let rendered = render_payload(member, &indent, source.line_ending());
        let added = rendered.len();
        source.lines.splice(insert_at..insert_at, rendered);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CLASS: &str = "\
.class public Landroid/app/ApplicationPackageManager;
.super Landroid/content/pm/PackageManager;


# static fields
.field private static final DEBUG_TRACE_GRANTS:Z = false

.field private static final TAG:Ljava/lang/String; = \"ApplicationPackageManager\"


# instance fields
.field private final mContext:Landroid/app/ContextImpl;
";

    fn source() -> SourceFile {
        SourceFile::new(PathBuf::from("ApplicationPackageManager.smali"), CLASS)
    }

    fn fields(source: &SourceFile) -> Vec<String> {
        source
            .lines
            .iter()
            .filter(|line| line.starts_with(".field"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_insert_field_after_static_fields_marker() {
        let mut source = source();
        let before = fields(&source);
        let member = vec![
            ".field private static sHook:Landroid/content/Context;".to_string(),
            String::new(),
        ];
        let added = ClassMemberInjector::new("# static fields")
            .inject(&mut source, &member)
            .unwrap();
        assert_eq!(added, 2);

        let after = fields(&source);
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[0], ".field private static sHook:Landroid/content/Context;\n");
        assert_eq!(&after[1..], &before[..]);
        assert!(source.content().contains(
            "# static fields\n.field private static sHook:Landroid/content/Context;\n\n.field private static final DEBUG_TRACE_GRANTS:Z = false\n"
        ));
    }

    #[test]
    fn test_indentation_follows_next_member() {
        let mut source = SourceFile::new(
            PathBuf::from("A.smali"),
            "  # direct methods\n\n  .method public a()V\n  .end method\n",
        );
        ClassMemberInjector::new("# direct methods")
            .inject(&mut source, &[".field x:I".to_string()])
            .unwrap();
        assert_eq!(source.lines[2], "  .field x:I\n");
    }

    #[test]
    fn test_missing_marker() {
        let mut source = SourceFile::new(PathBuf::from("A.smali"), ".class LA;\n");
        let err = ClassMemberInjector::new("# static fields")
            .inject(&mut source, &[".field x:I".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            PatchError::MarkerNotFound {
                marker: "# static fields".to_string()
            }
        );
        assert_eq!(source.content(), ".class LA;\n");
    }

    #[test]
    fn test_marker_at_end_of_file_without_newline() {
        let mut source = SourceFile::new(PathBuf::from("A.smali"), ".class LA;\n# static fields");
        ClassMemberInjector::new("# static fields")
            .inject(&mut source, &[".field x:I".to_string()])
            .unwrap();
        assert_eq!(source.content(), ".class LA;\n# static fields\n.field x:I\n");
    }

    #[test]
    fn test_second_insert_is_a_no_op() {
        let mut source = source();
        let injector = ClassMemberInjector::new("# instance fields");
        let member = vec![".field private final mHook:Landroid/content/Context;".to_string()];
        assert_eq!(injector.inject(&mut source, &member).unwrap(), 1);
        let once = source.content();
        assert_eq!(injector.inject(&mut source, &member).unwrap(), 0);
        assert_eq!(source.content(), once);
    }

    #[test]
    fn test_inserted_method_must_declare_enough_registers() {
        let mut source = source();
        let member: Vec<String> = [
            ".method public constructor <init>(Landroid/content/Context;)V",
            "    .registers 1",
            "    iput-object p1, p0, LA;->mContext:Landroid/content/Context;",
            "    return-void",
            ".end method",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let err = ClassMemberInjector::new("# instance fields")
            .inject(&mut source, &member)
            .unwrap_err();
        assert_eq!(err.kind(), "inconsistent_registers");
        assert_eq!(source.content(), CLASS);
    }

    #[test]
    fn test_unterminated_member_is_blamed_on_the_payload() {
        let mut source = source();
        let member: Vec<String> = [
            "",
            ".method public hook()V",
            "    .registers 1",
            "    return-void",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let err = ClassMemberInjector::new("# instance fields")
            .inject(&mut source, &member)
            .unwrap_err();
        assert_eq!(err, PatchError::MalformedPayload { line: 2 });
        assert_eq!(source.content(), CLASS);
    }
}
