use console::style;
use similar::{DiffTag, TextDiff};

const CONTEXT_LINES: usize = 2;

/// Renders a colored, line-numbered diff between two versions of a file.
///
/// Line numbers refer to the old file for removed and context lines and to
/// the new file for added lines.
pub fn generate_line_diff(old_lines: &[String], new_lines: &[String]) -> String {
    if old_lines == new_lines {
        return "No changes detected.".to_string();
    }

    let old_content: Vec<&str> = old_lines.iter().map(|l| l.trim_end_matches(['\r', '\n'])).collect();
    let new_content: Vec<&str> = new_lines.iter().map(|l| l.trim_end_matches(['\r', '\n'])).collect();
    let diff = TextDiff::from_slices(&old_content, &new_content);

    let mut diff_lines = Vec::new();
    for (hunk_idx, group) in diff.grouped_ops(CONTEXT_LINES).iter().enumerate() {
        if hunk_idx > 0 {
            diff_lines.push("...".to_string());
        }
        for op in group {
            let (old_range, new_range) = (op.old_range(), op.new_range());
            match op.tag() {
                DiffTag::Equal => {
                    for i in old_range {
                        diff_lines.push(format!("  {:>5}: {}", i + 1, old_content[i]));
                    }
                }
                DiffTag::Delete => {
                    for i in old_range {
                        let line = format!("- {:>5}: {}", i + 1, old_content[i]);
                        diff_lines.push(style(line).red().to_string());
                    }
                }
                DiffTag::Insert => {
                    for i in new_range {
                        let line = format!("+ {:>5}: {}", i + 1, new_content[i]);
                        diff_lines.push(style(line).green().to_string());
                    }
                }
                DiffTag::Replace => {
                    for i in old_range {
                        let line = format!("- {:>5}: {}", i + 1, old_content[i]);
                        diff_lines.push(style(line).red().to_string());
                    }
                    for i in new_range {
                        let line = format!("+ {:>5}: {}", i + 1, new_content[i]);
                        diff_lines.push(style(line).green().to_string());
                    }
                }
            }
        }
    }
    diff_lines.join("\n")
}
