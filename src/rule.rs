//! # Patch Rules
//!
//! A [`PatchRule`] pairs a method selector with one structural [`Action`].
//!
//! Rules are plain data (they derive `Deserialize`), so a rule set can be
//! written in TOML as well as built in code. Evaluation works on the file's
//! line stream: method rules rescan the current lines, so every rule sees the
//! output of the rules applied before it.
//!
//! ## Scope
//!
//! - `first`: the action fires on at most one matching block per file.
//! - `all`: the action fires on every matching block.
//!
//! Every action is written so that applying it to its own output changes
//! nothing, which keeps re-running a rule set on a patched tree harmless.

use crate::error::PatchError;
use crate::injector::ClassMemberInjector;
use crate::registers;
use crate::scanner::{self, MethodBlock, Segment};
use crate::signature::MethodMatcher;
use crate::source::{SourceFile, leading_whitespace, render_payload};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    #[serde(alias = "first_occurrence")]
    First,
    #[serde(alias = "all_occurrences")]
    All,
}

/// Which marker lines an injection applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectMode {
    #[default]
    First,
    All,
}

/// Matches a single body line, compared after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMatcher {
    Equals(String),
    Contains(String),
    StartsWith(String),
}

impl LineMatcher {
    pub fn matches(&self, line: &str) -> bool {
        let text = line.trim();
        match self {
            Self::Equals(expected) => text == expected.trim(),
            Self::Contains(needle) => text.contains(needle.as_str()),
            Self::StartsWith(prefix) => text.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Keeps header and footer, swaps the body for `lines`.
    ReplaceBody { lines: Vec<String> },
    /// Rewrites the operand of the block's `.registers` directive.
    SetRegisterCount { count: u32 },
    /// Splices `lines` in front of matching body lines.
    InjectBefore {
        marker: LineMatcher,
        lines: Vec<String>,
        #[serde(default)]
        mode: InjectMode,
    },
    /// Splices `lines` right after matching body lines.
    InjectAfter {
        marker: LineMatcher,
        lines: Vec<String>,
        #[serde(default)]
        mode: InjectMode,
    },
    /// Adds a class member below a section marker such as `# static fields`.
    InsertMember { section: String, lines: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRule {
    pub name: String,
    /// Header selector. Ignored by `InsertMember`.
    #[serde(default)]
    pub header: MethodMatcher,
    /// When set, only blocks with a body line matching it are selected.
    #[serde(default)]
    pub body_contains: Option<LineMatcher>,
    pub action: Action,
    #[serde(default)]
    pub scope: Scope,
}

/// What a rule did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule rewrote this many method blocks (1 for a member insert).
    Applied { blocks: usize },
    /// An `all` rule rewrote `blocks` blocks, but at least one other
    /// matching block failed. `error` is the first such failure.
    Partial { blocks: usize, error: PatchError },
    /// Targets were found but already in the requested state.
    Unchanged,
    NotMatched,
    Failed { error: PatchError },
}

impl RuleOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::Partial { .. })
    }

    pub fn error(&self) -> Option<&PatchError> {
        match self {
            Self::Partial { error, .. } | Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

enum BlockEdit {
    NoTarget,
    Unchanged,
    Changed,
}

impl PatchRule {
    pub fn new(name: impl Into<String>, header: MethodMatcher, action: Action) -> Self {
        Self {
            name: name.into(),
            header,
            body_contains: None,
            action,
            scope: Scope::First,
        }
    }

    /// A rule inserting `lines` below the `section` marker.
    pub fn insert_member(name: impl Into<String>, section: &str, lines: Vec<String>) -> Self {
        Self::new(
            name,
            MethodMatcher::Any,
            Action::InsertMember {
                section: section.to_string(),
                lines,
            },
        )
    }

    pub fn all_occurrences(mut self) -> Self {
        self.scope = Scope::All;
        self
    }

    pub fn when_body(mut self, matcher: LineMatcher) -> Self {
        self.body_contains = Some(matcher);
        self
    }

    pub fn selects(&self, block: &MethodBlock) -> bool {
        self.header.matches(&block.signature())
            && self
                .body_contains
                .as_ref()
                .is_none_or(|matcher| block.body.iter().any(|line| matcher.matches(line)))
    }

    /// Applies the rule to `source` in place.
    ///
    /// On error `source` is left exactly as it was. With `all` scope a block
    /// that fails does not stop the others; the blocks that succeeded are
    /// kept and reported as [`RuleOutcome::Partial`].
    pub fn apply(&self, source: &mut SourceFile) -> Result<RuleOutcome, PatchError> {
        if let Action::InsertMember { section, lines } = &self.action {
            let injector = ClassMemberInjector::new(section);
            return Ok(match injector.inject(source, lines)? {
                0 => RuleOutcome::Unchanged,
                _ => RuleOutcome::Applied { blocks: 1 },
            });
        }

        let line_ending = source.line_ending();
        let mut segments = scanner::scan(&source.lines)?;
        let mut fired = 0;
        let mut rewritten = 0;
        let mut first_error = None;

        for segment in &mut segments {
            let Segment::Method(block) = segment else {
                continue;
            };
            if self.scope == Scope::First && fired > 0 {
                break;
            }
            if !self.selects(block) {
                continue;
            }
            let edit = match self.edit_block(block, line_ending) {
                Ok(edit) => edit,
                Err(error) if self.scope == Scope::All => {
                    first_error.get_or_insert(error);
                    continue;
                }
                Err(error) => return Err(error),
            };
            match edit {
                BlockEdit::NoTarget => {}
                BlockEdit::Unchanged => fired += 1,
                BlockEdit::Changed => {
                    fired += 1;
                    rewritten += 1;
                }
            }
        }

        if let Some(error) = first_error {
            if rewritten == 0 {
                return Err(error);
            }
            source.lines = scanner::render(segments);
            return Ok(RuleOutcome::Partial {
                blocks: rewritten,
                error,
            });
        }
        if rewritten > 0 {
            source.lines = scanner::render(segments);
            Ok(RuleOutcome::Applied { blocks: rewritten })
        } else if fired > 0 {
            Ok(RuleOutcome::Unchanged)
        } else {
            Ok(RuleOutcome::NotMatched)
        }
    }

    fn edit_block(
        &self,
        block: &mut MethodBlock,
        line_ending: &str,
    ) -> Result<BlockEdit, PatchError> {
        match &self.action {
            Action::ReplaceBody { lines } => {
                registers::check_payload(&block.signature(), lines)?;
                let body = render_payload(lines, &block.indent, line_ending);
                if body == block.body {
                    return Ok(BlockEdit::Unchanged);
                }
                block.body = body;
                Ok(BlockEdit::Changed)
            }
            Action::SetRegisterCount { count } => {
                let Some(index) = registers::find_directive(&block.body) else {
                    return Ok(BlockEdit::NoTarget);
                };
                let line = &mut block.body[index];
                match registers::rewrite_count(line, *count) {
                    Some(rewritten) if rewritten != *line => {
                        *line = rewritten;
                        Ok(BlockEdit::Changed)
                    }
                    _ => Ok(BlockEdit::Unchanged),
                }
            }
            Action::InjectBefore {
                marker,
                lines,
                mode,
            } => Ok(inject(block, marker, lines, *mode, Side::Before, line_ending)),
            Action::InjectAfter {
                marker,
                lines,
                mode,
            } => Ok(inject(block, marker, lines, *mode, Side::After, line_ending)),
            Action::InsertMember { .. } => Ok(BlockEdit::NoTarget),
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Before,
    After,
}

fn inject(
    block: &mut MethodBlock,
    marker: &LineMatcher,
    payload: &[String],
    mode: InjectMode,
    side: Side,
    line_ending: &str,
) -> BlockEdit {
    let mut targets: Vec<usize> = block
        .body
        .iter()
        .enumerate()
        .filter(|(_, line)| marker.matches(line))
        .map(|(index, _)| index)
        .collect();
    if mode == InjectMode::First {
        targets.truncate(1);
    }
    if targets.is_empty() {
        return BlockEdit::NoTarget;
    }

    let mut changed = false;
    // Back to front so earlier indices stay valid.
    for &index in targets.iter().rev() {
        let indent = leading_whitespace(&block.body[index]).to_string();
        let rendered = render_payload(payload, &indent, line_ending);
        let at = match side {
            Side::Before => index,
            Side::After => index + 1,
        };
        let present = match side {
            Side::Before => index
                .checked_sub(rendered.len())
                .is_some_and(|start| block.body[start..index] == rendered[..]),
            Side::After => block
                .body
                .get(at..at + rendered.len())
                .is_some_and(|following| following == &rendered[..]),
        };
        if present {
            continue;
        }
        block.body.splice(at..at, rendered);
        changed = true;
    }

    if changed {
        BlockEdit::Changed
    } else {
        BlockEdit::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CLASS: &str = "\
.class public LFoo;
.super Ljava/lang/Object;

# virtual methods
.method public equals(Ljava/lang/Object;)Z
    .registers 4

    invoke-custom {p0, p1}, call_site_0(Ljava/lang/Object;)Z

    move-result v0

    return v0
.end method

.method public getName()Ljava/lang/String;
    .registers 2

    iget-object v0, p0, LFoo;->name:Ljava/lang/String;

    return-object v0
.end method

.method public getTitle()Ljava/lang/String;
    .registers 2

    iget-object v0, p0, LFoo;->title:Ljava/lang/String;

    return-object v0
.end method
";

    fn source() -> SourceFile {
        SourceFile::new(PathBuf::from("Foo.smali"), CLASS)
    }

    fn strings(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    fn changed_lines(before: &[String], after: &[String]) -> usize {
        before.iter().zip(after).filter(|(a, b)| a != b).count()
    }

    #[test]
    fn test_replace_body_keeps_header_and_footer() {
        let mut source = source();
        let rule = PatchRule::new(
            "defuse equals",
            MethodMatcher::NameContains("equals".into()),
            Action::ReplaceBody {
                lines: strings(&[".registers 2", "const/4 v0, 0x0", "return v0"]),
            },
        );
        let before = source.lines.len();
        assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::Applied { blocks: 1 });
        let content = source.content();
        assert!(content.contains(
            ".method public equals(Ljava/lang/Object;)Z\n    .registers 2\n    const/4 v0, 0x0\n    return v0\n.end method\n"
        ));
        // 7 body lines removed, 3 inserted.
        assert_eq!(source.lines.len(), before - 7 + 3);
        assert!(content.ends_with(&CLASS[CLASS.find("\n.method public getName").unwrap()..]));
    }

    #[test]
    fn test_replace_body_rejects_inconsistent_payload() {
        let mut source = source();
        let rule = PatchRule::new(
            "bad",
            MethodMatcher::NameContains("equals".into()),
            Action::ReplaceBody {
                lines: strings(&[".registers 1", "const/4 v3, 0x0", "return v3"]),
            },
        );
        let err = rule.apply(&mut source).unwrap_err();
        assert_eq!(err.kind(), "inconsistent_registers");
        assert_eq!(source.content(), CLASS);
    }

    #[test]
    fn test_set_register_count_changes_exactly_one_line() {
        let mut source = source();
        let before = source.lines.clone();
        let rule = PatchRule::new(
            "bump",
            MethodMatcher::Contains("getName()".into()),
            Action::SetRegisterCount { count: 12 },
        );
        assert!(rule.apply(&mut source).unwrap().changed());
        assert_eq!(source.lines.len(), before.len());
        assert_eq!(changed_lines(&before, &source.lines), 1);
        assert!(source.content().contains("getName()Ljava/lang/String;\n    .registers 12\n"));
    }

    #[test]
    fn test_first_occurrence_fires_once_and_all_fires_everywhere() {
        let payload = strings(&["invoke-static {v0}, LHook;->wrap(Ljava/lang/String;)Ljava/lang/String;", "move-result-object v0"]);
        let action = Action::InjectBefore {
            marker: LineMatcher::Equals("return-object v0".into()),
            lines: payload,
            mode: InjectMode::First,
        };

        let mut once = source();
        let first = PatchRule::new("hook", MethodMatcher::NameContains("get".into()), action.clone());
        assert_eq!(first.apply(&mut once).unwrap(), RuleOutcome::Applied { blocks: 1 });
        assert_eq!(once.content().matches("LHook;->wrap").count(), 1);

        let mut everywhere = source();
        let all = first.clone().all_occurrences();
        assert_eq!(all.apply(&mut everywhere).unwrap(), RuleOutcome::Applied { blocks: 2 });
        assert_eq!(everywhere.content().matches("LHook;->wrap").count(), 2);
        assert!(everywhere.content().contains(
            "    invoke-static {v0}, LHook;->wrap(Ljava/lang/String;)Ljava/lang/String;\n    move-result-object v0\n    return-object v0\n"
        ));
    }

    #[test]
    fn test_rules_are_idempotent() {
        let rules = vec![
            PatchRule::new(
                "hook",
                MethodMatcher::Contains("getTitle".into()),
                Action::InjectBefore {
                    marker: LineMatcher::Equals("return-object v0".into()),
                    lines: strings(&["nop"]),
                    mode: InjectMode::All,
                },
            ),
            PatchRule::new(
                "after registers",
                MethodMatcher::Contains("getTitle".into()),
                Action::InjectAfter {
                    marker: LineMatcher::StartsWith(".registers".into()),
                    lines: strings(&["invoke-static {}, LHook;->enter()V"]),
                    mode: InjectMode::First,
                },
            ),
            PatchRule::new(
                "bump",
                MethodMatcher::Contains("getTitle".into()),
                Action::SetRegisterCount { count: 3 },
            ),
        ];
        let mut source = source();
        for rule in &rules {
            assert!(rule.apply(&mut source).unwrap().changed());
        }
        let once = source.content();
        for rule in &rules {
            assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::Unchanged);
        }
        assert_eq!(source.content(), once);
    }

    #[test]
    fn test_body_filter_selects_only_offending_methods() {
        let mut source = source();
        let rule = PatchRule::new(
            "sweep",
            MethodMatcher::Any,
            Action::ReplaceBody {
                lines: strings(&[".registers 2", "const/4 v0, 0x0", "return v0"]),
            },
        )
        .all_occurrences()
        .when_body(LineMatcher::Contains("invoke-custom".into()));
        assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::Applied { blocks: 1 });
        assert!(!source.content().contains("invoke-custom"));
        assert!(source.content().contains("iget-object v0, p0, LFoo;->title"));
    }

    #[test]
    fn test_unmatched_rule_leaves_source_alone() {
        let mut source = source();
        let rule = PatchRule::new(
            "absent",
            MethodMatcher::Contains("hasSystemFeature".into()),
            Action::SetRegisterCount { count: 12 },
        );
        assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::NotMatched);
        assert_eq!(source.content(), CLASS);
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let rule: PatchRule = toml::from_str(
            r#"
            name = "keybox"
            header = { starts_with = ".method public blacklist getKeyEntry(" }
            scope = "first"

            [action]
            kind = "inject_before"
            marker = { equals = "return-object v0" }
            lines = ["invoke-static {v0}, LHook;->f(LX;)LX;", "move-result-object v0"]
            "#,
        )
        .unwrap();
        assert_eq!(rule.scope, Scope::First);
        assert_eq!(
            rule.header,
            MethodMatcher::StartsWith(".method public blacklist getKeyEntry(".into())
        );
        assert!(matches!(
            rule.action,
            Action::InjectBefore { mode: InjectMode::First, .. }
        ));
    }

    #[test]
    fn test_all_scope_keeps_good_blocks_when_one_fails() {
        let content = "\
.method public final equals(Ljava/lang/Object;)Z
    .registers 3

    invoke-custom {p0, p1}, call_site_1(\"equals\", LFoo;, Ljava/lang/Object;)Z

    move-result v0

    return v0
.end method

.method public equalsRange(JJ)Z
    .registers 5

    invoke-custom {p0, p1, p2, p3, p4}, call_site_2(\"range\", LFoo;, J, J)Z

    move-result v0

    return v0
.end method
";
        let mut source = SourceFile::new(PathBuf::from("Foo.smali"), content);
        let rule = PatchRule::new(
            "defuse equals",
            MethodMatcher::NameContains("equals".into()),
            Action::ReplaceBody {
                lines: strings(&[".registers 2", "const/4 v0, 0x0", "return v0"]),
            },
        )
        .all_occurrences()
        .when_body(LineMatcher::Contains("invoke-custom".into()));

        let outcome = rule.apply(&mut source).unwrap();
        assert!(outcome.changed());
        assert_eq!(
            outcome,
            RuleOutcome::Partial {
                blocks: 1,
                error: PatchError::InconsistentRegisters {
                    method: "equalsRange(JJ)Z".to_string(),
                    declared: 2,
                    required: 5,
                },
            }
        );
        let patched = source.content();
        assert!(patched.starts_with(
            ".method public final equals(Ljava/lang/Object;)Z\n    .registers 2\n    const/4 v0, 0x0\n    return v0\n.end method\n"
        ));
        assert!(patched.ends_with(&content[content.find(".method public equalsRange").unwrap()..]));
    }

    #[test]
    fn test_all_scope_without_any_good_block_is_an_error() {
        let mut source = source();
        let rule = PatchRule::new(
            "bad",
            MethodMatcher::Any,
            Action::ReplaceBody {
                lines: strings(&[".registers 1", "const/4 v3, 0x0", "return v3"]),
            },
        )
        .all_occurrences();
        assert_eq!(rule.apply(&mut source).unwrap_err().kind(), "inconsistent_registers");
        assert_eq!(source.content(), CLASS);
    }

    #[test]
    fn test_inject_all_hits_every_marker_in_a_block() {
        let content = "\
.method public close()V
    .registers 2

    if-eqz p0, :cond_0

    return-void

    :cond_0
    invoke-direct {p0}, LFoo;->release()V

    return-void
.end method
";
        let mut source = SourceFile::new(PathBuf::from("Foo.smali"), content);
        let before_len = source.lines.len();
        let rule = PatchRule::new(
            "trace returns",
            MethodMatcher::Contains("close()V".into()),
            Action::InjectBefore {
                marker: LineMatcher::Equals("return-void".into()),
                lines: strings(&["invoke-static {}, LHook;->exit()V"]),
                mode: InjectMode::All,
            },
        );

        assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::Applied { blocks: 1 });
        assert_eq!(source.lines.len(), before_len + 2);
        let patched = source.content();
        assert_eq!(patched.matches("LHook;->exit()V").count(), 2);
        assert!(patched.contains(
            "    if-eqz p0, :cond_0\n\n    invoke-static {}, LHook;->exit()V\n    return-void\n\n    :cond_0\n"
        ));
        assert!(patched.contains(
            "LFoo;->release()V\n\n    invoke-static {}, LHook;->exit()V\n    return-void\n.end method\n"
        ));

        assert_eq!(rule.apply(&mut source).unwrap(), RuleOutcome::Unchanged);
        assert_eq!(source.content(), patched);

        let after = PatchRule::new(
            "trace entry and returns",
            MethodMatcher::Contains("close()V".into()),
            Action::InjectAfter {
                marker: LineMatcher::Equals("return-void".into()),
                lines: strings(&["nop"]),
                mode: InjectMode::All,
            },
        );
        assert_eq!(after.apply(&mut source).unwrap(), RuleOutcome::Applied { blocks: 1 });
        assert_eq!(source.content().matches("return-void\n    nop\n").count(), 2);
        assert_eq!(after.apply(&mut source).unwrap(), RuleOutcome::Unchanged);
    }
}
