//! Register directive handling.
//!
//! Locates and rewrites the `.registers <N>` directive of a method body and
//! checks that injected payloads declare enough registers for the operands
//! they use.

use crate::error::PatchError;
use crate::signature::MethodSignature;
use crate::source::split_terminator;
use once_cell::sync::Lazy;
use regex::Regex;

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*\.registers\s+)(\d+)(\s*(?:#.*)?)$").expect("register directive pattern")
});

static OPERAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([vp])(\d+)$").expect("register operand pattern"));

/// The count declared by a `.registers` line, if `line` is one.
pub fn declared_count(line: &str) -> Option<u32> {
    let (text, _) = split_terminator(line);
    DIRECTIVE
        .captures(text)
        .and_then(|caps| caps.get(2))
        .and_then(|count| count.as_str().parse().ok())
}

/// Index of the register directive within `lines`.
pub fn find_directive(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| declared_count(line).is_some())
}

/// Rewrites the numeric operand of a `.registers` line, keeping indentation,
/// trailing text and terminator as they were.
pub fn rewrite_count(line: &str, count: u32) -> Option<String> {
    let (text, terminator) = split_terminator(line);
    let caps = DIRECTIVE.captures(text)?;
    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let suffix = caps.get(3).map_or("", |m| m.as_str());
    Some(format!("{prefix}{count}{suffix}{terminator}"))
}

/// Highest register indices referenced by instruction operands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterUsage {
    pub highest_local: Option<u32>,
    pub highest_param: Option<u32>,
}

pub fn usage<S: AsRef<str>>(lines: &[S]) -> RegisterUsage {
    let mut usage = RegisterUsage::default();
    for line in lines {
        let text = line.as_ref().trim();
        if text.is_empty() || text.starts_with(['.', '#', ':']) {
            continue;
        }
        // Operands precede any string literal or type descriptor.
        let operands = text.split('"').next().unwrap_or_default();
        for token in operands.split(|c: char| c == ',' || c == '{' || c == '}' || c.is_whitespace()) {
            let Some(caps) = OPERAND.captures(token) else {
                continue;
            };
            let Some(index) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                continue;
            };
            let slot = if caps.get(1).is_some_and(|m| m.as_str() == "v") {
                &mut usage.highest_local
            } else {
                &mut usage.highest_param
            };
            *slot = Some(slot.map_or(index, |current| current.max(index)));
        }
    }
    usage
}

/// Verifies a payload that declares its own register count.
///
/// The count must hold the method's incoming arguments, every `vN` must be
/// below it and every `pN` must fall within the argument window. Payloads
/// without a `.registers` line are accepted unchanged.
pub fn check_payload<S: AsRef<str>>(
    signature: &MethodSignature<'_>,
    payload: &[S],
) -> Result<(), PatchError> {
    let Some(declared) = payload.iter().find_map(|line| declared_count(line.as_ref())) else {
        return Ok(());
    };
    let ins = signature.parameter_registers();
    let used = usage(payload);

    let mut required = ins;
    if let Some(local) = used.highest_local {
        required = required.max(local + 1);
    }
    let params_fit = used.highest_param.is_none_or(|param| param < ins);
    if let Some(param) = used.highest_param {
        required = required.max(param + 1);
    }

    if declared < required || !params_fit {
        return Err(PatchError::InconsistentRegisters {
            method: signature.declaration().to_string(),
            declared,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declared_count() {
        assert_eq!(declared_count("    .registers 12\n"), Some(12));
        assert_eq!(declared_count(".registers 3 # tuned\r\n"), Some(3));
        assert_eq!(declared_count("    .locals 2\n"), None);
        assert_eq!(declared_count("    const/4 v0, 0x0\n"), None);
    }

    #[test]
    fn test_rewrite_count_touches_only_the_number() {
        assert_eq!(
            rewrite_count("\t.registers 7  # keep\r\n", 12).unwrap(),
            "\t.registers 12  # keep\r\n"
        );
        assert_eq!(rewrite_count("    return-void\n", 1), None);
    }

    #[test]
    fn test_usage_ignores_descriptors_and_literals() {
        let body = lines(&[
            ".registers 3",
            "invoke-static {v1, p0}, Lcom/p9/v8Util;->f(I)V",
            "const-string v0, \"v7 p5\"",
            "iget-object v2, p1, Landroid/app/X;->mContext:Landroid/content/Context;",
            ":cond_0",
        ]);
        assert_eq!(
            usage(&body),
            RegisterUsage {
                highest_local: Some(2),
                highest_param: Some(1),
            }
        );
    }

    #[test]
    fn test_check_payload() {
        let equals = MethodSignature::new(".method public equals(Ljava/lang/Object;)Z");
        let ok = lines(&[".registers 2", "const/4 v0, 0x0", "return v0"]);
        assert!(check_payload(&equals, &ok).is_ok());

        let too_small = lines(&[".registers 1", "const/4 v0, 0x0", "return v0"]);
        assert_eq!(
            check_payload(&equals, &too_small),
            Err(PatchError::InconsistentRegisters {
                method: "equals(Ljava/lang/Object;)Z".to_string(),
                declared: 1,
                required: 2,
            })
        );

        let local_overflow = lines(&[".registers 2", "const/4 v2, 0x0", "return v2"]);
        assert!(check_payload(&equals, &local_overflow).is_err());

        let stray_param = lines(&[".registers 4", "return p2"]);
        assert!(check_payload(&equals, &stray_param).is_err());

        let undeclared = lines(&["const/4 v9, 0x0"]);
        assert!(check_payload(&equals, &undeclared).is_ok());
    }
}
