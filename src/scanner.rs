//! # Method Block Scanner
//!
//! Splits a file's lines into ordered [`Segment`]s in a single forward pass.
//!
//! A line whose trimmed text starts with `.method` opens a block; the next
//! line trimmed-equal to or starting with `.end method` closes it. Everything
//! outside a block is kept verbatim as preamble (before the first block) or
//! trailer (between and after blocks), so `render(scan(lines)) == lines`.

use crate::error::PatchError;
use crate::signature::MethodSignature;
use crate::source::leading_whitespace;

pub const METHOD_OPEN: &str = ".method";
pub const METHOD_CLOSE: &str = ".end method";

const DEFAULT_INDENT: &str = "    ";

/// A `.method` ... `.end method` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBlock {
    pub header: String,
    pub body: Vec<String>,
    pub footer: String,
    /// Indentation unit for lines spliced into the body.
    pub indent: String,
}

impl MethodBlock {
    fn open(header: String) -> Self {
        let indent = match leading_whitespace(&header) {
            "" => DEFAULT_INDENT.to_string(),
            prefix => prefix.to_string(),
        };
        Self {
            header,
            body: Vec::new(),
            footer: String::new(),
            indent,
        }
    }

    pub fn signature(&self) -> MethodSignature<'_> {
        MethodSignature::new(&self.header)
    }

    /// Number of source lines the block spans, header and footer included.
    pub fn line_count(&self) -> usize {
        self.body.len() + 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Preamble(Vec<String>),
    Method(MethodBlock),
    Trailer(Vec<String>),
}

pub fn is_method_open(line: &str) -> bool {
    line.trim().starts_with(METHOD_OPEN)
}

pub fn is_method_close(line: &str) -> bool {
    line.trim().starts_with(METHOD_CLOSE)
}

/// Segments `lines`.
///
/// Fails with [`PatchError::MalformedSource`] when the input ends inside a
/// block; the missing footer is never synthesised.
pub fn scan(lines: &[String]) -> Result<Vec<Segment>, PatchError> {
    let mut segments = Vec::new();
    let mut loose: Vec<String> = Vec::new();
    let mut open: Option<(usize, MethodBlock)> = None;
    let mut seen_block = false;

    for (index, line) in lines.iter().enumerate() {
        if let Some((start, mut block)) = open.take() {
            if is_method_close(line) {
                block.footer = line.clone();
                segments.push(Segment::Method(block));
            } else {
                block.body.push(line.clone());
                open = Some((start, block));
            }
        } else if is_method_open(line) {
            if !loose.is_empty() {
                let pending = std::mem::take(&mut loose);
                segments.push(if seen_block {
                    Segment::Trailer(pending)
                } else {
                    Segment::Preamble(pending)
                });
            }
            seen_block = true;
            open = Some((index + 1, MethodBlock::open(line.clone())));
        } else {
            loose.push(line.clone());
        }
    }

    if let Some((line, _)) = open {
        return Err(PatchError::MalformedSource { line });
    }
    if !loose.is_empty() {
        segments.push(if seen_block {
            Segment::Trailer(loose)
        } else {
            Segment::Preamble(loose)
        });
    }
    Ok(segments)
}

/// Flattens segments back into a line stream.
pub fn render(segments: Vec<Segment>) -> Vec<String> {
    let mut lines = Vec::new();
    for segment in segments {
        match segment {
            Segment::Preamble(loose) | Segment::Trailer(loose) => lines.extend(loose),
            Segment::Method(block) => {
                lines.push(block.header);
                lines.extend(block.body);
                lines.push(block.footer);
            }
        }
    }
    lines
}

/// Iterates over the method blocks of a segment list.
pub fn methods(segments: &[Segment]) -> impl Iterator<Item = &MethodBlock> {
    segments.iter().filter_map(|segment| match segment {
        Segment::Method(block) => Some(block),
        _ => None,
    })
}
