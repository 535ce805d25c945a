//! Method header matching.
//!
//! Headers are matched by containment on their text rather than by parsing
//! the full descriptor grammar. Everything that looks at a header goes through
//! [`MethodSignature`] and [`MethodMatcher`], so exact descriptor parsing can
//! replace the substring tests here without touching rule logic.
//!
//! A target name that occurs inside a longer identifier still matches
//! (`NameContains("equals")` fires on `equalsIgnoreCase`), and
//! `DeclarationContains` also looks at parameter and return types.

use serde::{Deserialize, Serialize};

/// A view over one `.method` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSignature<'a> {
    text: &'a str,
}

impl<'a> MethodSignature<'a> {
    pub fn new(header: &'a str) -> Self {
        Self {
            text: header.trim(),
        }
    }

    /// The trimmed header text.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// The last whitespace-separated token, e.g. `equals(Ljava/lang/Object;)Z`.
    pub fn declaration(&self) -> &'a str {
        self.text.split_whitespace().last().unwrap_or_default()
    }

    /// Tokens between `.method` and the declaration (`public`, `static`, ...).
    pub fn modifiers(&self) -> impl Iterator<Item = &'a str> {
        let tokens: Vec<&'a str> = self.text.split_whitespace().collect();
        let end = tokens.len().saturating_sub(1);
        tokens.into_iter().take(end).skip(1)
    }

    pub fn name(&self) -> &'a str {
        let declaration = self.declaration();
        declaration
            .find('(')
            .map_or(declaration, |open| &declaration[..open])
    }

    /// Parameter list and return type, e.g. `(Ljava/lang/String;I)Z`.
    pub fn descriptor(&self) -> &'a str {
        let declaration = self.declaration();
        declaration
            .find('(')
            .map_or("", |open| &declaration[open..])
    }

    pub fn is_static(&self) -> bool {
        self.modifiers().any(|token| token == "static")
    }

    /// Registers the runtime fills with incoming arguments: one per parameter,
    /// two for `J`/`D`, plus one for the receiver of instance methods.
    pub fn parameter_registers(&self) -> u32 {
        let descriptor = self.descriptor();
        let params = descriptor
            .strip_prefix('(')
            .and_then(|rest| rest.split(')').next())
            .unwrap_or_default();
        let receiver = u32::from(!self.is_static());
        receiver + descriptor_width(params)
    }
}

fn descriptor_width(params: &str) -> u32 {
    let mut width = 0;
    let mut chars = params.chars();
    while let Some(c) = chars.next() {
        match c {
            'J' | 'D' => width += 2,
            'L' => {
                chars.by_ref().find(|&c| c == ';');
                width += 1;
            }
            '[' => {
                let mut element = chars.next();
                while element == Some('[') {
                    element = chars.next();
                }
                if element == Some('L') {
                    chars.by_ref().find(|&c| c == ';');
                }
                width += 1;
            }
            _ => width += 1,
        }
    }
    width
}

/// Selects method blocks by their header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodMatcher {
    /// Every method block.
    #[default]
    Any,
    /// The header contains the text anywhere.
    Contains(String),
    /// The trimmed header starts with the text (modifiers included).
    StartsWith(String),
    /// The method name contains the text.
    NameContains(String),
    /// The declaration (name, parameters and return type) contains the text.
    DeclarationContains(String),
}

impl MethodMatcher {
    pub fn matches(&self, signature: &MethodSignature<'_>) -> bool {
        match self {
            Self::Any => true,
            Self::Contains(needle) => signature.text().contains(needle.as_str()),
            Self::StartsWith(prefix) => signature.text().starts_with(prefix.as_str()),
            Self::NameContains(needle) => signature.name().contains(needle.as_str()),
            Self::DeclarationContains(needle) => {
                signature.declaration().contains(needle.as_str())
            }
        }
    }
}
