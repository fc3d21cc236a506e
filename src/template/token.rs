//! Template tokens

use std::ops::Range;
use std::sync::Arc;

/// How an argument bound to a placeholder is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaptureHint {
    /// Scalars as-is, plain structures as text, collections element-wise
    #[default]
    Default,
    /// `{@Name}`: keep the full structure
    Structure,
    /// `{$Name}`: render the value as a string
    Stringify,
}

impl CaptureHint {
    pub fn prefix(&self) -> Option<char> {
        match self {
            CaptureHint::Default => None,
            CaptureHint::Structure => Some('@'),
            CaptureHint::Stringify => Some('$'),
        }
    }
}

/// Fixed-width padding requested with `{Name,10}` or `{Name,-10}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pub width: usize,
    /// Pad on the right instead of the left
    pub left: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToken {
    /// Literal text with brace escapes resolved
    pub text: String,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyToken {
    pub name: Arc<str>,
    /// Set for all-digit names such as `{0}`
    pub index: Option<usize>,
    pub hint: CaptureHint,
    pub format: Option<String>,
    pub alignment: Option<Alignment>,
    pub span: Range<usize>,
}

impl PropertyToken {
    pub fn is_positional(&self) -> bool {
        self.index.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(TextToken),
    Property(PropertyToken),
}

impl Token {
    /// Byte range of the token in the template text
    pub fn span(&self) -> Range<usize> {
        match self {
            Token::Text(t) => t.span.clone(),
            Token::Property(p) => p.span.clone(),
        }
    }

    pub fn as_property(&self) -> Option<&PropertyToken> {
        match self {
            Token::Property(p) => Some(p),
            Token::Text(_) => None,
        }
    }
}
