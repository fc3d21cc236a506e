//! Message template parser
//!
//! Parsing never fails: anything that is not a well-formed placeholder is
//! kept as literal text. Token spans are contiguous and cover the whole
//! input, so the original text can always be reproduced from the tokens.

use super::token::{Alignment, CaptureHint, PropertyToken, TextToken, Token};
use std::sync::Arc;

/// Immutable result of parsing one template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    text: String,
    tokens: Vec<Token>,
    names: Vec<Arc<str>>,
    all_positional: bool,
}

impl ParsedTemplate {
    /// Parse a template; see the module docs for the degradation rules
    ///
    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::template::ParsedTemplate;
    ///
    /// let parsed = ParsedTemplate::parse("User {UserId} logged in from {@Request}");
    /// let names: Vec<&str> = parsed.property_names().iter().map(|n| &**n).collect();
    /// assert_eq!(names, ["UserId", "Request"]);
    /// ```
    pub fn parse(template: &str) -> Self {
        Parser::new(template).run()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Distinct placeholder names in first-occurrence order
    pub fn property_names(&self) -> &[Arc<str>] {
        &self.names
    }

    /// True when there is at least one placeholder and every one is an index
    pub fn is_all_positional(&self) -> bool {
        self.all_positional
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyToken> {
        self.tokens.iter().filter_map(Token::as_property)
    }

    /// Rebuild the template text from the token spans
    pub fn to_template_string(&self) -> String {
        self.tokens
            .iter()
            .map(|t| &self.text[t.span()])
            .collect()
    }

    pub(crate) fn raw(&self, token: &PropertyToken) -> &str {
        &self.text[token.span.clone()]
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    text: String,
    text_start: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            tokens: Vec::new(),
            text: String::new(),
            text_start: 0,
        }
    }

    fn run(mut self) -> ParsedTemplate {
        let bytes = self.src.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            match bytes[pos] {
                b'{' if bytes.get(pos + 1) == Some(&b'{') => {
                    self.text.push('{');
                    pos += 2;
                }
                b'{' => match parse_property(self.src, pos) {
                    Ok(token) => {
                        self.flush_text(pos);
                        pos = token.span.end;
                        self.text_start = pos;
                        self.tokens.push(Token::Property(token));
                    }
                    Err(end) => {
                        self.text.push_str(&self.src[pos..end]);
                        pos = end;
                    }
                },
                b'}' => {
                    self.text.push('}');
                    pos += if bytes.get(pos + 1) == Some(&b'}') { 2 } else { 1 };
                }
                _ => {
                    let end = self.src[pos..]
                        .find(['{', '}'])
                        .map_or(bytes.len(), |i| pos + i);
                    self.text.push_str(&self.src[pos..end]);
                    pos = end;
                }
            }
        }
        self.flush_text(bytes.len());

        let mut names: Vec<Arc<str>> = Vec::new();
        let mut all_positional = true;
        let mut any = false;
        for token in self.tokens.iter().filter_map(Token::as_property) {
            any = true;
            all_positional &= token.is_positional();
            if !names.iter().any(|n| *n == token.name) {
                names.push(Arc::clone(&token.name));
            }
        }

        ParsedTemplate {
            text: self.src.to_string(),
            tokens: self.tokens,
            names,
            all_positional: any && all_positional,
        }
    }

    fn flush_text(&mut self, end: usize) {
        if self.text_start < end {
            self.tokens.push(Token::Text(TextToken {
                text: std::mem::take(&mut self.text),
                span: self.text_start..end,
            }));
        }
        self.text_start = end;
    }
}

/// Parse the placeholder starting at `start` (which holds `{`)
///
/// On failure returns the end of the region to keep as literal text.
fn parse_property(src: &str, start: usize) -> Result<PropertyToken, usize> {
    let rest = &src[start + 1..];
    let close = match rest.find(['{', '}']) {
        None => return Err(src.len()),
        Some(i) if rest.as_bytes()[i] == b'{' => return Err(start + 1 + i),
        Some(i) => start + 1 + i,
    };
    let end = close + 1;
    let content = &src[start + 1..close];

    let (hint, body) = match content.as_bytes().first() {
        Some(b'@') => (CaptureHint::Structure, &content[1..]),
        Some(b'$') => (CaptureHint::Stringify, &content[1..]),
        _ => (CaptureHint::Default, content),
    };

    let (head, format) = match body.find(':') {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let (name, alignment) = match head.find(',') {
        Some(i) => (&head[..i], Some(parse_alignment(&head[i + 1..]).ok_or(end)?)),
        None => (head, None),
    };

    let index = classify_name(name).ok_or(end)?;
    let format = match format {
        Some("") => return Err(end),
        Some(f) => Some(f.to_string()),
        None => None,
    };

    Ok(PropertyToken {
        name: Arc::from(name),
        index,
        hint,
        format,
        alignment,
        span: start..end,
    })
}

/// `Some(Some(i))` for positional names, `Some(None)` for valid named ones
fn classify_name(name: &str) -> Option<Option<usize>> {
    let mut chars = name.chars();
    let first = chars.next()?;
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return name.parse().ok().map(Some);
    }
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        Some(None)
    } else {
        None
    }
}

fn parse_alignment(spec: &str) -> Option<Alignment> {
    let (left, digits) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let width = digits.parse().ok()?;
    Some(Alignment { width, left })
}
