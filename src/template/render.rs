//! Rendering of parsed templates against captured properties

use super::parser::ParsedTemplate;
use super::token::{Alignment, Token};
use crate::core::property::{PropertyValue, Scalar};
use std::fmt::Write;

impl ParsedTemplate {
    /// Render the template, looking up each placeholder by name
    ///
    /// Placeholders without a value are rendered as their original text.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::template::ParsedTemplate;
    /// use rust_structured_logger::PropertyValue;
    ///
    /// let parsed = ParsedTemplate::parse("{Count:000} items for {User} in {Region}");
    /// let count = PropertyValue::from(7i64);
    /// let user = PropertyValue::str("alice");
    /// let text = parsed.render(|name| match name {
    ///     "Count" => Some(&count),
    ///     "User" => Some(&user),
    ///     _ => None,
    /// });
    /// assert_eq!(text, "007 items for alice in {Region}");
    /// ```
    pub fn render<'v, F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<&'v PropertyValue>,
    {
        let mut out = String::with_capacity(self.text().len() + 16);
        for token in self.tokens() {
            match token {
                Token::Text(t) => out.push_str(&t.text),
                Token::Property(p) => match lookup(&p.name) {
                    Some(value) => {
                        let start = out.len();
                        format_value(value, p.format.as_deref(), &mut out);
                        if let Some(alignment) = p.alignment {
                            apply_alignment(&mut out, start, alignment);
                        }
                    }
                    None => out.push_str(self.raw(p)),
                },
            }
        }
        out
    }
}

/// Append `value` to `out` using a format specifier
///
/// Numbers understand `000` (zero padding), `x`/`X`, `D<n>`, `F<n>`, `E<n>`,
/// `N<n>` and `P<n>`. `q` quotes strings, `l` writes them literally and `j`
/// writes any value as JSON. Timestamps pass other specifiers to strftime.
pub fn format_value(value: &PropertyValue, format: Option<&str>, out: &mut String) {
    let format = match format {
        None | Some("l") => {
            let _ = write!(out, "{}", value);
            return;
        }
        Some("j") => {
            out.push_str(&value.to_json().to_string());
            return;
        }
        Some(f) => f,
    };

    match value {
        PropertyValue::Scalar(Scalar::Str(s)) if format == "q" => {
            let _ = write!(out, "{:?}", s);
        }
        PropertyValue::Scalar(Scalar::Timestamp(t)) => {
            let start = out.len();
            if write!(out, "{}", t.format(format)).is_err() {
                out.truncate(start);
                let _ = write!(out, "{}", value);
            }
        }
        PropertyValue::Scalar(s) if s.is_numeric() => {
            if !format_number(s, format, out) {
                let _ = write!(out, "{}", value);
            }
        }
        _ => {
            let _ = write!(out, "{}", value);
        }
    }
}

fn format_number(value: &Scalar, format: &str, out: &mut String) -> bool {
    if format.bytes().all(|b| b == b'0') {
        let width = format.len();
        let _ = match value {
            Scalar::I64(v) => write!(out, "{:0width$}", v),
            Scalar::U64(v) => write!(out, "{:0width$}", v),
            Scalar::F64(v) => write!(out, "{:0width$}", v),
            _ => return false,
        };
        return true;
    }

    let (kind, digits) = format.split_at(1);
    let precision = if digits.is_empty() {
        None
    } else {
        match digits.parse::<usize>() {
            Ok(p) => Some(p),
            Err(_) => return false,
        }
    };

    let _ = match (kind, value) {
        ("x", Scalar::I64(v)) => write!(out, "{:x}", v),
        ("x", Scalar::U64(v)) => write!(out, "{:x}", v),
        ("X", Scalar::I64(v)) => write!(out, "{:X}", v),
        ("X", Scalar::U64(v)) => write!(out, "{:X}", v),
        ("D" | "d", Scalar::I64(v)) => write!(out, "{:0w$}", v, w = precision.unwrap_or(0)),
        ("D" | "d", Scalar::U64(v)) => write!(out, "{:0w$}", v, w = precision.unwrap_or(0)),
        ("F" | "f", _) => write!(out, "{:.p$}", as_f64(value), p = precision.unwrap_or(2)),
        ("E", _) => write!(out, "{:.p$E}", as_f64(value), p = precision.unwrap_or(6)),
        ("e", _) => write!(out, "{:.p$e}", as_f64(value), p = precision.unwrap_or(6)),
        ("P" | "p", _) => write!(
            out,
            "{:.p$}%",
            as_f64(value) * 100.0,
            p = precision.unwrap_or(2)
        ),
        ("N" | "n", _) => {
            let default = if matches!(value, Scalar::F64(_)) { 2 } else { 0 };
            out.push_str(&group_thousands(as_f64(value), precision.unwrap_or(default)));
            Ok(())
        }
        _ => return false,
    };
    true
}

fn as_f64(value: &Scalar) -> f64 {
    value.as_f64().unwrap_or(0.0)
}

fn group_thousands(value: f64, precision: usize) -> String {
    let formatted = format!("{:.p$}", value.abs(), p = precision);
    let (int_part, frac_part) = match formatted.find('.') {
        Some(i) => formatted.split_at(i),
        None => (formatted.as_str(), ""),
    };

    let mut grouped = String::with_capacity(formatted.len() + int_part.len() / 3 + 1);
    if value.is_sign_negative() && value != 0.0 {
        grouped.push('-');
    }
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(frac_part);
    grouped
}

fn apply_alignment(out: &mut String, start: usize, alignment: Alignment) {
    let len = out[start..].chars().count();
    if len >= alignment.width {
        return;
    }
    let pad = alignment.width - len;
    if alignment.left {
        out.extend(std::iter::repeat(' ').take(pad));
    } else {
        out.insert_str(start, &" ".repeat(pad));
    }
}
