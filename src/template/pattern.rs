use super::placeholder::{PlaceholderValue, Placeholders};
use std::{iter::Peekable, str::CharIndices};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("unterminated placeholder at offset {0}")]
    Unterminated(usize),
    #[error("conversion at offset {0} has no name, use %(name)s or %% for a literal percent")]
    Unnamed(usize),
    #[error("unsupported conversion `%{0}`")]
    UnsupportedConversion(char),
    #[error("placeholder `{0}` is not available")]
    Missing(String),
    #[error("placeholder `{name}` cannot be rendered with %{conversion}")]
    TypeMismatch { name: String, conversion: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Str,
    Int,
    Float,
}

impl Conversion {
    pub fn as_char(&self) -> char {
        match self {
            Conversion::Str => 's',
            Conversion::Int => 'd',
            Conversion::Float => 'f',
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSpec {
    pub left: bool,
    pub zero: bool,
    pub sign: bool,
    pub space: bool,
    pub width: Option<usize>,
    pub precision: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Placeholder {
        name: String,
        spec: FormatSpec,
        conversion: Conversion,
    },
}

/// A field value containing `%(name)s`-style named conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            if c != '%' {
                text.push(c);
                continue;
            }
            match chars.next() {
                Some((_, '%')) => text.push('%'),
                Some((_, '(')) => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ')')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(PatternError::Unterminated(offset)),
                        }
                    }
                    let spec = parse_spec(&mut chars);
                    let conversion = match chars.next() {
                        Some((_, 's')) => Conversion::Str,
                        Some((_, 'd')) | Some((_, 'i')) => Conversion::Int,
                        Some((_, 'f')) => Conversion::Float,
                        Some((_, other)) => return Err(PatternError::UnsupportedConversion(other)),
                        None => return Err(PatternError::Unterminated(offset)),
                    };
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Placeholder {
                        name,
                        spec,
                        conversion,
                    });
                }
                _ => return Err(PatternError::Unnamed(offset)),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Pattern { segments })
    }

    pub fn has_placeholders(&self) -> bool {
        self.placeholders().next().is_some()
    }

    /// Names referenced by this pattern, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder { name, .. } => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, placeholders: &Placeholders) -> Result<String, PatternError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder {
                    name,
                    spec,
                    conversion,
                } => {
                    let value = placeholders
                        .get(name)
                        .ok_or_else(|| PatternError::Missing(name.clone()))?;
                    out.push_str(&format_value(name, value, spec, *conversion)?);
                }
            }
        }
        Ok(out)
    }
}

fn parse_spec(chars: &mut Peekable<CharIndices<'_>>) -> FormatSpec {
    let mut spec = FormatSpec::default();
    while let Some(&(_, c)) = chars.peek() {
        match c {
            '-' => spec.left = true,
            '0' => spec.zero = true,
            '+' => spec.sign = true,
            ' ' => spec.space = true,
            _ => break,
        }
        chars.next();
    }
    spec.width = take_number(chars);
    if let Some(&(_, '.')) = chars.peek() {
        chars.next();
        spec.precision = Some(take_number(chars).unwrap_or(0));
    }
    spec
}

fn take_number(chars: &mut Peekable<CharIndices<'_>>) -> Option<usize> {
    let mut number: Option<usize> = None;
    while let Some(&(_, c)) = chars.peek() {
        let Some(digit) = c.to_digit(10) else {
            break;
        };
        number = Some(
            number
                .unwrap_or(0)
                .saturating_mul(10)
                .saturating_add(digit as usize),
        );
        chars.next();
    }
    number
}

fn format_value(
    name: &str,
    value: &PlaceholderValue,
    spec: &FormatSpec,
    conversion: Conversion,
) -> Result<String, PatternError> {
    let mismatch = || PatternError::TypeMismatch {
        name: name.to_string(),
        conversion: conversion.as_char(),
    };

    let body = match conversion {
        Conversion::Str => {
            let text = match value {
                PlaceholderValue::Null => String::new(),
                PlaceholderValue::Bool(b) => b.to_string(),
                PlaceholderValue::Integer(i) => i.to_string(),
                // keeps the decimal point on whole numbers: 65.0, not 65
                PlaceholderValue::Float(f) => format!("{:?}", f),
                PlaceholderValue::Text(t) => t.clone(),
            };
            let text = match spec.precision {
                Some(precision) => text.chars().take(precision).collect(),
                None => text,
            };
            return Ok(pad(text, spec, false));
        }
        Conversion::Int => {
            let number = match value {
                PlaceholderValue::Bool(b) => *b as i64,
                PlaceholderValue::Integer(i) => *i,
                PlaceholderValue::Float(f) if f.is_finite() => f.trunc() as i64,
                _ => return Err(mismatch()),
            };
            number.to_string()
        }
        Conversion::Float => {
            let number = match value {
                PlaceholderValue::Bool(b) => *b as i64 as f64,
                PlaceholderValue::Integer(i) => *i as f64,
                PlaceholderValue::Float(f) => *f,
                _ => return Err(mismatch()),
            };
            format!("{:.*}", spec.precision.unwrap_or(6), number)
        }
    };

    let body = if body.starts_with('-') {
        body
    } else if spec.sign {
        format!("+{}", body)
    } else if spec.space {
        format!(" {}", body)
    } else {
        body
    };
    Ok(pad(body, spec, true))
}

fn pad(body: String, spec: &FormatSpec, numeric: bool) -> String {
    let len = body.chars().count();
    let width = match spec.width {
        Some(width) if width > len => width,
        _ => return body,
    };
    let fill = width - len;
    if spec.left {
        format!("{}{}", body, " ".repeat(fill))
    } else if spec.zero && numeric {
        let split = if body.starts_with(['-', '+', ' ']) { 1 } else { 0 };
        let (sign, digits) = body.split_at(split);
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), body)
    }
}
