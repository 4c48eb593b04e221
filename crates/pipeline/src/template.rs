//! Blob path templates such as
//! `archive/{name}-{datetime:yyyyMMdd-HHmmss}-output.json`.
//!
//! Templates are parsed once at startup so a bad token fails the process
//! rather than every message. Rendering only substitutes values; it never
//! fails.

use std::fmt::Write as _;

use crate::StartupConfigError;

/// The blob path template used when none is configured.
pub const DEFAULT_BLOB_PATH_TEMPLATE: &str = "archive/{name}-{datetime:yyyyMMdd-HHmmss}-output.json";

/// Values a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateToken {
    /// `{name}`: the event's name token.
    Name,
    /// `{id}`: the event's `id` field.
    Id,
    /// `{message_id}`: the broker message id.
    MessageId,
    /// `{invocation_id}`: the invocation id.
    InvocationId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(TemplateToken),
    /// `{datetime}` / `{datetime:FMT}`, stored as a chrono strftime pattern.
    DateTime(String),
}

/// Values substituted into a template for one invocation.
#[derive(Debug, Clone)]
pub struct TemplateValues<'a> {
    /// Value of `{name}`.
    pub name: &'a str,
    /// Value of `{id}`.
    pub id: &'a str,
    /// Value of `{message_id}`.
    pub message_id: &'a str,
    /// Value of `{invocation_id}`.
    pub invocation_id: &'a str,
    /// Invocation timestamp used for `{datetime}`.
    pub timestamp: crate::Timestamp,
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`StartupConfigError::Invalid`] for unbalanced braces, unknown
    /// tokens, unsupported date specifiers, or an empty template.
    pub fn parse(source: &str) -> Result<Self, StartupConfigError> {
        let invalid = |reason: String| StartupConfigError::Invalid {
            name: "archive.blob.path_template",
            reason,
        };

        if source.trim().is_empty() {
            return Err(invalid("template is empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut token = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        token.push(c);
                    }
                    if !closed {
                        return Err(invalid(format!("unclosed '{{' in '{source}'")));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_token(&token).map_err(invalid)?);
                }
                '}' => return Err(invalid(format!("unmatched '}}' in '{source}'"))),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns the template as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitutes `values` into the template.
    pub fn render(&self, values: &TemplateValues<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(TemplateToken::Name) => out.push_str(values.name),
                Segment::Token(TemplateToken::Id) => out.push_str(values.id),
                Segment::Token(TemplateToken::MessageId) => out.push_str(values.message_id),
                Segment::Token(TemplateToken::InvocationId) => out.push_str(values.invocation_id),
                Segment::DateTime(pattern) => {
                    let _ = write!(out, "{}", values.timestamp.format(pattern));
                }
            }
        }
        out
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_BLOB_PATH_TEMPLATE.to_string(),
            segments: vec![
                Segment::Literal("archive/".to_string()),
                Segment::Token(TemplateToken::Name),
                Segment::Literal("-".to_string()),
                Segment::DateTime("%Y%m%d-%H%M%S".to_string()),
                Segment::Literal("-output.json".to_string()),
            ],
        }
    }
}

fn parse_token(token: &str) -> Result<Segment, String> {
    let (name, format) = match token.split_once(':') {
        Some((name, format)) => (name.trim(), Some(format)),
        None => (token.trim(), None),
    };
    match (name.to_ascii_lowercase().as_str(), format) {
        ("datetime", None) => Ok(Segment::DateTime("%Y-%m-%dT%H-%M-%SZ".to_string())),
        ("datetime", Some(format)) => Ok(Segment::DateTime(translate_date_format(format)?)),
        ("name", None) => Ok(Segment::Token(TemplateToken::Name)),
        ("id", None) => Ok(Segment::Token(TemplateToken::Id)),
        ("message_id", None) => Ok(Segment::Token(TemplateToken::MessageId)),
        ("invocation_id", None) => Ok(Segment::Token(TemplateToken::InvocationId)),
        (_, Some(_)) => Err(format!("token '{{{token}}}' does not take a format")),
        _ => Err(format!("unknown token '{{{token}}}'")),
    }
}

/// Translates .NET-style date specifiers (`yyyyMMdd-HHmmss`) into a chrono
/// strftime pattern. Characters outside letters are copied through; letters
/// other than the supported specifiers are rejected.
fn translate_date_format(format: &str) -> Result<String, String> {
    const SPECIFIERS: [(&str, &str); 8] = [
        ("yyyy", "%Y"),
        ("fff", "%3f"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("yy", "%y"),
    ];

    if format.is_empty() {
        return Err("empty datetime format".to_string());
    }

    let mut out = String::new();
    let mut rest = format;
    'outer: while !rest.is_empty() {
        for (spec, strftime) in SPECIFIERS {
            if let Some(tail) = rest.strip_prefix(spec) {
                out.push_str(strftime);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        let Some(c) = chars.next() else { break };
        if c.is_ascii_alphabetic() {
            return Err(format!("unsupported datetime specifier near '{rest}'"));
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = chars.as_str();
    }
    Ok(out)
}
