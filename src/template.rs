//! `{name}` placeholder templates for agent prompts.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::TemplateError;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("template token pattern is valid")
});

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed prompt template.
///
/// `{name}` is replaced by the value of `name`; `{{` and `}}` produce
/// literal braces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut cursor = 0;

        for captures in TOKEN.captures_iter(&source) {
            let Some(token) = captures.get(0) else {
                continue;
            };
            push_literal(&source, cursor, token.start(), &mut literal)?;
            cursor = token.end();

            match token.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                _ => {
                    let name = captures.get(1).map_or("", |name| name.as_str()).trim();
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder {
                            position: token.start(),
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name.to_string()));
                }
            }
        }

        push_literal(&source, cursor, source.len(), &mut literal)?;
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance (repeats included).
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes `data` into the template. Strings are inserted verbatim,
    /// any other JSON value as compact JSON.
    pub fn render(&self, data: &Map<String, Value>) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Variable(name) => match data.get(name) {
                    Some(Value::String(text)) => rendered.push_str(text),
                    Some(value) => rendered.push_str(&value.to_string()),
                    None => return Err(TemplateError::MissingVariable(name.clone())),
                },
            }
        }
        Ok(rendered)
    }
}

fn push_literal(
    source: &str,
    start: usize,
    end: usize,
    literal: &mut String,
) -> Result<(), TemplateError> {
    let text = &source[start..end];
    if let Some(offset) = text.find(['{', '}']) {
        let brace = text[offset..].chars().next().unwrap_or('{');
        return Err(TemplateError::Unbalanced {
            brace,
            position: start + offset,
        });
    }
    literal.push_str(text);
    Ok(())
}
