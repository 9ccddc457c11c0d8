// EN: src/core/reference.rs

//! Parsing of the placeholder grammar shared by alias patterns and command
//! templates:
//!
//! - `${name}` is a single token of user input.
//! - `$${source.key}` and `$${source[N].key}` read a record of a declared source.
//! - `$${env.VAR}` reads the process environment.
//! - `$${locals.key}` reads the persisted locals store.

use crate::constants::{RESERVED_ENV, RESERVED_LOCALS};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fmt;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(
        r"\$\$\{([A-Za-z_][\w-]*)(?:\[(-?\d+)\])?\.(\w+)\}|\$\{([A-Za-z_]\w*)\}"
    )
    .expect("placeholder regex is valid");
}

/// A reference to a record field of a declared source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppRef {
    pub source: String,
    /// Explicit `[N]` index, if written. `None` means "index 0 unless a
    /// list-mode binding says otherwise".
    pub index: Option<i64>,
    pub key: String,
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "$${{{}[{}].{}}}", self.source, index, self.key),
            None => write!(f, "$${{{}.{}}}", self.source, self.key),
        }
    }
}

/// A parsed placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    UserInput(String),
    App(AppRef),
    Env(String),
    Locals(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInput(name) => write!(f, "${{{name}}}"),
            Self::App(app_ref) => app_ref.fmt(f),
            Self::Env(var) => write!(f, "$${{{RESERVED_ENV}.{var}}}"),
            Self::Locals(key) => write!(f, "$${{{RESERVED_LOCALS}.{key}}}"),
        }
    }
}

/// A piece of a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Ref(Reference),
}

/// A command template split into literal text and references, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut last_end = 0;

        for captures in PLACEHOLDER_RE.captures_iter(raw) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let Some(reference) = reference_from_captures(&captures) else {
                continue;
            };
            if whole.start() > last_end {
                segments.push(Segment::Literal(
                    raw.get(last_end..whole.start()).unwrap_or_default().to_string(),
                ));
            }
            segments.push(Segment::Ref(reference));
            last_end = whole.end();
        }
        if last_end < raw.len() {
            segments.push(Segment::Literal(raw.get(last_end..).unwrap_or_default().to_string()));
        }

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// All references of the template, in template order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Ref(reference) => Some(reference),
            Segment::Literal(_) => None,
        })
    }

    /// Application references only.
    pub fn app_refs(&self) -> impl Iterator<Item = &AppRef> {
        self.references().filter_map(|reference| match reference {
            Reference::App(app_ref) => Some(app_ref),
            _ => None,
        })
    }

    /// Joins several templates with a single space, the way a matched chain
    /// of command fragments is assembled before rendering.
    pub fn join<'a>(templates: impl IntoIterator<Item = &'a Self>) -> Self {
        let raw = templates
            .into_iter()
            .map(|template| template.raw.trim())
            .filter(|raw| !raw.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self::parse(&raw)
    }
}

/// One whitespace-separated token of an alias pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Literal(String),
    UserInput(String),
    /// List mode: the user types one of the source's `key` values.
    AppRef(AppRef),
}

impl PatternToken {
    fn parse(token: &str) -> Self {
        if let Some(captures) = PLACEHOLDER_RE.captures(token)
            && captures.get(0).is_some_and(|m| m.as_str() == token)
        {
            match reference_from_captures(&captures) {
                Some(Reference::UserInput(name)) => return Self::UserInput(name),
                Some(Reference::App(app_ref)) => return Self::AppRef(app_ref),
                _ => {}
            }
        }
        Self::Literal(token.to_string())
    }

    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.write_str(text),
            Self::UserInput(name) => write!(f, "${{{name}}}"),
            Self::AppRef(app_ref) => app_ref.fmt(f),
        }
    }
}

/// An alias pattern, e.g. `ssh $${servers.name}` or `-o ${file}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pattern {
    raw: String,
    tokens: Vec<PatternToken>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
            tokens: raw.split_whitespace().map(PatternToken::parse).collect(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> &[PatternToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The leading token as written, used as the short form of a flag.
    pub fn head(&self) -> &str {
        self.raw.split_whitespace().next().unwrap_or(&self.raw)
    }

    /// The ordered placeholder structure of the pattern. Two aliases of the
    /// same arg must produce identical signatures.
    pub fn placeholder_signature(&self) -> Vec<String> {
        self.tokens
            .iter()
            .filter(|token| token.is_placeholder())
            .map(ToString::to_string)
            .collect()
    }
}

fn reference_from_captures(captures: &Captures<'_>) -> Option<Reference> {
    if let Some(name) = captures.get(4) {
        return Some(Reference::UserInput(name.as_str().to_string()));
    }

    let source = captures.get(1)?.as_str();
    let key = captures.get(3)?.as_str().to_string();
    match source {
        RESERVED_ENV => Some(Reference::Env(key)),
        RESERVED_LOCALS => Some(Reference::Locals(key)),
        _ => {
            let index = match captures.get(2) {
                Some(index) => Some(index.as_str().parse::<i64>().ok()?),
                None => None,
            };
            Some(Reference::App(AppRef {
                source: source.to_string(),
                index,
                key,
            }))
        }
    }
}
