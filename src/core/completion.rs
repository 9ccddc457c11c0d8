// EN: src/core/completion.rs

//! Autocomplete suggestions for a partially typed input line.

use crate::{
    core::{
        matcher::{PatternMatch, is_help_flag, match_pattern, tokenize, walk},
        reference::{Pattern, PatternToken},
        resolver::Resolver,
    },
    error::Result,
};
use std::collections::HashSet;
use std::fmt;

/// What a candidate would insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A literal token of a sub alias.
    Command,
    /// A literal token of an arg alias.
    Argument,
    /// A record value of a list-mode source.
    Value,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Argument => "argument",
            Self::Value => "value",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub description: String,
    pub kind: CandidateKind,
}

/// Suggests completions for the last token of `partial_input`.
///
/// Everything before that token is matched like a normal invocation; the
/// candidates come from the node the match stopped at. Subs are listed
/// before args, each in declaration order, without duplicates.
pub fn suggest(partial_input: &str, resolver: &mut Resolver<'_>) -> Result<Vec<Candidate>> {
    let (mut tokens, quote_open) = match tokenize(partial_input) {
        Ok(tokens) => (tokens, false),
        Err(_) => match close_open_quote(partial_input) {
            Some(tokens) => (tokens, true),
            None => return Ok(Vec::new()),
        },
    };
    let completing_new_token = !quote_open
        && (partial_input.is_empty() || partial_input.ends_with(char::is_whitespace));
    let prefix = if completing_new_token {
        String::new()
    } else {
        tokens.pop().unwrap_or_default()
    };

    let config = resolver.config();
    let position = walk(tokens, resolver)?;
    let node = config.tree.node(position.node);
    log::trace!(
        "Completing '{}' at {} with {} unmatched token(s)",
        prefix,
        node.location,
        position.rest.len()
    );

    let mut candidates = Vec::new();
    for &sub_id in &node.subs {
        let sub = config.tree.node(sub_id);
        let description = sub.helper.clone().unwrap_or_else(|| sub.name.clone());
        candidates.extend(candidates_for(
            &sub.alias,
            &position.rest,
            &description,
            CandidateKind::Command,
            resolver,
        )?);
    }
    for arg in &node.args {
        let description = arg.helper.clone().unwrap_or_default();
        for alias in &arg.aliases {
            candidates.extend(candidates_for(
                alias,
                &position.rest,
                &description,
                CandidateKind::Argument,
                resolver,
            )?);
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|candidate| {
        candidate.text.starts_with(&prefix)
            && !is_help_flag(&candidate.text)
            && seen.insert(candidate.text.clone())
    });
    Ok(candidates)
}

/// Tokenizes a line whose last token is still inside an open quote, as if
/// the quote had been closed.
fn close_open_quote(partial_input: &str) -> Option<Vec<String>> {
    ['"', '\'']
        .iter()
        .find_map(|quote| shlex::split(&format!("{partial_input}{quote}")))
}

/// Candidates for the next token of `pattern`, given the tokens already
/// typed for it.
fn candidates_for(
    pattern: &Pattern,
    typed: &[String],
    description: &str,
    kind: CandidateKind,
    resolver: &mut Resolver<'_>,
) -> Result<Vec<Candidate>> {
    let PatternMatch::Exhausted { next } = match_pattern(pattern, typed, resolver)? else {
        return Ok(Vec::new());
    };

    let candidates = match pattern.tokens().get(next) {
        Some(PatternToken::Literal(text)) => vec![Candidate {
            text: text.clone(),
            description: description.to_string(),
            kind,
        }],
        Some(PatternToken::AppRef(app_ref)) => resolver
            .records(&app_ref.source)?
            .iter()
            .filter_map(|record| record.get(&app_ref.key))
            .map(|value| Candidate {
                text: value.clone(),
                description: app_ref.source.clone(),
                kind: CandidateKind::Value,
            })
            .collect(),
        Some(PatternToken::UserInput(_)) | None => Vec::new(),
    };
    Ok(candidates)
}
