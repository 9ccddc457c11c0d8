// EN: src/core/matcher.rs

//! # Command Matcher
//!
//! Walks the command tree with the tokens of one input line.
//!
//! At each node the matcher tries, in order:
//! 1. the aliases of the node's subs (descending on a full match),
//! 2. the aliases of the node's args (staying on the node),
//! 3. `-h`/`--help`.
//!
//! When nothing matches, a strict node rejects the remaining tokens and a
//! non-strict node appends them to the rendered command.

use crate::{
    constants::HELP_FLAGS,
    core::{
        reference::{Pattern, PatternToken, Template},
        resolver::Resolver,
    },
    error::{AliasError, Result},
    models::{CommandTree, NodeId},
};
use std::collections::{BTreeSet, HashMap};

/// A fully rendered command ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// The raw input line, as recorded in history.
    pub input: String,
    pub command_line: String,
    /// Matched nodes, top-level command first.
    pub chain: Vec<NodeId>,
    /// Seconds; zero means no timeout.
    pub timeout: u64,
    pub set_locals: bool,
}

/// What a complete input line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Resolved(ResolvedCommand),
    /// Help was requested for the given chain. An empty chain asks for the
    /// global listing.
    Help(Vec<NodeId>),
}

/// States of the matching machine.
#[derive(Debug)]
enum State {
    AtNode(NodeId),
    /// Matching is over; the node's remaining tokens are appended verbatim.
    MatchedArgs(NodeId, Vec<String>),
    Help(Vec<NodeId>),
    Resolved(ResolvedCommand),
    Failed(AliasError),
}

/// Result of matching one alias pattern against the head of the remaining
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternMatch {
    Full {
        consumed: usize,
        vars: Vec<(String, String)>,
        bindings: Vec<(String, usize)>,
    },
    /// The tokens ran out before the pattern did; `next` is the index of the
    /// first pattern token left unmatched.
    Exhausted { next: usize },
    /// A help flag was typed after a matched prefix of the pattern.
    Help,
    NoMatch,
}

/// Whether `token` asks for help.
pub fn is_help_flag(token: &str) -> bool {
    HELP_FLAGS.contains(&token)
}

/// Matches `pattern` against the start of `tokens`.
///
/// Literal tokens compare exactly, `${name}` captures any token, and a
/// list-mode `$${source.key}` accepts one of the `key` values of the
/// source's records and reports the index of that record.
pub fn match_pattern(
    pattern: &Pattern,
    tokens: &[String],
    resolver: &mut Resolver<'_>,
) -> Result<PatternMatch> {
    if pattern.is_empty() {
        return Ok(PatternMatch::NoMatch);
    }

    let mut vars = Vec::new();
    let mut bindings = Vec::new();

    for (position, expected) in pattern.tokens().iter().enumerate() {
        let Some(actual) = tokens.get(position) else {
            return Ok(PatternMatch::Exhausted { next: position });
        };
        if position > 0 && is_help_flag(actual) {
            return Ok(PatternMatch::Help);
        }

        match expected {
            PatternToken::Literal(literal) => {
                if literal != actual {
                    return Ok(PatternMatch::NoMatch);
                }
            }
            PatternToken::UserInput(name) => vars.push((name.clone(), actual.clone())),
            PatternToken::AppRef(app_ref) => {
                let records = resolver.records(&app_ref.source)?;
                let found = match app_ref.index {
                    Some(index) => usize::try_from(index)
                        .ok()
                        .filter(|i| {
                            records
                                .get(*i)
                                .and_then(|record| record.get(&app_ref.key))
                                .is_some_and(|value| value == actual)
                        }),
                    None => records
                        .iter()
                        .position(|record| record.get(&app_ref.key) == Some(actual)),
                };
                match found {
                    Some(index) => bindings.push((app_ref.source.clone(), index)),
                    None => return Ok(PatternMatch::NoMatch),
                }
            }
        }
    }

    Ok(PatternMatch::Full {
        consumed: pattern.len(),
        vars,
        bindings,
    })
}

/// Matches `input` against the command tree and renders the result.
pub fn match_input(input: &str, resolver: &mut Resolver<'_>) -> Result<MatchOutcome> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AliasError::UnknownCommand {
            input: input.to_string(),
        });
    }
    Matcher::new(resolver, input, tokens).run()
}

/// Quote-aware whitespace split.
pub fn tokenize(input: &str) -> Result<Vec<String>> {
    shlex::split(input).ok_or_else(|| AliasError::Tokenize(input.to_string()))
}

/// Where a walk over complete tokens came to rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    /// Tokens the node could not consume. Empty when every token matched.
    pub rest: Vec<String>,
}

/// Walks `tokens` as far as they match without rendering anything. Used by
/// autocompletion, which then inspects the node the walk stopped at.
pub fn walk(tokens: Vec<String>, resolver: &mut Resolver<'_>) -> Result<Position> {
    let mut matcher = Matcher::new(resolver, "", tokens);
    let mut node = CommandTree::ROOT;
    loop {
        if matcher.remaining().is_empty() {
            break;
        }
        match matcher.step(node)? {
            State::AtNode(next) => node = next,
            _ => break,
        }
    }
    Ok(Position {
        node,
        rest: matcher.remaining().to_vec(),
    })
}

struct Matcher<'r, 'a> {
    resolver: &'r mut Resolver<'a>,
    input: String,
    tokens: Vec<String>,
    pos: usize,
    chain: Vec<NodeId>,
    fragments: Vec<Template>,
    vars: HashMap<String, String>,
}

impl<'r, 'a> Matcher<'r, 'a> {
    fn new(resolver: &'r mut Resolver<'a>, input: &str, tokens: Vec<String>) -> Self {
        Self {
            resolver,
            input: input.trim().to_string(),
            tokens,
            pos: 0,
            chain: Vec::new(),
            fragments: Vec::new(),
            vars: HashMap::new(),
        }
    }

    fn remaining(&self) -> &[String] {
        self.tokens.get(self.pos..).unwrap_or_default()
    }

    fn run(mut self) -> Result<MatchOutcome> {
        let mut state = State::AtNode(CommandTree::ROOT);
        loop {
            state = match state {
                State::AtNode(node) if self.remaining().is_empty() => {
                    State::MatchedArgs(node, Vec::new())
                }
                State::AtNode(node) => self.step(node)?,
                State::MatchedArgs(node, extras) => match self.render(node, &extras) {
                    Ok(resolved) => State::Resolved(resolved),
                    Err(e) => State::Failed(e),
                },
                State::Help(chain) => return Ok(MatchOutcome::Help(chain)),
                State::Resolved(resolved) => return Ok(MatchOutcome::Resolved(resolved)),
                State::Failed(e) => return Err(e),
            };
        }
    }

    /// Consumes one alias (sub or arg) at `node`, or decides how the walk
    /// ends there.
    fn step(&mut self, node_id: NodeId) -> Result<State> {
        let config = self.resolver.config();
        let node = config.tree.node(node_id);
        let rest = self.remaining().to_vec();

        for &sub_id in &node.subs {
            let sub = config.tree.node(sub_id);
            match match_pattern(&sub.alias, &rest, self.resolver)? {
                PatternMatch::Full {
                    consumed,
                    vars,
                    bindings,
                } => {
                    log::trace!("Matched sub '{}' at {}", sub.name, sub.location);
                    self.accept(consumed, vars, bindings, &sub.template);
                    self.chain.push(sub_id);
                    return Ok(State::AtNode(sub_id));
                }
                PatternMatch::Help => {
                    let mut chain = self.chain.clone();
                    chain.push(sub_id);
                    return Ok(State::Help(chain));
                }
                PatternMatch::Exhausted { .. } | PatternMatch::NoMatch => {}
            }
        }

        for arg in &node.args {
            for alias in &arg.aliases {
                match match_pattern(alias, &rest, self.resolver)? {
                    PatternMatch::Full {
                        consumed,
                        vars,
                        bindings,
                    } => {
                        log::trace!("Matched arg '{}' of {}", alias.raw(), node.location);
                        self.accept(consumed, vars, bindings, &arg.template);
                        return Ok(State::AtNode(node_id));
                    }
                    PatternMatch::Help => return Ok(State::Help(self.chain.clone())),
                    PatternMatch::Exhausted { .. } | PatternMatch::NoMatch => {}
                }
            }
        }

        if rest.first().is_some_and(|token| is_help_flag(token)) {
            return Ok(State::Help(self.chain.clone()));
        }

        if node_id == CommandTree::ROOT {
            return Ok(State::Failed(AliasError::UnknownCommand {
                input: self.input.clone(),
            }));
        }
        if node.strict {
            return Ok(State::Failed(AliasError::UnknownArguments { tokens: rest }));
        }
        Ok(State::MatchedArgs(node_id, rest))
    }

    fn accept(
        &mut self,
        consumed: usize,
        vars: Vec<(String, String)>,
        bindings: Vec<(String, usize)>,
        template: &Template,
    ) {
        self.pos += consumed;
        self.vars.extend(vars);
        for (source, index) in bindings {
            self.resolver.bind(&source, index);
        }
        self.fragments.push(template.clone());
    }

    fn render(&mut self, node_id: NodeId, extras: &[String]) -> Result<ResolvedCommand> {
        let config = self.resolver.config();
        let template = Template::join(&self.fragments);

        let sources: BTreeSet<&str> = template
            .app_refs()
            .map(|app_ref| app_ref.source.as_str())
            .collect();
        self.resolver.prefetch(sources)?;

        let mut command_line = self.resolver.render(&template, &self.vars)?;
        for extra in extras {
            let quoted = shlex::try_quote(extra)
                .map(|quoted| quoted.into_owned())
                .unwrap_or_else(|_| extra.clone());
            if !command_line.is_empty() {
                command_line.push(' ');
            }
            command_line.push_str(&quoted);
        }

        // The top-level command's timeout bounds the whole invocation.
        let root = self.chain.first().copied().unwrap_or(node_id);
        let timeout = config.tree.node(root).timeout;
        let set_locals = self
            .chain
            .iter()
            .any(|id| config.tree.node(*id).set_locals);
        log::debug!("Rendered '{}' into: {}", self.input, command_line);

        Ok(ResolvedCommand {
            input: self.input.clone(),
            command_line,
            chain: self.chain.clone(),
            timeout,
            set_locals,
        })
    }
}
