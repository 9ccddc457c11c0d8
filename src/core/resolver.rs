// EN: src/core/resolver.rs

//! # Dependency Resolver
//!
//! Resolves references to their values for one invocation. Dynamic sources
//! are fetched lazily: a source whose command references other sources
//! resolves those first, depth-first, and each source runs at most once per
//! invocation thanks to an explicit memo table.
//!
//! The static side of the graph (topological order, cycle listing) is
//! exposed as free functions so the validator can use it without a store.

use crate::{
    CancellationToken,
    core::{
        cache::{CacheStore, unix_now},
        config_loader::{EnvLookup, process_env},
        reference::{AppRef, Reference, Segment, Template},
        source_executor::SourceRunner,
    },
    error::{AliasError, Result},
    models::{Config, DynamicSource, Record, SourceKind},
};
use crate::constants::RESERVED_LOCALS;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// DFS marks. A source absent from the mark table is unvisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Per-invocation resolution context.
pub struct Resolver<'a> {
    config: &'a Config,
    store: &'a mut CacheStore,
    runner: &'a dyn SourceRunner,
    cancellation_token: CancellationToken,
    env: EnvLookup<'a>,
    now: u64,
    memo: HashMap<String, Arc<Vec<Record>>>,
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    bindings: HashMap<String, usize>,
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("now", &self.now)
            .field("memoized", &self.memo.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a mut CacheStore,
        runner: &'a dyn SourceRunner,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            cancellation_token,
            env: &process_env,
            now: unix_now(),
            memo: HashMap::new(),
            marks: HashMap::new(),
            stack: Vec::new(),
            bindings: HashMap::new(),
        }
    }

    /// Replaces the environment lookup used for `$${env.VAR}`.
    pub fn with_env(mut self, env: EnvLookup<'a>) -> Self {
        self.env = env;
        self
    }

    /// Pins the clock used for cache validity and new entries.
    pub fn at(mut self, now: u64) -> Self {
        self.now = now;
        self
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn store(&self) -> &CacheStore {
        self.store
    }

    // --- List-mode bindings ---

    /// Binds `source` to a record index: unindexed references to it use
    /// `index` instead of 0 for the rest of the invocation.
    pub fn bind(&mut self, source: &str, index: usize) {
        log::trace!("Binding source '{}' to record {}", source, index);
        self.bindings.insert(source.to_string(), index);
    }

    pub fn binding(&self, source: &str) -> Option<usize> {
        self.bindings.get(source).copied()
    }

    // --- Resolution ---

    /// The records of `name`, fetching (and caching) them if needed.
    pub fn records(&mut self, name: &str) -> Result<Arc<Vec<Record>>> {
        if let Some(records) = self.memo.get(name) {
            return Ok(Arc::clone(records));
        }

        let config = self.config;
        let source = config
            .source(name)
            .ok_or_else(|| AliasError::UndefinedSource(name.to_string()))?;

        let records = match &source.kind {
            SourceKind::Static(records) => Arc::new(records.clone()),
            SourceKind::Dynamic(dynamic) => self.fetch_dynamic(name, dynamic)?,
        };
        self.memo.insert(name.to_string(), Arc::clone(&records));
        Ok(records)
    }

    fn fetch_dynamic(&mut self, name: &str, dynamic: &DynamicSource) -> Result<Arc<Vec<Record>>> {
        if self.marks.get(name) == Some(&Mark::InProgress) {
            return Err(AliasError::CyclicDependency {
                path: self.cycle_through(name),
            });
        }

        if let Some(cached) = self.store.fresh(name, dynamic.cache_ttl, self.now) {
            log::debug!("Cache hit for source '{}'", name);
            return Ok(Arc::new(cached.to_vec()));
        }

        self.marks.insert(name.to_string(), Mark::InProgress);
        self.stack.push(name.to_string());
        let rendered = self.render_direct(&dynamic.command);
        self.stack.pop();
        let command_line = match rendered {
            Ok(command_line) => command_line,
            Err(e) => {
                self.marks.remove(name);
                return Err(e);
            }
        };
        self.marks.insert(name.to_string(), Mark::Done);

        let records = self
            .runner
            .run(name, dynamic, &command_line, &self.cancellation_token)?;
        self.store.put(name, records.clone(), self.now);
        Ok(Arc::new(records))
    }

    /// The DFS stack from the first occurrence of `name`, closed by `name`.
    fn cycle_through(&self, name: &str) -> Vec<String> {
        let start = self
            .stack
            .iter()
            .position(|entry| entry == name)
            .unwrap_or(0);
        let mut path: Vec<String> = self.stack.iter().skip(start).cloned().collect();
        path.push(name.to_string());
        path
    }

    /// Resolves one application reference. An explicit index wins over a
    /// list-mode binding, which wins over the default of 0.
    pub fn value(&mut self, app_ref: &AppRef) -> Result<String> {
        let records = self.records(&app_ref.source)?;
        let index = match app_ref.index {
            Some(index) => index,
            None => self
                .binding(&app_ref.source)
                .and_then(|bound| i64::try_from(bound).ok())
                .unwrap_or(0),
        };

        let record = usize::try_from(index)
            .ok()
            .and_then(|position| records.get(position))
            .ok_or_else(|| AliasError::IndexOutOfRange {
                source_name: app_ref.source.clone(),
                index,
                len: records.len(),
            })?;

        record
            .get(&app_ref.key)
            .cloned()
            .ok_or_else(|| AliasError::UndefinedKey {
                source_name: app_ref.source.clone(),
                key: app_ref.key.clone(),
            })
    }

    /// Resolves any reference. Unbound user inputs are returned verbatim.
    pub fn resolve(
        &mut self,
        reference: &Reference,
        user_vars: &HashMap<String, String>,
    ) -> Result<String> {
        match reference {
            Reference::UserInput(name) => Ok(user_vars
                .get(name)
                .cloned()
                .unwrap_or_else(|| reference.to_string())),
            Reference::App(app_ref) => self.value(app_ref),
            Reference::Env(var) => Ok((self.env)(var).unwrap_or_else(|| {
                log::warn!("Environment variable '{}' is not set", var);
                String::new()
            })),
            Reference::Locals(key) => {
                self.store
                    .local(key)
                    .map(str::to_string)
                    .ok_or_else(|| AliasError::UndefinedKey {
                        source_name: RESERVED_LOCALS.to_string(),
                        key: key.clone(),
                    })
            }
        }
    }

    /// Renders a template, substituting every reference in template order.
    pub fn render(
        &mut self,
        template: &Template,
        user_vars: &HashMap<String, String>,
    ) -> Result<String> {
        let mut rendered = String::with_capacity(template.raw().len());
        for segment in template.segments() {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Ref(reference) => rendered.push_str(&self.resolve(reference, user_vars)?),
            }
        }
        Ok(rendered)
    }

    /// Renders a source command: no user input, no bindings.
    fn render_direct(&mut self, template: &Template) -> Result<String> {
        let saved = std::mem::take(&mut self.bindings);
        let rendered = self.render(template, &HashMap::new());
        self.bindings = saved;
        rendered
    }

    // --- Batch fetching ---

    /// Fetches `names` and everything they depend on, level by level. The
    /// sources of one level are independent, so their commands run
    /// concurrently.
    pub fn prefetch<'n>(&mut self, names: impl IntoIterator<Item = &'n str>) -> Result<()> {
        let config = self.config;
        let graph = dependency_graph(config);

        // Closure of the request over sources that actually need a run.
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut queue: Vec<String> = names.into_iter().map(str::to_string).collect();
        while let Some(name) = queue.pop() {
            if pending.contains(&name) || self.memo.contains_key(&name) {
                continue;
            }
            let Some(dynamic) = config.source(&name).and_then(|source| source.as_dynamic()) else {
                continue;
            };
            if self.store.fresh(&name, dynamic.cache_ttl, self.now).is_some() {
                continue;
            }
            if let Some(dependencies) = graph.get(&name) {
                queue.extend(dependencies.iter().cloned());
            }
            pending.insert(name);
        }

        while !pending.is_empty() {
            let level: Vec<String> = pending
                .iter()
                .filter(|name| {
                    graph
                        .get(*name)
                        .is_none_or(|deps| deps.iter().all(|dep| !pending.contains(dep)))
                })
                .cloned()
                .collect();
            if level.is_empty() {
                // Every cycle through a pending source is reachable from the request.
                let path = find_cycles(config)
                    .into_iter()
                    .find(|cycle| cycle.iter().any(|name| pending.contains(name)))
                    .unwrap_or_else(|| pending.iter().cloned().collect());
                return Err(AliasError::CyclicDependency { path });
            }
            for name in &level {
                pending.remove(name);
            }
            self.run_level(&level)?;
        }
        Ok(())
    }

    fn run_level(&mut self, level: &[String]) -> Result<()> {
        let config = self.config;
        let mut jobs = Vec::with_capacity(level.len());
        for name in level {
            let Some(dynamic) = config.source(name).and_then(|source| source.as_dynamic()) else {
                continue;
            };
            // Dependencies sit in earlier levels, so this never runs anything.
            let command_line = self.render_direct(&dynamic.command)?;
            jobs.push((name.as_str(), dynamic, command_line));
        }
        log::debug!("Fetching {} independent source(s) in parallel", jobs.len());

        let runner = self.runner;
        let token = &self.cancellation_token;
        let results: Vec<(&str, Result<Vec<Record>>)> = jobs
            .par_iter()
            .map(|(name, dynamic, command_line)| {
                (*name, runner.run(name, dynamic, command_line, token))
            })
            .collect();

        let mut first_error = None;
        for (name, result) in results {
            match result {
                Ok(records) => {
                    self.store.put(name, records.clone(), self.now);
                    self.memo.insert(name.to_string(), Arc::new(records));
                    self.marks.insert(name.to_string(), Mark::Done);
                }
                Err(e) => {
                    log::trace!("Source '{}' failed during prefetch: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// --- Static graph analysis ---

/// Edges from each dynamic source to the dynamic sources its command
/// references. Static sources have no dependencies and are left out.
pub fn dependency_graph(config: &Config) -> BTreeMap<String, Vec<String>> {
    config
        .dynamic_sources()
        .map(|(name, dynamic)| {
            let mut seen = HashSet::new();
            let dependencies = dynamic
                .command
                .app_refs()
                .map(|app_ref| app_ref.source.clone())
                .filter(|dep| config.source(dep).is_some_and(|s| s.is_dynamic()))
                .filter(|dep| seen.insert(dep.clone()))
                .collect();
            (name.to_string(), dependencies)
        })
        .collect()
}

/// Every distinct cycle of the dynamic-source graph, each as the full path
/// closed by its first node (`a -> b -> a`).
pub fn find_cycles(config: &Config) -> Vec<Vec<String>> {
    let graph = dependency_graph(config);
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut cycles = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    fn visit<'g>(
        node: &'g str,
        graph: &'g BTreeMap<String, Vec<String>>,
        marks: &mut HashMap<&'g str, Mark>,
        stack: &mut Vec<&'g str>,
        cycles: &mut Vec<Vec<String>>,
        seen: &mut HashSet<Vec<String>>,
    ) {
        marks.insert(node, Mark::InProgress);
        stack.push(node);
        for next in graph.get(node).into_iter().flatten() {
            match marks.get(next.as_str()) {
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let members: Vec<String> =
                        stack.iter().skip(start).map(|n| n.to_string()).collect();
                    if seen.insert(canonical_rotation(&members)) {
                        let mut path = members;
                        path.push(next.clone());
                        cycles.push(path);
                    }
                }
                Some(Mark::Done) => {}
                None => visit(next, graph, marks, stack, cycles, seen),
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
    }

    for node in graph.keys() {
        if !marks.contains_key(node.as_str()) {
            visit(node, &graph, &mut marks, &mut stack, &mut cycles, &mut seen);
        }
    }
    cycles
}

fn canonical_rotation(members: &[String]) -> Vec<String> {
    let pivot = members
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map_or(0, |(index, _)| index);
    members
        .iter()
        .cycle()
        .skip(pivot)
        .take(members.len())
        .cloned()
        .collect()
}

/// A topological order of every dynamic source: each source comes after the
/// sources it depends on.
pub fn dependency_order(config: &Config) -> Result<Vec<String>> {
    if let Some(path) = find_cycles(config).into_iter().next() {
        return Err(AliasError::CyclicDependency { path });
    }

    let graph = dependency_graph(config);
    let mut order = Vec::with_capacity(graph.len());
    let mut done: HashSet<&str> = HashSet::new();

    fn post_order<'g>(
        node: &'g str,
        graph: &'g BTreeMap<String, Vec<String>>,
        done: &mut HashSet<&'g str>,
        order: &mut Vec<String>,
    ) {
        if !done.insert(node) {
            return;
        }
        for next in graph.get(node).into_iter().flatten() {
            post_order(next, graph, done, order);
        }
        order.push(node.to_string());
    }

    for node in graph.keys() {
        post_order(node, &graph, &mut done, &mut order);
    }
    Ok(order)
}
