// EN: src/core/validator.rs

//! # Config Validator
//!
//! Static checks over the whole configuration, run before anything executes.
//! Every check is recorded, passed or failed, so that a verbose report can
//! show the full checklist. Findings are collected, never fail-fast.

use crate::{
    constants::{MAX_HISTORY_SIZE, RESERVED_SOURCE_NAMES},
    core::{
        reference::{AppRef, Reference, Template},
        resolver::find_cycles,
    },
    error::{AliasError, Result},
    models::{Config, Record, SourceKind},
};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Keys a `config` block may carry besides `style-*` entries.
const CONFIG_KEYS: &[&str] = &["history-size", "verbose"];
const STYLE_KEY_PREFIX: &str = "style-";

/// One validation observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Where the problem is, e.g. `Block 3` or `command 'Git' > sub 'log'`.
    pub location: String,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub passed: bool,
    pub finding: Finding,
}

/// Every check performed, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    checks: Vec<Check>,
}

impl ValidationReport {
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|check| check.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.len() - self.passed_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| &check.finding)
    }

    /// Converts a failing report into [`AliasError::Validation`].
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            return Ok(self);
        }
        Err(AliasError::Validation {
            findings: self.failures().cloned().collect(),
        })
    }

    /// The checklist as text. Without `verbose` only failures are listed.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        for check in &self.checks {
            if check.passed && !verbose {
                continue;
            }
            let tag = if check.passed { "[OK]" } else { "[FAIL]" };
            let _ = writeln!(out, "{tag} {}", check.finding.message);
            if !check.passed {
                if !check.finding.location.is_empty() {
                    let _ = writeln!(out, "       Location: {}", check.finding.location);
                }
                if let Some(hint) = &check.finding.hint {
                    let _ = writeln!(out, "       Hint: {hint}");
                }
            }
        }
        let _ = write!(
            out,
            "\nResults: {}/{} passed, {} failed",
            self.passed_count(),
            self.checks.len(),
            self.failed_count()
        );
        out
    }

    fn pass(&mut self, message: impl Into<String>) {
        self.checks.push(Check {
            passed: true,
            finding: Finding {
                location: String::new(),
                message: message.into(),
                hint: None,
            },
        });
    }

    fn fail(&mut self, location: impl Into<String>, message: impl Into<String>, hint: Option<String>) {
        self.checks.push(Check {
            passed: false,
            finding: Finding {
                location: location.into(),
                message: message.into(),
                hint,
            },
        });
    }
}

/// Runs every check over `config`.
pub fn validate(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_source_names(config, &mut report);
    check_source_bodies(config, &mut report);
    check_references(config, &mut report);
    check_cycles(config, &mut report);
    check_arg_aliases(config, &mut report);
    check_settings(config, &mut report);
    log::debug!(
        "Validation finished: {} passed, {} failed",
        report.passed_count(),
        report.failed_count()
    );
    report
}

fn block_location(block: usize) -> String {
    format!("Block {block}")
}

fn check_source_names(config: &Config, report: &mut ValidationReport) {
    let before = report.failed_count();
    for (block, name) in &config.duplicate_sources {
        report.fail(
            block_location(*block),
            format!("Source '{name}' is declared more than once"),
            Some("Source names must be unique across dict and dynamic_dict blocks".to_string()),
        );
    }
    for source in &config.sources {
        if RESERVED_SOURCE_NAMES.contains(&source.name.as_str()) {
            report.fail(
                block_location(source.block),
                format!("Source name '{}' is reserved", source.name),
                Some(format!("Reserved names: {}", RESERVED_SOURCE_NAMES.join(", "))),
            );
        }
    }
    if report.failed_count() == before {
        report.pass("Source names are unique and not reserved");
    }
}

fn check_source_bodies(config: &Config, report: &mut ValidationReport) {
    for source in &config.sources {
        let location = block_location(source.block);
        match &source.kind {
            SourceKind::Static(records) if records.is_empty() => report.fail(
                location,
                format!("dict '{}' has empty data list", source.name),
                Some("Add at least one item to the data list".to_string()),
            ),
            SourceKind::Static(records) => {
                let foreign: BTreeSet<String> = records
                    .iter()
                    .flat_map(|record| record.values())
                    .flat_map(|value| {
                        Template::parse(value)
                            .references()
                            .filter(|reference| matches!(reference, Reference::App(_) | Reference::Locals(_)))
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                    })
                    .collect();
                if foreign.is_empty() {
                    report.pass(format!(
                        "dict '{}' has valid data structure ({} items)",
                        source.name,
                        records.len()
                    ));
                } else {
                    report.fail(
                        location,
                        format!(
                            "dict '{}' data uses unsupported references: {}",
                            source.name,
                            foreign.into_iter().collect::<Vec<_>>().join(", ")
                        ),
                        Some("Only $${env.VAR} can be used inside dict data".to_string()),
                    );
                }
            }
            SourceKind::Dynamic(dynamic) if dynamic.mapping.is_empty() => report.fail(
                location,
                format!("dynamic_dict '{}' has empty mapping", source.name),
                Some("Add at least one key mapping".to_string()),
            ),
            SourceKind::Dynamic(dynamic) => report.pass(format!(
                "dynamic_dict '{}' has valid mapping ({} keys)",
                source.name,
                dynamic.mapping.len()
            )),
        }
    }
}

/// Every template and pattern that can hold references, with its location.
fn reference_sites(config: &Config) -> Vec<(String, Vec<AppRef>)> {
    let mut sites = Vec::new();
    for (name, dynamic) in config.dynamic_sources() {
        let block = config.source(name).map_or(0, |source| source.block);
        sites.push((
            format!("{} (dynamic_dict '{name}')", block_location(block)),
            dynamic.command.app_refs().cloned().collect(),
        ));
    }
    for (_, node) in config.tree.iter() {
        let mut refs: Vec<AppRef> = node.template.app_refs().cloned().collect();
        refs.extend(Template::parse(node.alias.raw()).app_refs().cloned());
        sites.push((node.location.clone(), refs));

        for arg in &node.args {
            let mut arg_refs: Vec<AppRef> = arg.template.app_refs().cloned().collect();
            for alias in &arg.aliases {
                arg_refs.extend(Template::parse(alias.raw()).app_refs().cloned());
            }
            sites.push((
                format!("{} > arg '{}'", node.location, arg.display_alias()),
                arg_refs,
            ));
        }
    }
    sites
}

fn check_references(config: &Config, report: &mut ValidationReport) {
    let before = report.failed_count();
    for (location, refs) in reference_sites(config) {
        for app_ref in refs {
            check_reference(config, &location, &app_ref, report);
        }
    }
    if report.failed_count() == before {
        report.pass("All dict/dynamic_dict references are valid");
    }
}

fn check_reference(config: &Config, location: &str, app_ref: &AppRef, report: &mut ValidationReport) {
    let Some(source) = config.source(&app_ref.source) else {
        report.fail(
            location,
            format!("Reference {app_ref} uses undefined source '{}'", app_ref.source),
            Some(format!("Define a dict or dynamic_dict named '{}'", app_ref.source)),
        );
        return;
    };

    if let Some(index) = app_ref.index
        && index < 0
    {
        report.fail(
            location,
            format!("Reference {app_ref} uses negative index [{index}]"),
            Some("Indices start at 0".to_string()),
        );
        return;
    }

    let records = match &source.kind {
        SourceKind::Static(records) => records,
        // Dynamic records are unknown until the source runs, but their keys
        // are exactly the mapping's.
        SourceKind::Dynamic(dynamic) => {
            if !dynamic.mapping.contains_key(&app_ref.key) {
                report.fail(
                    location,
                    format!(
                        "Reference {app_ref} uses key '{}' not mapped by dynamic_dict '{}'",
                        app_ref.key, app_ref.source
                    ),
                    Some(available_keys_hint(dynamic.mapping.keys())),
                );
            }
            return;
        }
    };

    match app_ref.index.and_then(|index| usize::try_from(index).ok()) {
        Some(index) => match records.get(index) {
            None => report.fail(
                location,
                format!(
                    "Reference {app_ref} uses index [{index}] but '{}' only has {} items",
                    app_ref.source,
                    records.len()
                ),
                Some(valid_indices_hint(&app_ref.source, records)),
            ),
            Some(record) if !record.contains_key(&app_ref.key) => report.fail(
                location,
                format!(
                    "Reference {app_ref} uses key '{}' not found at '{}[{index}]'",
                    app_ref.key, app_ref.source
                ),
                Some(available_keys_hint(record.keys())),
            ),
            Some(_) => {}
        },
        None => {
            if !records.iter().any(|record| record.contains_key(&app_ref.key)) {
                let keys: BTreeSet<&String> = records.iter().flat_map(Record::keys).collect();
                report.fail(
                    location,
                    format!(
                        "Reference {app_ref} uses key '{}' not found in '{}'",
                        app_ref.key, app_ref.source
                    ),
                    Some(available_keys_hint(keys.into_iter())),
                );
            }
        }
    }
}

fn valid_indices_hint(source: &str, records: &[Record]) -> String {
    match records.len() {
        0 => format!("Dict '{source}' is empty"),
        len => format!("Valid indices for '{source}': 0 to {}", len - 1),
    }
}

fn available_keys_hint<'k>(keys: impl Iterator<Item = &'k String>) -> String {
    let keys: Vec<&str> = keys.map(String::as_str).collect();
    if keys.is_empty() {
        "Item has no keys".to_string()
    } else {
        format!("Available keys: {}", keys.join(", "))
    }
}

fn check_cycles(config: &Config, report: &mut ValidationReport) {
    let cycles = find_cycles(config);
    if cycles.is_empty() {
        report.pass("No circular references in dynamic_dict dependencies");
        return;
    }
    for cycle in cycles {
        let block = cycle
            .first()
            .and_then(|name| config.source(name))
            .map_or(0, |source| source.block);
        report.fail(
            block_location(block),
            format!("Circular reference detected: {}", cycle.join(" -> ")),
            Some("Break the cycle by using a static dict or restructuring dependencies".to_string()),
        );
    }
}

fn check_arg_aliases(config: &Config, report: &mut ValidationReport) {
    let before = report.failed_count();
    for (_, node) in config.tree.iter() {
        for arg in node.args.iter().filter(|arg| arg.aliases.len() > 1) {
            for (i, first) in arg.aliases.iter().enumerate() {
                for second in arg.aliases.iter().skip(i + 1) {
                    if first.placeholder_signature() != second.placeholder_signature() {
                        report.fail(
                            node.location.clone(),
                            format!(
                                "Arg aliases '{}' and '{}' use different placeholders",
                                first.raw(),
                                second.raw()
                            ),
                            Some(
                                "Every alias of one arg must use the same placeholders in the same order"
                                    .to_string(),
                            ),
                        );
                    }
                }
            }
        }
    }
    if report.failed_count() == before {
        report.pass("Arg alias arrays share the same placeholders");
    }
}

fn check_settings(config: &Config, report: &mut ValidationReport) {
    for (block, settings) in &config.config_blocks {
        let location = format!("{} (config)", block_location(*block));
        let before = report.failed_count();

        if let Some(size) = settings.history_size
            && size > MAX_HISTORY_SIZE
        {
            report.fail(
                location.clone(),
                format!("history-size {size} exceeds the maximum of {MAX_HISTORY_SIZE}"),
                Some(format!("Use a value between 0 and {MAX_HISTORY_SIZE}")),
            );
        }

        let unknown: Vec<&str> = settings
            .extra
            .keys()
            .map(String::as_str)
            .filter(|key| !key.starts_with(STYLE_KEY_PREFIX))
            .collect();
        if !unknown.is_empty() {
            report.fail(
                location,
                format!("Unknown config keys: {}", unknown.join(", ")),
                Some(format!("Valid keys: {}, {STYLE_KEY_PREFIX}*", CONFIG_KEYS.join(", "))),
            );
        }

        if report.failed_count() == before {
            report.pass("Config block has valid keys");
        }
    }
}
