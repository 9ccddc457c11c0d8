// EN: src/core/helper.rs

//! Help text for matched commands and for the whole configuration.
//!
//! The renderers return plain text; colors are added by the CLI layer.

use crate::{
    constants::{HELP_MAX_LINE_WIDTH, HELP_MAX_SPACING, HELP_MIN_SPACING},
    models::{ArgDef, CommandTree, Config, HelperType, NodeId},
};
use std::fmt::Write;

const NO_DESCRIPTION: &str = "No description available.";
const NO_HELPER: &str = "No helper information available for this command.";

/// Renders help for a matched chain using the helper type of its
/// top-level command.
pub fn render_help(tree: &CommandTree, chain: &[NodeId]) -> String {
    let helper_type = chain
        .first()
        .map_or(HelperType::Auto, |id| tree.node(*id).helper_type);
    match helper_type {
        HelperType::Auto => render_auto(tree, chain),
        HelperType::Custom => render_custom(tree, chain),
    }
}

/// The helper strings of the chain, top-level first, separated by a blank
/// line.
pub fn render_custom(tree: &CommandTree, chain: &[NodeId]) -> String {
    let sections: Vec<&str> = chain
        .iter()
        .filter_map(|id| tree.node(*id).helper.as_deref())
        .map(str::trim)
        .filter(|helper| !helper.is_empty())
        .collect();
    if sections.is_empty() {
        return NO_HELPER.to_string();
    }
    sections.join("\n\n")
}

/// The structured help of the last node of the chain: description, usage,
/// args, then every sub recursively.
pub fn render_auto(tree: &CommandTree, chain: &[NodeId]) -> String {
    let Some(&target_id) = chain.last() else {
        return NO_HELPER.to_string();
    };
    let target = tree.node(target_id);
    let matched_path = chain
        .iter()
        .map(|id| tree.node(*id).alias.raw())
        .collect::<Vec<_>>()
        .join(" ");

    let mut lines = vec![matched_path.clone(), String::new()];
    push_description(&mut lines, target.helper.as_deref(), 4);
    lines.push(String::new());
    lines.push("    Usage:".to_string());
    lines.push(format!("        {}", usage(tree, target_id, &matched_path)));

    if !target.args.is_empty() {
        lines.push(String::new());
        lines.push("    Args:".to_string());
        for arg in &target.args {
            lines.extend(format_arg(arg, 8));
        }
    }

    if !target.subs.is_empty() {
        lines.push(String::new());
        lines.push("    Options/Subcommands:".to_string());
        for sub in &target.subs {
            format_sub(tree, *sub, 8, &matched_path, &mut lines);
        }
    }

    lines.join("\n")
}

/// The listing shown for help at the root: every source and top-level
/// command.
pub fn render_global(config: &Config) -> String {
    let mut out = String::new();

    let statics: Vec<&str> = config.static_sources().map(|s| s.name.as_str()).collect();
    if !statics.is_empty() {
        out.push_str("Dicts (Static):\n");
        for name in statics {
            let _ = writeln!(out, "  - {name}");
        }
        out.push('\n');
    }

    let dynamics: Vec<&str> = config.dynamic_sources().map(|(name, _)| name).collect();
    if !dynamics.is_empty() {
        out.push_str("Dynamic Dicts:\n");
        for name in dynamics {
            let _ = writeln!(out, "  - {name}");
        }
        out.push('\n');
    }

    let commands = config.tree.top_level();
    if !commands.is_empty() {
        out.push_str("Commands:\n");
        for id in commands {
            let command = config.tree.node(*id);
            let _ = writeln!(out, "  {} (alias: {})", command.name, command.alias.raw());
            for line in command.helper.as_deref().unwrap_or_default().trim().lines() {
                let _ = writeln!(out, "    {line}");
            }
            let _ = writeln!(out, "{}", "-".repeat(20));
        }
    }
    out
}

// --- Building blocks ---

fn push_description(lines: &mut Vec<String>, helper: Option<&str>, indent: usize) {
    let pad = " ".repeat(indent);
    lines.push(format!("{pad}Description:"));
    match helper.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => lines.extend(text.lines().map(|line| format!("{pad}    {line}"))),
        None => lines.push(format!("{pad}    {NO_DESCRIPTION}")),
    }
}

fn usage(tree: &CommandTree, id: NodeId, path: &str) -> String {
    let optional = optional_section(tree, id);
    if optional.is_empty() {
        path.to_string()
    } else {
        format!("{path} {optional}")
    }
}

/// `[arg | arg] [sub [...] | sub]`, recursively for nested subs.
fn optional_section(tree: &CommandTree, id: NodeId) -> String {
    let node = tree.node(id);
    let mut parts = Vec::new();

    let flags: Vec<&str> = node
        .args
        .iter()
        .flat_map(|arg| arg.aliases.iter().map(|alias| alias.head()))
        .collect();
    if !flags.is_empty() {
        parts.push(format!("[{}]", flags.join(" | ")));
    }

    let subs: Vec<String> = node
        .subs
        .iter()
        .map(|sub_id| {
            let sub = tree.node(*sub_id);
            let nested = optional_section(tree, *sub_id);
            if nested.is_empty() {
                sub.alias.raw().to_string()
            } else {
                format!("{} {}", sub.alias.raw(), nested)
            }
        })
        .collect();
    if !subs.is_empty() {
        parts.push(format!("[{}]", subs.join(" | ")));
    }

    parts.join(" ")
}

/// One arg line: alias, 2 to 20 spaces of padding, helper. Lines that would
/// exceed the width put the helper on following lines, indented by four.
fn format_arg(arg: &ArgDef, indent: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    let alias = arg.display_alias();
    let helper = arg.helper.as_deref().map(str::trim).unwrap_or_default();
    if helper.is_empty() {
        return vec![format!("{pad}{alias}")];
    }

    let spacing = HELP_MAX_SPACING
        .saturating_sub(alias.chars().count())
        .clamp(HELP_MIN_SPACING, HELP_MAX_SPACING);
    let line = format!("{pad}{alias}{}{helper}", " ".repeat(spacing));
    if line.chars().count() <= HELP_MAX_LINE_WIDTH {
        return vec![line];
    }

    let mut lines = vec![format!("{pad}{alias}")];
    lines.extend(wrap(helper, indent + 4));
    lines
}

/// Greedy word wrap at the help width. A single word longer than the width
/// stays on its own line.
fn wrap(text: &str, indent: usize) -> Vec<String> {
    let pad = " ".repeat(indent);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate_len = indent + current.chars().count() + 1 + word.chars().count();
        if !current.is_empty() && candidate_len > HELP_MAX_LINE_WIDTH {
            lines.push(format!("{pad}{current}"));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(format!("{pad}{current}"));
    }
    lines
}

fn format_sub(tree: &CommandTree, id: NodeId, indent: usize, parent_path: &str, lines: &mut Vec<String>) {
    let sub = tree.node(id);
    let pad = " ".repeat(indent);
    let inner = " ".repeat(indent + 4);
    let full_path = if parent_path.is_empty() {
        sub.alias.raw().to_string()
    } else {
        format!("{parent_path} {}", sub.alias.raw())
    };

    lines.push(format!("{pad}{}", sub.alias.raw()));
    lines.push(String::new());
    push_description(lines, sub.helper.as_deref(), indent + 4);
    lines.push(String::new());
    lines.push(format!("{inner}Usage:"));
    lines.push(format!("{inner}    {}", usage(tree, id, &full_path)));

    if !sub.args.is_empty() {
        lines.push(String::new());
        lines.push(format!("{inner}Args:"));
        for arg in &sub.args {
            lines.extend(format_arg(arg, indent + 8));
        }
    }

    if !sub.subs.is_empty() {
        lines.push(String::new());
        lines.push(format!("{inner}Options/Subcommands:"));
        for nested in &sub.subs {
            format_sub(tree, *nested, indent + 8, &full_path, lines);
        }
    }
    lines.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_loader::{build_config, parse_blocks};
    use serde_json::{Value, json};

    fn config(blocks: Value) -> Config {
        let Value::Array(values) = blocks else {
            unreachable!()
        };
        build_config(parse_blocks(values).unwrap(), &|_| None)
    }

    fn git() -> Config {
        config(json!([
            {"type": "dict", "name": "servers", "data": [{"name": "a"}]},
            {"type": "dynamic_dict", "name": "pods", "command": "kubectl get pods", "mapping": {"n": "n"}},
            {"type": "command", "name": "Git", "alias": "g", "command": "git", "helper": "Git shortcuts",
             "args": [
                {"alias": ["-v", "--verbose"], "command": "--verbose", "helper": "Verbose output"},
                {"alias": "-C ${dir}", "command": "-C ${dir}",
                 "helper": "Run as if git was started in the given directory instead of the current working directory"}
             ],
             "sub": [
                {"alias": "log", "command": "log", "helper": "Show history",
                 "args": [{"alias": "-n ${count}", "command": "-n ${count}"}]},
                {"alias": "st", "command": "status"}
             ]},
            {"type": "command", "name": "Notes", "alias": "notes", "command": "cat notes",
             "helper_type": "custom", "helper": "Top notes",
             "sub": [{"alias": "today", "command": "today", "helper": "  Notes for today  "},
                     {"alias": "bare", "command": "bare"}]}
        ]))
    }

    #[test]
    fn test_auto_help_lists_sections_in_order() {
        // --- Setup ---
        let config = git();
        let g = config.tree.top_level()[0];

        // --- Execute ---
        let text = render_help(&config.tree, &[g]);

        // --- Assert ---
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "g");
        assert_eq!(lines[2], "    Description:");
        assert_eq!(lines[3], "        Git shortcuts");
        assert_eq!(lines[6], "        g [-v | --verbose | -C] [log [-n] | st]");
        assert!(text.contains("        -v, --verbose       Verbose output"));
        assert!(text.contains("    Options/Subcommands:"));
        assert!(text.contains("        log\n"));
        assert!(text.contains("            Usage:\n                g log [-n]"));
        assert!(text.contains("                No description available."));
    }

    #[test]
    fn test_long_arg_helpers_wrap_below_the_alias() {
        let config = git();
        let text = render_auto(&config.tree, &[config.tree.top_level()[0]]);

        assert!(text.contains("        -C ${dir}\n            Run as if git"));
        assert!(text.lines().all(|line| line.chars().count() <= HELP_MAX_LINE_WIDTH));
    }

    #[test]
    fn test_help_for_a_sub_uses_the_matched_path() {
        // --- Setup ---
        let config = git();
        let g = config.tree.top_level()[0];
        let log = config.tree.node(g).subs[0];

        // --- Execute ---
        let text = render_auto(&config.tree, &[g, log]);

        // --- Assert ---
        assert!(text.starts_with("g log\n"));
        assert!(text.contains("        Show history"));
        assert!(text.contains("        g log [-n]"));
        assert!(text.contains("        -n ${count}"));
    }

    #[test]
    fn test_custom_help_joins_helpers_of_the_chain() {
        // --- Setup ---
        let config = git();
        let notes = config.tree.top_level()[1];
        let today = config.tree.node(notes).subs[0];

        // --- Execute & Assert ---
        assert_eq!(
            render_help(&config.tree, &[notes, today]),
            "Top notes\n\nNotes for today"
        );
    }

    #[test]
    fn test_custom_help_without_helpers_says_so() {
        let config = config(json!([
            {"type": "command", "alias": "x", "command": "x", "helper_type": "custom"}
        ]));
        let x = config.tree.top_level()[0];
        assert_eq!(render_help(&config.tree, &[x]), NO_HELPER);
    }

    #[test]
    fn test_global_help_lists_sources_and_commands() {
        // --- Execute ---
        let text = render_global(&git());

        // --- Assert ---
        assert!(text.starts_with("Dicts (Static):\n  - servers\n\nDynamic Dicts:\n  - pods\n"));
        assert!(text.contains("  Git (alias: g)\n    Git shortcuts\n--------------------\n"));
        assert!(text.contains("  Notes (alias: notes)"));
    }
}
