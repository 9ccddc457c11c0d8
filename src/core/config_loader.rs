// EN: src/core/config_loader.rs

//! # Config Loader
//!
//! Turns already-parsed block values into the immutable [`Config`] model.
//!
//! The configuration file itself is a TOML document with a `block` array of
//! tables (or a JSON document with the same shape, or a bare JSON array of
//! blocks). Every block carries a `type` tag selecting one of `dict`,
//! `dynamic_dict`, `command` or `config`.
use crate::{
    core::reference::{Pattern, Reference, Segment, Template},
    error::{AliasError, Result},
    models::{
        ArgDef, Block, CommandBlock, CommandNode, CommandTree, Config, ConfigBlock, DynamicSource,
        GlobalSettings, HelperType, NodeId, Record, Source, SourceKind,
    },
};
use crate::constants::{DEFAULT_COMMAND_TIMEOUT_SECS, MAX_HISTORY_SIZE};
use serde_json::Value;
use std::{collections::BTreeMap, fs, path::Path};

/// Looks up an environment variable. Injected so that tests never need to
/// mutate the real process environment.
pub type EnvLookup<'a> = &'a (dyn Fn(&str) -> Option<String> + Sync);

/// Reads the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads a configuration file and returns its blocks as untyped values.
///
/// Files ending in `.json` are parsed with `serde_json`; anything else is
/// parsed as TOML.
pub fn read_block_values(path: &Path) -> Result<Vec<Value>> {
    log::debug!("Reading configuration blocks from '{}'", path.display());
    let content = fs::read_to_string(path)?;
    let content = content.trim_start_matches('\u{feff}');

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let document: Value = if is_json {
        serde_json::from_str(content).map_err(|e| AliasError::ConfigSyntax {
            block: 0,
            message: format!("invalid JSON in '{}': {}", path.display(), e),
        })?
    } else {
        toml::from_str(content).map_err(|e| AliasError::ConfigSyntax {
            block: 0,
            message: format!("invalid TOML in '{}': {}", path.display(), e),
        })?
    };

    match document {
        Value::Array(blocks) => Ok(blocks),
        Value::Object(mut map) => match map.remove("block") {
            Some(Value::Array(blocks)) => Ok(blocks),
            Some(_) => Err(AliasError::ConfigSyntax {
                block: 0,
                message: "'block' must be an array of tables".to_string(),
            }),
            None => Ok(Vec::new()),
        },
        _ => Err(AliasError::ConfigSyntax {
            block: 0,
            message: "the configuration document must be a table or an array".to_string(),
        }),
    }
}

/// Types every block. The first malformed block (unknown `type`, missing
/// field, wrong value type) is reported with its 1-based position.
pub fn parse_blocks(values: Vec<Value>) -> Result<Vec<Block>> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value::<Block>(value).map_err(|e| AliasError::ConfigSyntax {
                block: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Builds the configuration model from typed blocks.
///
/// `$${env.VAR}` placeholders inside static `dict` data are substituted here,
/// once, with unset variables becoming empty strings.
pub fn build_config(blocks: Vec<Block>, env: EnvLookup<'_>) -> Config {
    let mut sources = Vec::new();
    let mut tree = CommandTree::new();
    let mut settings = GlobalSettings::default();
    let mut config_blocks = Vec::new();

    for (index, block) in blocks.into_iter().enumerate() {
        let position = index + 1;
        match block {
            Block::Dict(dict) => {
                let records = dict
                    .data
                    .iter()
                    .map(|item| stringify_record(item, env))
                    .collect();
                sources.push(Source {
                    name: dict.name,
                    kind: SourceKind::Static(records),
                    block: position,
                });
            }
            Block::DynamicDict(dynamic) => sources.push(Source {
                name: dynamic.name,
                kind: SourceKind::Dynamic(DynamicSource {
                    command: Template::parse(&dynamic.command),
                    mapping: dynamic.mapping,
                    timeout: dynamic.timeout,
                    cache_ttl: dynamic.cache_ttl,
                }),
                block: position,
            }),
            Block::Command(command) => {
                let inherited = Inherited::default();
                add_command(&mut tree, &command, CommandTree::ROOT, inherited, None);
            }
            Block::Config(config) => {
                apply_settings(&mut settings, &config);
                config_blocks.push((position, config));
            }
        }
    }

    log::debug!(
        "Built configuration: {} source(s), {} command node(s)",
        sources.len(),
        tree.len()
    );
    Config::new(sources, tree, settings, config_blocks)
}

/// Convenience wrapper: read, type and build in one step.
pub fn load_config(path: &Path, env: EnvLookup<'_>) -> Result<Config> {
    let values = read_block_values(path)?;
    let blocks = parse_blocks(values)?;
    Ok(build_config(blocks, env))
}

// --- Helpers ---

/// Settings a sub takes from its parent unless it sets them itself. The
/// default is what a top-level command starts from.
#[derive(Debug, Clone, Copy)]
struct Inherited {
    strict: bool,
    timeout: u64,
    helper_type: HelperType,
}

impl Default for Inherited {
    fn default() -> Self {
        Self {
            strict: false,
            timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
            helper_type: HelperType::default(),
        }
    }
}

fn add_command(
    tree: &mut CommandTree,
    block: &CommandBlock,
    parent: NodeId,
    inherited: Inherited,
    parent_location: Option<&str>,
) -> NodeId {
    let label = if block.name.is_empty() {
        block.alias.clone()
    } else {
        block.name.clone()
    };
    let location = match parent_location {
        Some(prefix) => format!("{prefix} > sub '{label}'"),
        None => format!("command '{label}'"),
    };

    let effective = Inherited {
        strict: block.strict.unwrap_or(inherited.strict),
        timeout: block.timeout.unwrap_or(inherited.timeout),
        helper_type: block.helper_type.unwrap_or(inherited.helper_type),
    };

    let args = block
        .args
        .iter()
        .map(|arg| {
            let variants = arg.alias.variants();
            ArgDef {
                aliases: variants.iter().map(|alias| Pattern::parse(alias)).collect(),
                is_array: matches!(arg.alias, crate::models::AliasSpec::Many(_)),
                template: Template::parse(&arg.command),
                helper: arg.helper.clone(),
            }
        })
        .collect();

    let node = CommandNode {
        name: label,
        alias: Pattern::parse(&block.alias),
        template: Template::parse(&block.command),
        helper: block.helper.clone(),
        helper_type: effective.helper_type,
        strict: effective.strict,
        timeout: effective.timeout,
        set_locals: block.set_locals,
        args,
        subs: Vec::new(),
        parent: None,
        location: location.clone(),
    };
    let id = tree.push(node, parent);

    for sub in &block.sub {
        add_command(tree, sub, id, effective, Some(&location));
    }
    id
}

fn apply_settings(settings: &mut GlobalSettings, block: &ConfigBlock) {
    if let Some(size) = block.history_size {
        settings.history_size = size.min(MAX_HISTORY_SIZE);
    }
    settings.verbose |= block.verbose;
    for (key, value) in &block.extra {
        if key.starts_with("style-") {
            settings.styles.insert(key.clone(), value_to_string(value));
        }
    }
}

fn stringify_record(item: &BTreeMap<String, Value>, env: EnvLookup<'_>) -> Record {
    item.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => substitute_env(text, env),
                other => value_to_string(other),
            };
            (key.clone(), text)
        })
        .collect()
}

/// Renders a JSON scalar the way a shell user expects to see it: strings
/// without quotes, `null` as nothing, containers as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn substitute_env(text: &str, env: EnvLookup<'_>) -> String {
    if !text.contains("$${") {
        return text.to_string();
    }
    Template::parse(text)
        .segments()
        .iter()
        .map(|segment| match segment {
            Segment::Literal(literal) => literal.clone(),
            Segment::Ref(Reference::Env(var)) => env(var).unwrap_or_default(),
            Segment::Ref(other) => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_unknown_block_type_is_a_syntax_error() {
        // --- Setup ---
        let values = vec![
            json!({"type": "dict", "name": "a", "data": [{"k": "v"}]}),
            json!({"type": "macro", "name": "b"}),
        ];

        // --- Execute ---
        let result = parse_blocks(values);

        // --- Assert ---
        match result {
            Err(AliasError::ConfigSyntax { block, .. }) => assert_eq!(block, 2),
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_subs_inherit_strict_and_timeout_unless_overridden() {
        // --- Setup ---
        let blocks = parse_blocks(vec![json!({
            "type": "command",
            "name": "Git",
            "alias": "g",
            "command": "git",
            "strict": true,
            "timeout": 30,
            "sub": [
                {"alias": "st", "command": "status"},
                {"alias": "lg", "command": "log", "strict": false}
            ]
        })])
        .unwrap();

        // --- Execute ---
        let config = build_config(blocks, &no_env);

        // --- Assert ---
        let root = config.tree.top_level()[0];
        let subs = &config.tree.node(root).subs;
        let status = config.tree.node(subs[0]);
        let log_node = config.tree.node(subs[1]);
        assert!(status.strict);
        assert_eq!(status.timeout, 30);
        assert!(!log_node.strict);
        assert_eq!(status.location, "command 'Git' > sub 'st'");
        assert_eq!(config.tree.lineage(subs[1]), vec![root, subs[1]]);
    }

    #[test]
    fn test_commands_without_a_timeout_get_the_default() {
        // --- Setup ---
        let blocks = parse_blocks(vec![json!({
            "type": "command",
            "name": "Make",
            "alias": "m",
            "command": "make",
            "sub": [{"alias": "t", "command": "test"}]
        })])
        .unwrap();

        // --- Execute ---
        let config = build_config(blocks, &no_env);

        // --- Assert ---
        let root = config.tree.top_level()[0];
        let sub = config.tree.node(root).subs[0];
        assert_eq!(config.tree.node(root).timeout, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.tree.node(sub).timeout, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert!(!config.tree.node(sub).strict);
    }

    #[test]
    fn test_static_values_are_stringified_and_env_substituted() {
        // --- Setup ---
        let env = |name: &str| (name == "REGION").then(|| "eu-west-1".to_string());
        let blocks = parse_blocks(vec![json!({
            "type": "dict",
            "name": "hosts",
            "data": [{"port": 22, "region": "$${env.REGION}", "missing": "x$${env.NOPE}y", "tag": null}]
        })])
        .unwrap();

        // --- Execute ---
        let config = build_config(blocks, &env);

        // --- Assert ---
        let Some(SourceKind::Static(records)) = config.source("hosts").map(|s| &s.kind) else {
            panic!("hosts should be a static source");
        };
        let record = &records[0];
        assert_eq!(record["port"], "22");
        assert_eq!(record["region"], "eu-west-1");
        assert_eq!(record["missing"], "xy");
        assert_eq!(record["tag"], "");
    }

    #[test]
    fn test_history_size_is_capped() {
        let blocks = parse_blocks(vec![json!({"type": "config", "history-size": 5000, "style-completion": "bg:#333"})]).unwrap();
        let config = build_config(blocks, &no_env);
        assert_eq!(config.settings.history_size, MAX_HISTORY_SIZE);
        assert_eq!(config.settings.styles["style-completion"], "bg:#333");
    }

    #[test]
    fn test_reads_toml_block_array() {
        // --- Setup ---
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[[block]]
type = "dict"
name = "servers"
data = [{{ name = "prod", host = "10.0.0.1" }}]

[[block]]
type = "dynamic_dict"
name = "pods"
command = "kubectl get pods -o json"
mapping = {{ name = "metadata.name" }}
cache-ttl = 60

[[block]]
type = "command"
name = "SSH"
alias = "ssh $${{servers.name}}"
command = "ssh $${{servers.host}}"
args = [{{ alias = ["-p ${{port}}", "--port ${{port}}"], command = "-p ${{port}}" }}]
"#
        )
        .unwrap();

        // --- Execute ---
        let config = load_config(file.path(), &no_env).unwrap();

        // --- Assert ---
        assert_eq!(config.sources.len(), 2);
        let pods = config.source("pods").and_then(Source::as_dynamic).unwrap();
        assert_eq!(pods.cache_ttl, 60);
        assert_eq!(pods.timeout, crate::constants::DEFAULT_SOURCE_TIMEOUT_SECS);
        let ssh = config.tree.node(config.tree.top_level()[0]);
        assert_eq!(ssh.alias.raw(), "ssh $${servers.name}");
        assert!(ssh.args[0].is_array);
        assert_eq!(ssh.args[0].display_alias(), "-p, --port");
    }

    #[test]
    fn test_duplicate_source_names_keep_first_declaration() {
        let blocks = parse_blocks(vec![
            json!({"type": "dict", "name": "a", "data": [{"v": "1"}]}),
            json!({"type": "dict", "name": "a", "data": [{"v": "2"}]}),
        ])
        .unwrap();
        let config = build_config(blocks, &no_env);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.duplicate_sources, vec![(2, "a".to_string())]);
    }
}
