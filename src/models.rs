// EN: src/models.rs

use crate::constants::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_HISTORY_SIZE, DEFAULT_SOURCE_TIMEOUT_SECS,
};
use crate::core::reference::{Pattern, Template};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

// --- DECLARED BLOCKS ---
// These structs mirror the blocks exactly as written in the configuration
// file. They are only used for deserialization; `Config` is what the rest of
// the crate works with.

/// One declared block, dispatched on its `type` tag.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Dict(DictBlock),
    DynamicDict(DynamicDictBlock),
    Command(CommandBlock),
    Config(ConfigBlock),
}

#[derive(Deserialize, Debug, Clone)]
pub struct DictBlock {
    pub name: String,
    #[serde(default)]
    pub data: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DynamicDictBlock {
    pub name: String,
    pub command: String,
    /// internal key -> external key (or dotted path) in the command's JSON output.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    #[serde(default = "default_source_timeout")]
    pub timeout: u64,
    #[serde(rename = "cache-ttl", default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

/// A command or, when nested under `sub`, a subcommand. Optional settings
/// left out of a sub are inherited from its parent.
#[derive(Deserialize, Debug, Clone)]
pub struct CommandBlock {
    #[serde(default)]
    pub name: String,
    pub alias: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub helper: Option<String>,
    #[serde(default)]
    pub helper_type: Option<HelperType>,
    #[serde(default)]
    pub strict: Option<bool>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(rename = "set-locals", default)]
    pub set_locals: bool,
    #[serde(default)]
    pub args: Vec<ArgBlock>,
    #[serde(default)]
    pub sub: Vec<CommandBlock>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ArgBlock {
    pub alias: AliasSpec,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub helper: Option<String>,
}

/// An arg alias may be written as a single string or as an array of
/// equivalent spellings (`["-o ${file}", "--output ${file}"]`).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AliasSpec {
    Single(String),
    Many(Vec<String>),
}

impl AliasSpec {
    pub fn variants(&self) -> Vec<&str> {
        match self {
            Self::Single(alias) => vec![alias.as_str()],
            Self::Many(aliases) => aliases.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConfigBlock {
    #[serde(rename = "history-size", default)]
    pub history_size: Option<usize>,
    #[serde(default)]
    pub verbose: bool,
    /// `style-*` keys for the interactive front end, plus anything unknown
    /// (reported by the validator).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HelperType {
    #[default]
    Auto,
    Custom,
}

fn default_source_timeout() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_SECS
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

// --- RUNTIME MODEL ---

/// One item of a source: internal key -> string value.
pub type Record = BTreeMap<String, String>;

/// The backing command of a dynamic source.
#[derive(Debug, Clone)]
pub struct DynamicSource {
    pub command: Template,
    pub mapping: BTreeMap<String, String>,
    pub timeout: u64,
    pub cache_ttl: u64,
}

#[derive(Debug, Clone)]
pub enum SourceKind {
    Static(Vec<Record>),
    Dynamic(DynamicSource),
}

/// A named data provider.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    /// Position of the declaring block in the file, for diagnostics.
    pub block: usize,
}

impl Source {
    pub fn as_dynamic(&self) -> Option<&DynamicSource> {
        match &self.kind {
            SourceKind::Dynamic(dynamic) => Some(dynamic),
            SourceKind::Static(_) => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.as_dynamic().is_some()
    }
}

/// Stable address of a node in the [`CommandTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// An arg attached to a command node.
#[derive(Debug, Clone)]
pub struct ArgDef {
    /// One pattern per declared spelling.
    pub aliases: Vec<Pattern>,
    /// Whether the aliases were declared as an array.
    pub is_array: bool,
    pub template: Template,
    pub helper: Option<String>,
}

impl ArgDef {
    /// The aliases as shown in help listings: array aliases show only their
    /// leading flag, joined by a comma.
    pub fn display_alias(&self) -> String {
        if self.is_array {
            self.aliases
                .iter()
                .map(Pattern::head)
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            self.aliases
                .first()
                .map(|pattern| pattern.raw().to_string())
                .unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub name: String,
    pub alias: Pattern,
    pub template: Template,
    pub helper: Option<String>,
    pub helper_type: HelperType,
    pub strict: bool,
    /// Seconds; zero disables the timeout.
    pub timeout: u64,
    pub set_locals: bool,
    pub args: Vec<ArgDef>,
    pub subs: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Human-readable position, e.g. `command 'Deploy' > sub 'status'`.
    pub location: String,
}

/// The command tree stored as an arena. `NodeId(0)` is a synthetic root
/// whose subs are the top-level commands; it has no alias and no template.
#[derive(Debug, Clone)]
pub struct CommandTree {
    root: CommandNode,
    nodes: Vec<CommandNode>,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTree {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self {
            root: CommandNode {
                name: String::new(),
                alias: Pattern::default(),
                template: Template::default(),
                helper: None,
                helper_type: HelperType::Auto,
                strict: false,
                timeout: 0,
                set_locals: false,
                args: Vec::new(),
                subs: Vec::new(),
                parent: None,
                location: "root".to_string(),
            },
            nodes: Vec::new(),
        }
    }

    /// Appends `node` as the last sub of its parent and returns its id.
    pub fn push(&mut self, mut node: CommandNode, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len() + 1);
        node.parent = Some(parent);
        self.nodes.push(node);
        self.node_mut(parent).subs.push(id);
        id
    }

    /// Looks up a node. Ids are only minted by [`CommandTree::push`]; an id
    /// from another tree falls back to the root.
    pub fn node(&self, id: NodeId) -> &CommandNode {
        match id.0.checked_sub(1) {
            Some(index) => self.nodes.get(index).unwrap_or(&self.root),
            None => &self.root,
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut CommandNode {
        match id.0.checked_sub(1) {
            Some(index) => self.nodes.get_mut(index).unwrap_or(&mut self.root),
            None => &mut self.root,
        }
    }

    pub fn top_level(&self) -> &[NodeId] {
        &self.root.subs
    }

    /// Number of declared nodes, the root excluded.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node except the root, in insertion (depth-first) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &CommandNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index + 1), node))
    }

    /// The ids from the top-level command down to `id`, root excluded.
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == Self::ROOT {
                break;
            }
            chain.push(node_id);
            current = self.node(node_id).parent;
        }
        chain.reverse();
        chain
    }
}

/// Settings from the `config` block.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub history_size: usize,
    pub verbose: bool,
    pub styles: BTreeMap<String, String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            verbose: false,
            styles: BTreeMap::new(),
        }
    }
}

/// The immutable configuration model built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sources: Vec<Source>,
    source_index: HashMap<String, usize>,
    pub tree: CommandTree,
    pub settings: GlobalSettings,
    /// Raw `config` blocks, kept for validation of unknown keys.
    pub config_blocks: Vec<(usize, ConfigBlock)>,
    /// Names declared more than once; only the first declaration is kept.
    pub duplicate_sources: Vec<(usize, String)>,
}

impl Config {
    pub fn new(
        sources: Vec<Source>,
        tree: CommandTree,
        settings: GlobalSettings,
        config_blocks: Vec<(usize, ConfigBlock)>,
    ) -> Self {
        let mut source_index = HashMap::new();
        let mut kept = Vec::with_capacity(sources.len());
        let mut duplicate_sources = Vec::new();
        for source in sources {
            if source_index.contains_key(&source.name) {
                duplicate_sources.push((source.block, source.name.clone()));
                continue;
            }
            source_index.insert(source.name.clone(), kept.len());
            kept.push(source);
        }
        Self {
            sources: kept,
            source_index,
            tree,
            settings,
            config_blocks,
            duplicate_sources,
        }
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.source_index
            .get(name)
            .and_then(|index| self.sources.get(*index))
    }

    pub fn static_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|source| !source.is_dynamic())
    }

    pub fn dynamic_sources(&self) -> impl Iterator<Item = (&str, &DynamicSource)> {
        self.sources.iter().filter_map(|source| {
            source
                .as_dynamic()
                .map(|dynamic| (source.name.as_str(), dynamic))
        })
    }

    /// TTL per dynamic source, used to drop expired cache entries at load.
    pub fn ttl_map(&self) -> HashMap<String, u64> {
        self.dynamic_sources()
            .map(|(name, dynamic)| (name.to_string(), dynamic.cache_ttl))
            .collect()
    }
}
