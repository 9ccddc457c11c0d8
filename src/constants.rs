// EN: src/constants.rs

/// The short name used for the binary, management flags and default file names.
pub const APP_SHORTCUT: &str = "dya";

/// The display name shown in help banners.
pub const APP_NAME: &str = "DYNAMIC ALIAS";

/// Candidate locations for the configuration file, in lookup order.
pub const CONFIG_FILE_CANDIDATES: &[&str] = &[".dya.toml", "dya.toml", "~/.dya.toml", "~/dya.toml"];

/// Used when none of the configuration candidates exists.
pub const DEFAULT_CONFIG_FILE: &str = "~/.dya.toml";

/// Candidate locations for the cache file, in lookup order.
pub const CACHE_FILE_CANDIDATES: &[&str] = &[".dya.json", "dya.json", "~/.dya.json", "~/dya.json"];

/// Used when none of the cache candidates exists.
pub const DEFAULT_CACHE_FILE: &str = "~/.dya.json";

// --- Reserved names ---

/// Reserved source name for process environment lookups.
pub const RESERVED_ENV: &str = "env";

/// Reserved source name for the persisted locals store.
pub const RESERVED_LOCALS: &str = "locals";

pub const RESERVED_SOURCE_NAMES: &[&str] = &[RESERVED_ENV, RESERVED_LOCALS];

// --- Cache document keys ---

pub const CACHE_KEY_HISTORY: &str = "_history";
pub const CACHE_KEY_LOCALS: &str = "_locals";
pub const CACHE_KEY_TIMESTAMP: &str = "timestamp";
pub const CACHE_KEY_DATA: &str = "data";

/// The single key of the encrypted envelope. Its presence distinguishes an
/// encrypted cache file from a legacy plaintext one.
pub const ENVELOPE_KEY: &str = "_crypt";

/// Prefix shared by every internal (non-source) key of the cache document.
pub const INTERNAL_KEY_PREFIX: char = '_';

// --- Defaults ---

pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// A command timeout of zero means "no timeout".
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 0;
pub const DEFAULT_HISTORY_SIZE: usize = 20;
pub const MAX_HISTORY_SIZE: usize = 1000;

// --- Help rendering ---

pub const HELP_FLAGS: &[&str] = &["-h", "--help"];
pub const HELP_MAX_LINE_WIDTH: usize = 80;
pub const HELP_MIN_SPACING: usize = 2;
pub const HELP_MAX_SPACING: usize = 20;

/// How much of a malformed JSON payload is quoted around the failing offset.
pub const JSON_SNIPPET_RADIUS: usize = 40;
