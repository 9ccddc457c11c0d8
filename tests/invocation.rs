// EN: tests/invocation.rs

//! End-to-end invocations against real shell subprocesses and a cache file
//! on disk.
#![cfg(unix)]

use dynalias::{
    CancellationToken,
    core::{
        cache::{CacheStore, ClearScope, unix_now},
        config_loader::{load_config, process_env},
        crypto::CacheCipher,
        matcher::{MatchOutcome, match_input},
        resolver::Resolver,
        source_executor::ShellSourceRunner,
        validator,
    },
    error::AliasError,
    models::Config,
    system::executor,
};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::{TempDir, tempdir};

fn token() -> CancellationToken {
    Arc::new(AtomicBool::new(false))
}

fn cipher() -> CacheCipher {
    CacheCipher::from_machine_id("integration")
}

fn write_config(dir: &TempDir, blocks: Value) -> PathBuf {
    let path = dir.path().join("aliases.json");
    fs::write(&path, serde_json::to_string_pretty(&blocks).unwrap()).unwrap();
    path
}

fn open_store(path: &Path, config: &Config) -> CacheStore {
    CacheStore::load(path, cipher(), &config.ttl_map(), unix_now())
}

/// Runs one invocation the way the binary does: match, then flush the store.
fn invoke(config: &Config, cache_path: &Path, input: &str) -> Result<MatchOutcome, AliasError> {
    let mut store = open_store(cache_path, config);
    let runner = ShellSourceRunner;
    let outcome = {
        let mut resolver = Resolver::new(config, &mut store, &runner, token());
        match_input(input, &mut resolver)
    };
    store.save().unwrap();
    outcome
}

fn command_line(outcome: MatchOutcome) -> String {
    match outcome {
        MatchOutcome::Resolved(resolved) => resolved.command_line,
        other => panic!("expected a resolved command, got {other:?}"),
    }
}

/// Two chained sources: `db` counts its runs in `counter`, `url` reads
/// `db`'s output.
fn chained_config(dir: &TempDir, counter: &Path) -> Config {
    let path = write_config(
        dir,
        json!([
            {"type": "dynamic_dict", "name": "db",
             "command": format!("printf x >> '{}'; printf '[{{\"host\": \"db.local\"}}]'", counter.display()),
             "mapping": {"host": "host"}},
            {"type": "dynamic_dict", "name": "url",
             "command": "printf '[{\"url\": \"postgres://%s/app\"}]' $${db.host}",
             "mapping": {"url": "url"}},
            {"type": "command", "name": "Connect", "alias": "conn", "command": "psql $${url.url}"}
        ]),
    );
    load_config(&path, &process_env).unwrap()
}

#[test]
fn test_dependent_source_sees_fresh_dependency_output() {
    // --- Setup ---
    let dir = tempdir().unwrap();
    let counter = dir.path().join("db-runs");
    let cache_path = dir.path().join("cache.json");
    let config = chained_config(&dir, &counter);

    // --- Execute ---
    let rendered = command_line(invoke(&config, &cache_path, "conn").unwrap());

    // --- Assert ---
    assert_eq!(rendered, "psql postgres://db.local/app");
    assert_eq!(fs::read_to_string(&counter).unwrap(), "x");
    let store = open_store(&cache_path, &config);
    assert!(store.fresh("db", 300, unix_now()).is_some());
    assert!(store.fresh("url", 300, unix_now()).is_some());
}

#[test]
fn test_second_invocation_is_served_from_the_cache_until_cleared() {
    // --- Setup ---
    let dir = tempdir().unwrap();
    let counter = dir.path().join("db-runs");
    let cache_path = dir.path().join("cache.json");
    let config = chained_config(&dir, &counter);
    invoke(&config, &cache_path, "conn").unwrap();

    // --- Execute ---
    let cached = command_line(invoke(&config, &cache_path, "conn").unwrap());
    let runs_while_cached = fs::read_to_string(&counter).unwrap();

    let mut store = open_store(&cache_path, &config);
    assert_eq!(store.clear(ClearScope::Cache).unwrap(), 2);
    store.save().unwrap();
    let refreshed = command_line(invoke(&config, &cache_path, "conn").unwrap());

    // --- Assert ---
    assert_eq!(cached, "psql postgres://db.local/app");
    assert_eq!(runs_while_cached, "x");
    assert_eq!(refreshed, cached);
    assert_eq!(fs::read_to_string(&counter).unwrap(), "xx");
}

#[test]
fn test_cache_file_is_encrypted_at_rest() {
    let dir = tempdir().unwrap();
    let counter = dir.path().join("db-runs");
    let cache_path = dir.path().join("cache.json");
    let config = chained_config(&dir, &counter);

    invoke(&config, &cache_path, "conn").unwrap();

    let raw = fs::read_to_string(&cache_path).unwrap();
    let outer: Value = serde_json::from_str(&raw).unwrap();
    assert!(outer.get("_crypt").is_some_and(Value::is_string));
    assert!(!raw.contains("db.local"));
}

#[test]
fn test_list_mode_selects_a_record_from_command_output() {
    // --- Setup ---
    let dir = tempdir().unwrap();
    let path = write_config(
        &dir,
        json!([
            {"type": "dynamic_dict", "name": "servers",
             "command": "printf '[{\"n\": \"prod\", \"ip\": \"10.0.0.1\"}, {\"n\": \"staging\", \"ip\": \"10.0.0.2\"}]'",
             "mapping": {"name": "n", "host": "ip"}},
            {"type": "command", "name": "SSH", "alias": "ssh $${servers.name}",
             "command": "ssh $${servers.host}", "strict": true}
        ]),
    );
    let config = load_config(&path, &process_env).unwrap();
    let cache_path = dir.path().join("cache.json");

    // --- Execute ---
    let staging = command_line(invoke(&config, &cache_path, "ssh staging").unwrap());
    let rejected = invoke(&config, &cache_path, "ssh staging -v");

    // --- Assert ---
    assert_eq!(staging, "ssh 10.0.0.2");
    match rejected {
        Err(AliasError::UnknownArguments { tokens }) => assert_eq!(tokens, ["-v"]),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_slow_source_times_out() {
    // --- Setup ---
    let dir = tempdir().unwrap();
    let path = write_config(
        &dir,
        json!([
            {"type": "dynamic_dict", "name": "slow", "command": "sleep 5; printf '[]'",
             "mapping": {"v": "v"}, "timeout": 1}
        ]),
    );
    let config = load_config(&path, &process_env).unwrap();
    let mut store = CacheStore::empty(dir.path().join("cache.json"), cipher());
    let runner = ShellSourceRunner;
    let mut resolver = Resolver::new(&config, &mut store, &runner, token());

    // --- Execute ---
    let err = resolver.records("slow").unwrap_err();

    // --- Assert ---
    assert!(matches!(err, AliasError::Timeout { seconds: 1 }), "got {err:?}");
    assert_eq!(err.exit_code(), 124);
}

#[test]
fn test_cyclic_config_fails_validation_with_its_exit_code() {
    let dir = tempdir().unwrap();
    let path = write_config(
        &dir,
        json!([
            {"type": "dynamic_dict", "name": "a", "command": "echo $${b.v}", "mapping": {"v": "v"}},
            {"type": "dynamic_dict", "name": "b", "command": "echo $${a.v}", "mapping": {"v": "v"}}
        ]),
    );
    let config = load_config(&path, &process_env).unwrap();

    let err = validator::validate(&config).into_result().unwrap_err();

    assert_eq!(err.exit_code(), 2);
    match err {
        AliasError::Validation { findings } => {
            assert!(findings.iter().any(|f| f.message.contains("a -> b -> a")
                || f.message.contains("b -> a -> b")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_final_command_exit_status_is_propagated() {
    let err: AliasError = executor::execute_command("exit 7", None, &token())
        .unwrap_err()
        .into();

    assert!(matches!(err, AliasError::SubprocessExit { code: 7 }));
    assert_eq!(err.exit_code(), 7);
}

#[test]
fn test_cancelled_token_stops_before_spawning() {
    let cancelled: CancellationToken = Arc::new(AtomicBool::new(true));

    let err: AliasError = executor::execute_and_capture_output("printf never", None, &cancelled)
        .unwrap_err()
        .into();

    assert!(matches!(err, AliasError::Cancelled));
    assert_eq!(err.exit_code(), 130);
}
