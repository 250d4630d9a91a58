//! Layered configuration tests: defaults, YAML file, env overrides.

use std::collections::HashMap;
use std::path::PathBuf;

use kira::config::KiraConfig;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults_are_sensible() {
    let config = KiraConfig::default();
    assert_eq!(config.vault.path, PathBuf::from("vault"));
    assert_eq!(config.core.timezone, "UTC");
    assert_eq!(config.agent.max_tool_calls, 10);
    assert_eq!(config.agent.timeout_secs, 60);
    assert_eq!(config.memory.max_exchanges, 10);
    assert_eq!(config.memory.session_ttl_secs, 3600);
    assert_eq!(config.memory.max_sessions, 1000);
    assert!(config.router.enable_local_fallback);
    assert!(config.http.enabled);
}

#[test]
fn yaml_file_overrides_defaults() {
    let config = KiraConfig::from_yaml(
        "vault:\n  path: /srv/vault\ncore:\n  timezone: Europe/Moscow\nagent:\n  max_tool_calls: 5\nrouter:\n  default_provider: ollama\n",
    )
    .expect("parse");

    assert_eq!(config.vault.path, PathBuf::from("/srv/vault"));
    assert_eq!(config.core.timezone, "Europe/Moscow");
    assert_eq!(config.agent.max_tool_calls, 5);
    assert_eq!(config.router.default_provider, "ollama");
    // Untouched sections keep their defaults.
    assert_eq!(config.memory.max_exchanges, 10);
}

#[test]
fn env_overrides_file_values() {
    let mut config =
        KiraConfig::from_yaml("core:\n  timezone: Europe/Moscow\n").expect("parse");
    config.apply_overrides(env_from(&[
        ("KIRA_TIMEZONE", "America/New_York"),
        ("KIRA_VAULT_PATH", "/tmp/v"),
        ("KIRA_MAX_TOOL_CALLS", "3"),
        ("KIRA_ENABLE_LOCAL_FALLBACK", "false"),
    ]));

    assert_eq!(config.core.timezone, "America/New_York");
    assert_eq!(config.vault.path, PathBuf::from("/tmp/v"));
    assert_eq!(config.agent.max_tool_calls, 3);
    assert!(!config.router.enable_local_fallback);
}

#[test]
fn provider_env_vars_create_providers() {
    let mut config = KiraConfig::default();
    assert!(config.router.anthropic.is_none());

    config.apply_overrides(env_from(&[
        ("KIRA_ANTHROPIC_API_KEY", "sk-test"),
        ("KIRA_OPENAI_API_KEY", "sk-other"),
        ("KIRA_OPENAI_MODEL", "gpt-4o-mini"),
    ]));

    let anthropic = config.router.anthropic.expect("anthropic configured");
    assert_eq!(anthropic.api_key, "sk-test");
    assert!(!anthropic.model.is_empty());
    let openai = config.router.openai.expect("openai configured");
    assert_eq!(openai.model, "gpt-4o-mini");
}

#[test]
fn invalid_numeric_env_values_are_ignored() {
    let mut config = KiraConfig::default();
    config.apply_overrides(env_from(&[("KIRA_MAX_TOOL_CALLS", "lots")]));
    assert_eq!(config.agent.max_tool_calls, 10);
}

#[test]
fn malformed_yaml_is_an_error() {
    assert!(KiraConfig::from_yaml("vault: [not, a, mapping").is_err());
}

#[test]
fn explicit_data_dir_wins() {
    let mut config = KiraConfig::default();
    config.apply_overrides(env_from(&[("KIRA_DATA_DIR", "/var/lib/kira")]));
    assert_eq!(config.data_dir(), PathBuf::from("/var/lib/kira"));
}
