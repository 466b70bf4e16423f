use std::fs;

use tempfile::tempdir;
use vox_assistant::{AssistantConfig, LogConfig, init_tracing, load_config};

#[test]
fn missing_config_file_uses_defaults() {
    let dir = tempdir().expect("tempdir");
    let config = load_config(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(config, AssistantConfig::default());
}

#[test]
fn config_file_is_loaded_from_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("vox.toml");
    fs::write(
        &path,
        "[session]\nend_grace_ms = 2500\ncontinuous_listening = false\n",
    )
    .expect("write config");

    let config = load_config(&path).expect("config should load");

    assert_eq!(config.session.end_grace_ms, 2500);
    assert!(!config.session.continuous_listening);
    assert_eq!(config.agent, AssistantConfig::default().agent);
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("vox.toml");
    fs::write(&path, "[delegation]\nmax_depth = \"deep\"\n").expect("write config");

    let error = load_config(&path).expect_err("wrong type should fail");
    assert!(error.to_string().contains("parse config failed"));
}

#[test]
fn tracing_writes_to_configured_file() {
    let dir = tempdir().expect("tempdir");
    let file_path = dir.path().join("logs").join("vox.log");
    let guard = init_tracing(&LogConfig {
        file_path: file_path.clone(),
        level: "info".to_string(),
        stdout: false,
    })
    .expect("first init should install the subscriber");

    tracing::info!(target: "vox_assistant", "assistant started");
    drop(guard);

    let content = fs::read_to_string(&file_path).expect("log file should exist");
    assert!(content.contains("assistant started"));

    assert!(init_tracing(&LogConfig {
        file_path,
        level: "info".to_string(),
        stdout: false,
    })
    .is_none());
}
