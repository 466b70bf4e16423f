use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vox_agent_core::{AgentRetryConfig, DEFAULT_MAX_ITERATIONS};

use crate::error::AssistantError;
use crate::tools::ToolCategory;

const DEFAULT_HOME_DIR_NAME: &str = ".vox";
const DEFAULT_LOG_FILE_NAME: &str = "vox.log";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant. Keep spoken answers short and conversational.";
const DEFAULT_END_CONFIRMATION_PROMPT: &str = "대화를 종료할까요?";

/// Fully resolved assistant configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantConfig {
    pub agent: AgentSettings,
    pub session: SessionSettings,
    pub tools: ToolSettings,
    pub delegation: DelegationSettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub retry_attempts: usize,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry_attempts: 2,
            retry_initial_backoff_ms: 200,
            retry_max_backoff_ms: 2_000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentSettings {
    /// `retry_attempts` counts retries, the loop counts total attempts.
    pub fn retry_config(&self) -> AgentRetryConfig {
        AgentRetryConfig {
            max_attempts: self.retry_attempts.saturating_add(1),
            initial_backoff_ms: self.retry_initial_backoff_ms,
            max_backoff_ms: self.retry_max_backoff_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub end_phrases: Vec<String>,
    pub confirm_phrases: Vec<String>,
    pub decline_phrases: Vec<String>,
    pub end_confirmation_prompt: String,
    pub end_grace_ms: u64,
    pub idle_timeout_ms: u64,
    pub silence_timeout_ms: u64,
    pub continuous_listening: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            end_phrases: to_strings(&[
                "그만할게",
                "그만하자",
                "대화 종료",
                "끝낼게",
                "stop the conversation",
                "end the session",
                "goodbye",
                "that's all",
            ]),
            confirm_phrases: to_strings(&["네", "응", "예", "그래", "yes", "yeah", "sure", "ok"]),
            decline_phrases: to_strings(&["아니", "아니요", "no", "nope", "keep going"]),
            end_confirmation_prompt: DEFAULT_END_CONFIRMATION_PROMPT.to_string(),
            end_grace_ms: 8_000,
            idle_timeout_ms: 120_000,
            silence_timeout_ms: 1_500,
            continuous_listening: true,
        }
    }
}

impl SessionSettings {
    pub fn end_grace(&self) -> Duration {
        Duration::from_millis(self.end_grace_ms)
    }

    /// `None` when the idle timer is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingConfirmationPolicy {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub permissions: Vec<ToolCategory>,
    pub default_elevation_minutes: u64,
    pub missing_confirmation: MissingConfirmationPolicy,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            permissions: vec![ToolCategory::Safe],
            default_elevation_minutes: 10,
            missing_confirmation: MissingConfirmationPolicy::Allow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationSettings {
    pub enabled: bool,
    pub max_depth: u32,
    pub timeout_ms: u64,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 3,
            timeout_ms: 120_000,
        }
    }
}

impl DelegationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub file_path: PathBuf,
    pub level: String,
    pub stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: default_home_dir().join(DEFAULT_LOG_FILE_NAME),
            level: DEFAULT_LOG_LEVEL.to_string(),
            stdout: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlFile {
    #[serde(default)]
    agent: VoxTomlAgent,
    #[serde(default)]
    session: VoxTomlSession,
    #[serde(default)]
    tools: VoxTomlTools,
    #[serde(default)]
    delegation: VoxTomlDelegation,
    #[serde(default)]
    log: VoxTomlLog,
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlAgent {
    #[serde(default)]
    max_iterations: Option<usize>,
    #[serde(default)]
    retry_attempts: Option<usize>,
    #[serde(default)]
    retry_initial_backoff_ms: Option<u64>,
    #[serde(default)]
    retry_max_backoff_ms: Option<u64>,
    #[serde(default)]
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlSession {
    #[serde(default)]
    end_phrases: Option<Vec<String>>,
    #[serde(default)]
    confirm_phrases: Option<Vec<String>>,
    #[serde(default)]
    decline_phrases: Option<Vec<String>>,
    #[serde(default)]
    end_confirmation_prompt: Option<String>,
    #[serde(default)]
    end_grace_ms: Option<u64>,
    #[serde(default)]
    idle_timeout_ms: Option<u64>,
    #[serde(default)]
    silence_timeout_ms: Option<u64>,
    #[serde(default)]
    continuous_listening: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlTools {
    #[serde(default)]
    permissions: Option<Vec<ToolCategory>>,
    #[serde(default)]
    default_elevation_minutes: Option<u64>,
    #[serde(default)]
    missing_confirmation: Option<MissingConfirmationPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlDelegation {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    max_depth: Option<u32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VoxTomlLog {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    stdout: Option<bool>,
}

/// Reads `path` and resolves it; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AssistantConfig, AssistantError> {
    if !path.exists() {
        return Ok(AssistantConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|error| {
        AssistantError::Config(format!("read {} failed: {error}", path.display()))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<AssistantConfig, AssistantError> {
    let parsed: VoxTomlFile = toml::from_str(content)
        .map_err(|error| AssistantError::Config(format!("parse config failed: {error}")))?;
    let config = resolve_config(parsed);
    validate_config(&config)?;
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    default_home_dir().join("vox.toml")
}

fn resolve_config(parsed: VoxTomlFile) -> AssistantConfig {
    let defaults = AssistantConfig::default();
    let VoxTomlFile {
        agent,
        session,
        tools,
        delegation,
        log,
    } = parsed;

    AssistantConfig {
        agent: AgentSettings {
            max_iterations: agent.max_iterations.unwrap_or(defaults.agent.max_iterations),
            retry_attempts: agent.retry_attempts.unwrap_or(defaults.agent.retry_attempts),
            retry_initial_backoff_ms: agent
                .retry_initial_backoff_ms
                .unwrap_or(defaults.agent.retry_initial_backoff_ms),
            retry_max_backoff_ms: agent
                .retry_max_backoff_ms
                .unwrap_or(defaults.agent.retry_max_backoff_ms),
            system_prompt: non_empty(agent.system_prompt)
                .unwrap_or(defaults.agent.system_prompt),
        },
        session: SessionSettings {
            end_phrases: session.end_phrases.unwrap_or(defaults.session.end_phrases),
            confirm_phrases: session
                .confirm_phrases
                .unwrap_or(defaults.session.confirm_phrases),
            decline_phrases: session
                .decline_phrases
                .unwrap_or(defaults.session.decline_phrases),
            end_confirmation_prompt: non_empty(session.end_confirmation_prompt)
                .unwrap_or(defaults.session.end_confirmation_prompt),
            end_grace_ms: session.end_grace_ms.unwrap_or(defaults.session.end_grace_ms),
            idle_timeout_ms: session
                .idle_timeout_ms
                .unwrap_or(defaults.session.idle_timeout_ms),
            silence_timeout_ms: session
                .silence_timeout_ms
                .unwrap_or(defaults.session.silence_timeout_ms),
            continuous_listening: session
                .continuous_listening
                .unwrap_or(defaults.session.continuous_listening),
        },
        tools: ToolSettings {
            permissions: tools.permissions.unwrap_or(defaults.tools.permissions),
            default_elevation_minutes: tools
                .default_elevation_minutes
                .unwrap_or(defaults.tools.default_elevation_minutes),
            missing_confirmation: tools
                .missing_confirmation
                .unwrap_or(defaults.tools.missing_confirmation),
        },
        delegation: DelegationSettings {
            enabled: delegation.enabled.unwrap_or(defaults.delegation.enabled),
            max_depth: delegation.max_depth.unwrap_or(defaults.delegation.max_depth),
            timeout_ms: delegation.timeout_ms.unwrap_or(defaults.delegation.timeout_ms),
        },
        log: LogConfig {
            file_path: non_empty(log.file)
                .map(|value| expand_home_path(&value))
                .unwrap_or(defaults.log.file_path),
            level: non_empty(log.level).unwrap_or(defaults.log.level),
            stdout: log.stdout.unwrap_or(defaults.log.stdout),
        },
    }
}

fn validate_config(config: &AssistantConfig) -> Result<(), AssistantError> {
    if config.agent.max_iterations == 0 {
        return Err(AssistantError::Config(
            "agent.max_iterations must be greater than 0".to_string(),
        ));
    }
    if config.delegation.max_depth == 0 {
        return Err(AssistantError::Config(
            "delegation.max_depth must be greater than 0".to_string(),
        ));
    }
    for (key, phrases) in [
        ("session.end_phrases", &config.session.end_phrases),
        ("session.confirm_phrases", &config.session.confirm_phrases),
        ("session.decline_phrases", &config.session.decline_phrases),
    ] {
        if phrases.iter().all(|phrase| phrase.trim().is_empty()) {
            return Err(AssistantError::Config(format!("{key} cannot be empty")));
        }
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn default_home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(DEFAULT_HOME_DIR_NAME)
}

fn expand_home_path(path: &str) -> PathBuf {
    if path == "~" {
        return PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_resolves_to_defaults() {
        let config = parse_config("").expect("empty config should parse");
        assert_eq!(config, AssistantConfig::default());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.tools.permissions, vec![ToolCategory::Safe]);
        assert_eq!(
            config.tools.missing_confirmation,
            MissingConfirmationPolicy::Allow
        );
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = parse_config(
            r#"
[agent]
max_iterations = 4
retry_attempts = 0

[session]
idle_timeout_ms = 0
end_phrases = ["bye"]

[tools]
permissions = ["safe", "sensitive"]
missing_confirmation = "deny"

[delegation]
enabled = false
max_depth = 2

[log]
level = "debug"
file = "/tmp/vox-test.log"
"#,
        )
        .expect("config should parse");

        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.retry_config().max_attempts, 1);
        assert_eq!(config.agent.retry_initial_backoff_ms, 200);
        assert_eq!(config.session.idle_timeout(), None);
        assert_eq!(config.session.end_phrases, vec!["bye".to_string()]);
        assert!(!config.session.confirm_phrases.is_empty());
        assert_eq!(
            config.tools.permissions,
            vec![ToolCategory::Safe, ToolCategory::Sensitive]
        );
        assert_eq!(
            config.tools.missing_confirmation,
            MissingConfirmationPolicy::Deny
        );
        assert!(!config.delegation.enabled);
        assert_eq!(config.delegation.max_depth, 2);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.file_path, PathBuf::from("/tmp/vox-test.log"));
    }

    #[test]
    fn zero_max_iterations_is_rejected() {
        let error = parse_config("[agent]\nmax_iterations = 0\n").expect_err("should reject");
        assert!(error.to_string().contains("agent.max_iterations"));
    }

    #[test]
    fn empty_phrase_list_is_rejected() {
        let error =
            parse_config("[session]\nconfirm_phrases = []\n").expect_err("should reject");
        assert!(error.to_string().contains("session.confirm_phrases"));
    }

    #[test]
    fn unknown_permission_category_fails_to_parse() {
        let error =
            parse_config("[tools]\npermissions = [\"root\"]\n").expect_err("should reject");
        assert!(error.to_string().contains("parse config failed"));
    }
}
