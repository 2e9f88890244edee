//! Harness configuration stored in `harness.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Harness configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory under which per-session workspaces are created.
    pub workspace_base: PathBuf,

    /// Prefix for generated workspace directory names.
    pub workspace_prefix: String,

    /// Keep workspaces on disk after the session ends.
    pub preserve_workspaces: bool,

    /// Seconds to wait for a stopped agent process before killing it.
    pub shutdown_grace_secs: u64,

    /// Keep at most this many bytes of agent stderr for error context.
    pub stderr_tail_limit_bytes: usize,

    pub agent: AgentConfig,
}

/// How to launch the agent CLI under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI binary (e.g. `["copilot"]` or `["npx", "copilot"]`).
    pub command: Vec<String>,

    /// Extra flags appended to every launch.
    pub extra_args: Vec<String>,

    /// Model the agent is pinned to, so runs are comparable.
    pub model: String,

    /// Run without confirmation prompts.
    pub unattended: bool,

    /// Directory of skill definitions exposed to the agent, if any.
    pub skill_dir: Option<PathBuf>,

    /// Path to a tool allow/deny configuration file, if any.
    pub tool_config: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["copilot".to_string()],
            extra_args: Vec::new(),
            model: "claude-sonnet-4".to_string(),
            unattended: true,
            skill_dir: None,
            tool_config: None,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workspace_base: std::env::temp_dir().join("agent-harness"),
            workspace_prefix: "session".to_string(),
            preserve_workspaces: false,
            shutdown_grace_secs: 10,
            stderr_tail_limit_bytes: 16 * 1024,
            agent: AgentConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_prefix.trim().is_empty() {
            return Err(anyhow!("workspace_prefix must be non-empty"));
        }
        if self.shutdown_grace_secs == 0 {
            return Err(anyhow!("shutdown_grace_secs must be > 0"));
        }
        if self.stderr_tail_limit_bytes == 0 {
            return Err(anyhow!("stderr_tail_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.model.trim().is_empty() {
            return Err(anyhow!("agent.model must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
