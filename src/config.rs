//! Configuration management for fixbuild
//!
//! Read from a TOML file (`--config`, `$FIXBUILD_CONFIG`, or
//! `~/.config/fixbuild/config.toml`). Every field has a default, so an empty
//! file or no file at all yields a working service.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder in agent arguments replaced by the fix instruction.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub git: GitConfig,
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Pipelines allowed to run at once; further requests queue.
    pub max_concurrent_fixes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            max_concurrent_fixes: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Base URL of the hosting provider; the clone URL is
    /// `<host>/<owner>/<name>.git` with the token as userinfo.
    pub host: String,
    /// Fixed shallow depth. A target commit deeper than this makes the reset fail.
    pub clone_depth: u32,
    pub author_name: String,
    pub author_email: String,
    pub clone_timeout_secs: u64,
    pub checkout_timeout_secs: u64,
    pub reset_timeout_secs: u64,
    pub add_timeout_secs: u64,
    pub commit_timeout_secs: u64,
    pub rev_parse_timeout_secs: u64,
    pub push_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            host: "https://github.com".to_string(),
            clone_depth: 50,
            author_name: "fixbuild".to_string(),
            author_email: "fixbuild@localhost".to_string(),
            clone_timeout_secs: 15 * 60,
            checkout_timeout_secs: 30,
            reset_timeout_secs: 30,
            add_timeout_secs: 30,
            commit_timeout_secs: 30,
            rev_parse_timeout_secs: 10,
            push_timeout_secs: 60,
        }
    }
}

impl GitConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn add_timeout(&self) -> Duration {
        Duration::from_secs(self.add_timeout_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }

    pub fn rev_parse_timeout(&self) -> Duration {
        Duration::from_secs(self.rev_parse_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

/// How to drive the fixing agent. The agent itself is a black box; only its
/// command line is known here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub describe_args: Vec<String>,
    pub apply_args: Vec<String>,
    /// Deadline for each phase, sized for agent reasoning plus a build/test run.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "plandex".to_string(),
            describe_args: vec![
                "tell".to_string(),
                PROMPT_PLACEHOLDER.to_string(),
                "--skip-menu".to_string(),
            ],
            apply_args: vec!["build".to_string(), "--skip-menu".to_string()],
            timeout_secs: 15 * 60,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for per-request workspaces; the system temp dir when unset.
    pub root: Option<PathBuf>,
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "fixbuild-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub output_drain_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_drain_grace_ms: 2_000,
        }
    }
}

impl RunnerConfig {
    pub fn output_drain_grace(&self) -> Duration {
        Duration::from_millis(self.output_drain_grace_ms)
    }
}

impl Config {
    /// Default config file location, if a config dir exists on this platform.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fixbuild").join("config.toml"))
    }

    /// Load from an explicit path, else the default path if present, else defaults.
    ///
    /// An explicit path must exist; a missing default file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config '{}'", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.max_concurrent_fixes == 0 {
            return Err(anyhow!("server.max_concurrent_fixes must be at least 1"));
        }
        if self.git.host.trim().is_empty() {
            return Err(anyhow!("git.host must not be empty"));
        }
        if self.git.clone_depth == 0 {
            return Err(anyhow!("git.clone_depth must be at least 1"));
        }
        let timeouts = [
            ("git.clone_timeout_secs", self.git.clone_timeout_secs),
            ("git.checkout_timeout_secs", self.git.checkout_timeout_secs),
            ("git.reset_timeout_secs", self.git.reset_timeout_secs),
            ("git.add_timeout_secs", self.git.add_timeout_secs),
            ("git.commit_timeout_secs", self.git.commit_timeout_secs),
            ("git.rev_parse_timeout_secs", self.git.rev_parse_timeout_secs),
            ("git.push_timeout_secs", self.git.push_timeout_secs),
            ("agent.timeout_secs", self.agent.timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(anyhow!("{} must be greater than zero", name));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must not be empty"));
        }
        if self.workspace.prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(anyhow!(
                "workspace.prefix '{}' must not contain a path separator",
                self.workspace.prefix
            ));
        }
        Ok(())
    }
}
