use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{hlog_debug, Error, Result};

/// Default maximum number of concurrently running agent workers.
pub const DEFAULT_MAX_AGENTS: usize = 3;

/// Default per-subtask timeout in seconds (30 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub worktree_dir: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub max_agents: Option<usize>,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

impl Config {
    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    pub fn plans_dir() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("plans"))
    }

    pub fn worktrees_dir() -> Result<PathBuf> {
        let config = Self::load()?;
        match config.worktree_dir {
            Some(dir) => Ok(expand_tilde(&dir)),
            None => Ok(Self::hive_dir()?.join("worktrees")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn effective_max_agents(&self) -> usize {
        self.max_agents.unwrap_or(DEFAULT_MAX_AGENTS)
    }

    pub fn effective_task_timeout_secs(&self) -> u64 {
        self.task_timeout_secs.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        hlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            hlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        hlog_debug!(
            "Config loaded: worktree_dir={:?}, command={:?}, max_agents={:?}",
            config.worktree_dir,
            config.command,
            config.max_agents
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        hlog_debug!("Config::save hive_dir={}", hive_dir.display());
        if !hive_dir.exists() {
            hlog_debug!("Creating hive directory");
            fs::create_dir_all(&hive_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        hlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        let plans_dir = Self::plans_dir()?;
        let worktrees_dir = Self::worktrees_dir()?;
        hlog_debug!(
            "Config::ensure_dirs hive={} plans={} worktrees={}",
            hive_dir.display(),
            plans_dir.display(),
            worktrees_dir.display()
        );
        for dir in [&hive_dir, &plans_dir, &worktrees_dir] {
            if !dir.exists() {
                hlog_debug!("Creating directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
