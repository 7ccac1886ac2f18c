//! Global configuration.
//!
//! Loaded from ~/.config/shellpilot/shellpilot.yml or .shellpilot.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shellpilot::agent::{AgentConfig, DEFAULT_MAX_ITERATIONS};
use shellpilot::domain::{ConnectionDescriptor, Target};
use shellpilot::executor::{DEFAULT_MAX_OUTPUT_BYTES, ExecutorOptions};
use shellpilot::llm::AnthropicConfig;

/// Global configuration for shellpilot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Reasoning service settings.
    pub llm: LlmConfig,

    /// Agent loop and executor limits.
    pub engine: EngineConfig,

    /// Named connections. The map key becomes the connection id.
    pub connections: BTreeMap<String, Target>,

    /// Command history settings.
    pub history: HistoryConfig,

    /// Knowledge base backing retrieval.
    pub knowledge: KnowledgeConfig,
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .shellpilot.yml in current directory
    /// 3. ~/.config/shellpilot/shellpilot.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".shellpilot.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .shellpilot.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .shellpilot.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("shellpilot").join("shellpilot.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            eyre::bail!("engine.max-iterations must be > 0");
        }
        if self.engine.command_timeout_ms == 0 {
            eyre::bail!("engine.command-timeout-ms must be > 0");
        }
        if self.engine.connect_timeout_ms == 0 {
            eyre::bail!("engine.connect-timeout-ms must be > 0");
        }
        if self.llm.timeout_ms == 0 {
            eyre::bail!("llm.timeout-ms must be > 0");
        }
        Ok(())
    }

    /// Descriptor for the named connection.
    ///
    /// `local` resolves to the host even when not configured.
    pub fn connection(&self, name: &str) -> Result<ConnectionDescriptor> {
        match self.connections.get(name) {
            Some(target) => Ok(ConnectionDescriptor::new(name, target.clone())),
            None if name == "local" => Ok(ConnectionDescriptor::local(name)),
            None => {
                let known: Vec<&str> = self.connections.keys().map(String::as_str).collect();
                eyre::bail!("Unknown connection '{}' (configured: {})", name, known.join(", "))
            }
        }
    }

    /// All configured connections, sorted by name.
    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.connections
            .iter()
            .map(|(name, target)| ConnectionDescriptor::new(name.clone(), target.clone()))
            .collect()
    }

    pub fn anthropic_config(&self) -> AnthropicConfig {
        let mut config = AnthropicConfig::with_model(self.llm.model.clone());
        config.max_tokens = self.llm.max_tokens;
        config.timeout = Duration::from_millis(self.llm.timeout_ms);
        config.api_key_env = self.llm.api_key_env.clone();
        if let Some(base_url) = &self.llm.base_url {
            config.base_url = base_url.clone();
        }
        config
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            command_timeout: Duration::from_millis(self.engine.command_timeout_ms),
            connect_timeout: Duration::from_millis(self.engine.connect_timeout_ms),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.engine.max_iterations,
            output_truncate_chars: self.engine.output_truncate_chars,
            retrieval_limit: self.engine.retrieval_limit,
            require_command_for_unverifiable: self.engine.require_command_for_unverifiable,
        }
    }
}

/// Reasoning service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,

    /// Timeout per call in milliseconds.
    pub timeout_ms: u64,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let defaults = AnthropicConfig::default();
        Self {
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            timeout_ms: 300_000, // 5 minutes
            api_key_env: defaults.api_key_env,
            base_url: None,
        }
    }
}

/// Agent loop and executor limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,

    /// Characters of each prior output shown to the planner.
    pub output_truncate_chars: usize,

    pub retrieval_limit: usize,
    pub require_command_for_unverifiable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            command_timeout_ms: 300_000,
            connect_timeout_ms: 60_000,
            output_truncate_chars: 2000,
            retrieval_limit: 3,
            require_command_for_unverifiable: true,
        }
    }
}

/// Command history settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,

    /// Defaults to ~/.local/share/shellpilot/history
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shellpilot")
                .join("history")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// YAML list of `{title, content, commands, keywords}` entries.
    pub path: Option<PathBuf>,
}
