//! Bridge configuration: TOML file + CLI overrides.

use anyhow::{bail, Context};
use conbridge_core::artifacts::DEFAULT_MAX_ARTIFACTS;
use conbridge_core::batcher::{DEFAULT_MAX_CHARS, DEFAULT_QUIET_PERIOD};
use conbridge_core::{BatchConfig, CommandSpec, SessionConfig, ShellConfig, ShellVariant};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub program: ProgramSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// `[telegram]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub operator_chat_id: i64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            operator_chat_id: 0,
            poll_timeout: default_poll_timeout(),
        }
    }
}

/// `[program]` section: the interactive program.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramSection {
    #[serde(default = "default_program")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for ProgramSection {
    fn default() -> Self {
        Self {
            command: default_program(),
            args: Vec::new(),
            label: default_label(),
        }
    }
}

/// `[shell]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default)]
    pub mode: ShellVariant,
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            mode: ShellVariant::default(),
            timeout_secs: default_shell_timeout(),
            shell: default_shell(),
        }
    }
}

/// `[artifacts]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
            extensions: default_extensions(),
            max_items: default_max_items(),
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    30
}
fn default_program() -> String {
    "/home/kali/airgeddon_tmux.sh".to_string()
}
fn default_label() -> String {
    "Airgeddon".to_string()
}
fn default_shell_timeout() -> u64 {
    conbridge_core::shell::DEFAULT_ONESHOT_TIMEOUT.as_secs()
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_artifacts_dir() -> String {
    "/root".to_string()
}
fn default_extensions() -> Vec<String> {
    ["cap", "pcap", "hccapx", "22000"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_items() -> usize {
    DEFAULT_MAX_ARTIFACTS
}
fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}
fn default_quiet_period_ms() -> u64 {
    DEFAULT_QUIET_PERIOD.as_millis() as u64
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bot_token: Option<String>,
    pub operator_chat_id: Option<i64>,
    pub program: Option<String>,
    pub program_label: Option<String>,
    pub shell_mode: Option<ShellVariant>,
    pub shell_timeout: Option<u64>,
    pub artifacts_dir: Option<String>,
}

/// Resolved bridge configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bot_token: String,
    pub operator_chat_id: i64,
    pub poll_timeout: u64,
    pub program: CommandSpec,
    pub program_label: String,
    pub shell: ShellConfig,
    pub artifacts_dir: PathBuf,
    pub extensions: Vec<String>,
    pub max_artifacts: usize,
    pub batch: BatchConfig,
}

impl BridgeConfig {
    /// Load config from TOML file, then apply CLI overrides and validate.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> anyhow::Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)
                        .with_context(|| format!("cannot read {}", expanded.display()))?;
                    toml::from_str::<ConfigFile>(&content)
                        .with_context(|| format!("config parse error in {}", expanded.display()))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::merge(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge(file: ConfigFile, cli: Overrides) -> Self {
        let command = cli.program.unwrap_or(file.program.command);
        let output = file.output;
        Self {
            bot_token: cli.bot_token.unwrap_or(file.telegram.bot_token),
            operator_chat_id: cli
                .operator_chat_id
                .unwrap_or(file.telegram.operator_chat_id),
            poll_timeout: file.telegram.poll_timeout,
            program: CommandSpec::new(expand_tilde_str(&command).to_string_lossy())
                .args(file.program.args),
            program_label: cli.program_label.unwrap_or(file.program.label),
            shell: ShellConfig {
                shell: file.shell.shell,
                variant: cli.shell_mode.unwrap_or(file.shell.mode),
                timeout: Duration::from_secs(cli.shell_timeout.unwrap_or(file.shell.timeout_secs)),
                max_chars: output.max_chars,
            },
            artifacts_dir: expand_tilde_str(&cli.artifacts_dir.unwrap_or(file.artifacts.dir)),
            extensions: file.artifacts.extensions,
            max_artifacts: file.artifacts.max_items,
            batch: BatchConfig {
                max_chars: output.max_chars,
                quiet_period: Duration::from_millis(output.quiet_period_ms),
            },
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("bot token is not set (use --bot-token, BOT_TOKEN or [telegram].bot_token)");
        }
        if self.operator_chat_id == 0 {
            bail!(
                "operator chat id is not set (use --operator-chat-id, ADMIN_CHAT_ID or [telegram].operator_chat_id)"
            );
        }
        if self.batch.max_chars == 0 {
            bail!("[output].max_chars must be greater than zero");
        }
        if self.shell.timeout.is_zero() {
            bail!("[shell].timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            operator_id: self.operator_chat_id,
            program: self.program.clone(),
            program_label: self.program_label.clone(),
            batch: self.batch,
            shell: self.shell.clone(),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
