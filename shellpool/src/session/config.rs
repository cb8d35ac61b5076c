// Pool configuration
// Defaults suit interactive use; every knob can be overridden from the environment

use crate::session::activity::{BUILDING_COOLDOWN, SETTLED_COOLDOWN};
use std::time::Duration;
use tracing::warn;

/// How long a command may run before its handle rejects
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(30_000);

/// PTY size for spawned shells (columns x rows)
pub const DEFAULT_PTY_COLS: u16 = 200;
pub const DEFAULT_PTY_ROWS: u16 = 24;

/// Settings shared by the pool and the terminals it spawns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Time budget for one command, measured from submission
    pub command_timeout: Duration,
    /// Hot window after a build-phase line
    pub building_cooldown: Duration,
    /// Hot window after any other line
    pub settled_cooldown: Duration,
    /// Shell program and arguments
    pub shell: Vec<String>,
    pub pty_cols: u16,
    pub pty_rows: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            building_cooldown: BUILDING_COOLDOWN,
            settled_cooldown: SETTLED_COOLDOWN,
            shell: Self::default_shell(),
            pty_cols: DEFAULT_PTY_COLS,
            pty_rows: DEFAULT_PTY_ROWS,
        }
    }
}

impl PoolConfig {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(timeout) = millis_var(&lookup, "SHELLPOOL_TIMEOUT_MS") {
            config.command_timeout = timeout;
        }
        if let Some(cooldown) = millis_var(&lookup, "SHELLPOOL_BUILD_COOLDOWN_MS") {
            config.building_cooldown = cooldown;
        }
        if let Some(cooldown) = millis_var(&lookup, "SHELLPOOL_IDLE_COOLDOWN_MS") {
            config.settled_cooldown = cooldown;
        }
        if let Some(shell) = lookup("SHELLPOOL_SHELL") {
            let args: Vec<String> = shell.split_whitespace().map(str::to_string).collect();
            if args.is_empty() {
                warn!("ignoring empty SHELLPOOL_SHELL");
            } else {
                config.shell = args;
            }
        }

        config
    }

    /// Get the default shell to use for sessions
    pub fn default_shell() -> Vec<String> {
        match std::env::var("SHELL") {
            Ok(shell) if !shell.trim().is_empty() => vec![shell],
            _ => vec!["/bin/sh".to_string()],
        }
    }
}

fn millis_var<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %raw, "ignoring invalid duration");
            None
        }
    }
}
