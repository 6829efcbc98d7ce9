//! Child-process environment handling.
//!
//! The [`Environment`] owns everything a spawned command inherits: the
//! environment-variable mapping, the working directory, and the sensitivity
//! channel. It is the single process-spawning seam of the engine; actions
//! hand it an argv or a shell string and get back an exit status.
//!
//! # The sensitivity channel
//!
//! The `STRIDE_SENSITIVE` environment variable holds a separator-joined list
//! of environment-variable names whose values must not be shown, so that
//! spawned processes can self-censor. It is kept in sync with the sensitive
//! set at all times and is additive only: names present in the host
//! process's own `STRIDE_SENSITIVE` at startup stay sensitive for the whole
//! run, and ordinary set/unset paths refuse to touch the channel itself.

use crate::error::{Result, StrideError};
use crate::sensitive::SensitiveMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Name of the sensitivity channel environment variable.
pub const SENSITIVE_CHANNEL: &str = "STRIDE_SENSITIVE";

/// Separator used when joining names into the channel value.
#[cfg(windows)]
const CHANNEL_SEP: char = ';';
#[cfg(not(windows))]
const CHANNEL_SEP: char = ':';

/// Canonicalize a path relative to a working directory. The path, if not
/// absolute, is interpreted relative to the working directory, then
/// normalized lexically (`.` and `..` components resolved without touching
/// the filesystem).
pub fn canonicalize_path(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The calling environment for child processes.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: SensitiveMap<String>,
    cwd: PathBuf,
}

impl Environment {
    /// Create an environment from the host process's own environment. Names
    /// listed in the host's `STRIDE_SENSITIVE` are sensitive from the start.
    pub fn from_host(cwd: Option<&Path>) -> Result<Self> {
        let base = std::env::current_dir()?;
        let cwd = match cwd {
            Some(dir) => canonicalize_path(&base, dir),
            None => base,
        };
        Ok(Self::from_parts(std::env::vars(), cwd))
    }

    /// Create an environment from explicit parts. Used by `from_host` and by
    /// tests that must not depend on the process environment.
    pub fn from_parts(environ: impl IntoIterator<Item = (String, String)>, cwd: PathBuf) -> Self {
        let mut env = Self {
            vars: environ.into_iter().collect(),
            cwd,
        };
        if let Some(listed) = env.vars.get(SENSITIVE_CHANNEL).cloned() {
            for name in listed.split(CHANNEL_SEP).filter(|n| !n.is_empty()) {
                env.vars.declare_sensitive(name);
            }
        }
        env.sync_channel();
        env
    }

    /// Look up a variable's real value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Set a variable. Setting the sensitivity channel directly is refused.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        if name == SENSITIVE_CHANNEL {
            tracing::warn!("ignoring attempt to set {} directly", SENSITIVE_CHANNEL);
            return;
        }
        self.vars.set(name, value.into());
    }

    /// Remove a variable's value. Its sensitivity flag, if any, survives.
    /// Unsetting the sensitivity channel is refused.
    pub fn unset(&mut self, name: &str) {
        if name == SENSITIVE_CHANNEL {
            tracing::warn!("ignoring attempt to unset {} directly", SENSITIVE_CHANNEL);
            return;
        }
        self.vars.remove(name);
    }

    /// Flag a variable as sensitive and reflect it into the channel.
    pub fn declare_sensitive(&mut self, name: &str) {
        self.vars.declare_sensitive(name);
        self.sync_channel();
    }

    /// Whether a variable is flagged sensitive.
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.vars.is_sensitive(name)
    }

    /// Render the environment for display, masking sensitive values.
    pub fn masked(&self) -> Vec<(String, String)> {
        self.vars.masked()
    }

    /// The working directory child processes run in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Change the working directory. Relative paths are interpreted against
    /// the current working directory.
    pub fn set_cwd(&mut self, path: &Path) {
        self.cwd = canonicalize_path(&self.cwd, path);
    }

    /// The exact variable mapping a child process receives, channel included.
    pub fn child_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Execute an argv directly, blocking until it exits.
    pub fn spawn(&self, argv: &[String]) -> Result<Option<i32>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StrideError::config("empty command", None))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.run(cmd, &argv.join(" "))
    }

    /// Execute a command line through the platform shell, blocking until it
    /// exits.
    pub fn shell(&self, command: &str) -> Result<Option<i32>> {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        cmd.arg(command);
        self.run(cmd, command)
    }

    fn run(&self, mut cmd: Command, displayed: &str) -> Result<Option<i32>> {
        cmd.env_clear();
        cmd.envs(self.child_env());
        cmd.current_dir(&self.cwd);

        tracing::debug!(command = displayed, cwd = %self.cwd.display(), "spawning");

        let status = cmd.status().map_err(|e| StrideError::Spawn {
            command: displayed.to_string(),
            message: e.to_string(),
        })?;
        Ok(status.code())
    }

    fn sync_channel(&mut self) {
        let listed: Vec<&str> = self.vars.sensitive_names().collect();
        let value = listed.join(&CHANNEL_SEP.to_string());
        // Direct write; the public set() refuses the channel name.
        self.vars.set(SENSITIVE_CHANNEL, value);
    }
}
