//! Shell command tool
//!
//! A single-process launcher, not a shell programming surface: chaining and
//! redirection constructs are rejected outright, and only allowlisted base
//! commands (or declared external tools) may run. Multi-command workflows
//! are expressed as multiple plan steps instead.

use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::config::{Settings, expand_path};
use crate::external::ExternalTool;

use super::traits::require_str;
use super::{Tool, ToolArgs, ToolError};

/// Deadline for a single command
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shell operators that could chain commands or redirect streams
const DISALLOWED_PATTERNS: [&str; 9] = ["&&", "||", ";", "|", "`", "$(", "${", ">", "<"];

/// Callback invoked with the exact command text before spawning
///
/// The bool flag is true when the command is a schema-discovery help fetch.
pub type CommandObserver = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Executes allowlisted shell commands
pub struct ShellTool {
    settings: Arc<Settings>,
    external_tools: Vec<ExternalTool>,
    observer: RwLock<Option<CommandObserver>>,
    timeout: Duration,
}

impl ShellTool {
    /// Create a new shell tool
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_external_tools(settings, Vec::new())
    }

    /// Create a shell tool with external tool declarations
    pub fn with_external_tools(settings: Arc<Settings>, external_tools: Vec<ExternalTool>) -> Self {
        Self {
            settings,
            external_tools,
            observer: RwLock::new(None),
            timeout: SHELL_TIMEOUT,
        }
    }

    /// Override the command deadline (tests)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mount an observer that sees every command before it runs
    pub fn set_observer(&self, observer: CommandObserver) {
        if let Ok(mut guard) = self.observer.write() {
            *guard = Some(observer);
        }
    }

    /// Remove the mounted observer
    pub fn clear_observer(&self) {
        if let Ok(mut guard) = self.observer.write() {
            *guard = None;
        }
    }

    fn notify_observer(&self, command: &str) {
        let observer = self.observer.read().ok().and_then(|guard| guard.clone());
        if let Some(observer) = observer {
            observer(command, false);
        }
    }

    /// Validate a command against the metacharacter gate and the allowlist
    fn validate_command(&self, command: &str) -> Result<(), ToolError> {
        for pattern in DISALLOWED_PATTERNS {
            if command.contains(pattern) {
                return Err(ToolError::DisallowedPattern { pattern });
            }
        }

        let Some(base) = command.split_whitespace().next() else {
            return Err(ToolError::InvalidArgument("empty command".to_string()));
        };

        if self.settings.is_command_allowed(base) || self.find_external(base).is_some() {
            return Ok(());
        }

        Err(ToolError::NotInAllowlist {
            command: base.to_string(),
            allowed: self.settings.tools.shell.allowlist.join(", "),
        })
    }

    fn find_external(&self, base: &str) -> Option<&ExternalTool> {
        self.external_tools
            .iter()
            .find(|ext| ext.access.kind == "shell" && ext.access.command == base)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> String {
        let mut allowed: Vec<&str> = self.settings.tools.shell.allowlist.iter().map(String::as_str).collect();
        allowed.extend(
            self.external_tools
                .iter()
                .filter(|ext| ext.access.kind == "shell")
                .map(|ext| ext.access.command.as_str()),
        );

        format!(
            "Execute a shell command. Only commands from the allowlist are permitted: {}",
            allowed.join(", ")
        )
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let command = require_str(args, "command")?;
        self.validate_command(command)?;
        self.notify_observer(command);

        debug!(%command, "execute: spawning command");
        let external = self.find_external(command.split_whitespace().next().unwrap_or_default());
        run_command(command, external, self.timeout).await
    }
}

/// Spawn `sh -c <command>` and collect merged output under a deadline
///
/// Stdout and stderr are read incrementally so the timeout path can return
/// whatever was accumulated before the child was killed.
async fn run_command(command: &str, external: Option<&ExternalTool>, timeout: Duration) -> Result<String, ToolError> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ext) = external {
        if let Some(workdir) = &ext.access.workdir {
            cmd.current_dir(expand_path(workdir));
        }
        if let Some(env) = &ext.env {
            if !env.is_empty() {
                cmd.env_clear();
                for name in &env.propagate {
                    if let Ok(value) = std::env::var(name) {
                        cmd.env(name, value);
                    }
                }
                for (name, value) in &env.set {
                    cmd.env(name, value);
                }
            }
        }
    }

    let mut child = cmd.spawn()?;
    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            let output = merge_output(
                &stdout_task.await.unwrap_or_default(),
                &stderr_task.await.unwrap_or_default(),
            );

            if status.success() {
                Ok(output)
            } else {
                Err(ToolError::CommandFailed {
                    code: status.code().unwrap_or(-1),
                    output,
                })
            }
        }
        Err(_) => {
            warn!(%command, "run_command: deadline exceeded, killing child");
            let _ = child.start_kill();
            let _ = child.wait().await;
            let output = merge_output(
                &stdout_task.await.unwrap_or_default(),
                &stderr_task.await.unwrap_or_default(),
            );

            Err(ToolError::Timeout {
                timeout_secs: timeout.as_secs(),
                output,
            })
        }
    }
}

/// Merge captured streams: stdout first, newline separator, stderr if non-empty
pub(crate) fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(stderr));
    }
    output
}
