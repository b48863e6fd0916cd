//! External tool declarations
//!
//! Users can declare specialized shell-accessible tools under
//! `<config>/tools/<name>/<name>.yaml`. Declarations extend the shell
//! allowlist, describe the tool to the planner, and optionally pin the
//! child-process environment.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A tool declared in the user's tools directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    #[serde(default)]
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub when_to_use: String,
    pub access: ToolAccess,
    #[serde(default)]
    pub check: ToolCheck,
    #[serde(default)]
    pub env: Option<ToolEnv>,
}

/// How to access/invoke the tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAccess {
    /// Access type; only "shell" is supported
    #[serde(rename = "type")]
    pub kind: String,

    /// Base command for shell access
    pub command: String,

    #[serde(default)]
    pub workdir: Option<String>,

    #[serde(default)]
    pub details: Option<String>,
}

/// How to verify the tool is available
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCheck {
    #[serde(default)]
    pub command: String,

    /// Expected substring in the check output
    #[serde(default)]
    pub expected: Option<String>,
}

/// Environment for the tool's child process
///
/// An empty declaration means full inheritance from the daemon process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolEnv {
    /// Parent variables to propagate by name
    #[serde(default)]
    pub propagate: Vec<String>,

    /// Explicit key/value pairs
    #[serde(default)]
    pub set: BTreeMap<String, String>,
}

impl ToolEnv {
    pub fn is_empty(&self) -> bool {
        self.propagate.is_empty() && self.set.is_empty()
    }
}

impl ExternalTool {
    /// Check if the tool declaration is valid
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(eyre!("tool name is required"));
        }
        if self.description.is_empty() {
            return Err(eyre!("tool description is required"));
        }
        if self.access.kind != "shell" {
            return Err(eyre!("unsupported access type: {:?}", self.access.kind));
        }
        if self.access.command.is_empty() {
            return Err(eyre!("access command is required for shell tools"));
        }
        Ok(())
    }

    /// Run the declared check command and verify the tool is usable
    ///
    /// Returns false when no check command is declared, when the check exits
    /// non-zero, or when the expected substring is absent from the output.
    pub async fn check_available(&self) -> bool {
        if self.check.command.is_empty() {
            return false;
        }

        let result = tokio::time::timeout(
            CHECK_TIMEOUT,
            tokio::process::Command::new("sh").arg("-c").arg(&self.check.command).output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(tool = %self.name, error = %e, "check_available: spawn failed");
                return false;
            }
            Err(_) => {
                debug!(tool = %self.name, "check_available: check timed out");
                return false;
            }
        };

        if !output.status.success() {
            return false;
        }

        match &self.check.expected {
            Some(expected) => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                combined.contains(expected)
            }
            None => true,
        }
    }

}

/// Load all tool declarations from the tools directory
///
/// Each tool lives in its own subdirectory, as `<name>.yaml`, `<name>.yml`,
/// or `tool.yaml`. Invalid declarations are skipped with a warning.
pub fn load_external_tools(tools_dir: &Path) -> Result<Vec<ExternalTool>> {
    if !tools_dir.exists() {
        debug!(?tools_dir, "load_external_tools: no tools directory");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(tools_dir).context("Failed to read tools directory")?;
    let mut tools = Vec::new();

    for entry in entries {
        let entry = entry.context("Failed to read tools directory entry")?;
        if !entry.path().is_dir() {
            continue;
        }

        let tool_name = entry.file_name().to_string_lossy().into_owned();
        let tool_dir = entry.path();

        let candidates = [
            tool_dir.join(format!("{tool_name}.yaml")),
            tool_dir.join(format!("{tool_name}.yml")),
            tool_dir.join("tool.yaml"),
            tool_dir.join("tool.yml"),
        ];

        let Some(mut tool) = candidates.iter().find_map(|p| load_tool_from_yaml(p).ok()) else {
            continue;
        };

        if tool.name.is_empty() {
            tool.name = tool_name;
        }

        match tool.validate() {
            Ok(()) => tools.push(tool),
            Err(e) => warn!(tool = %tool.name, error = %e, "skipping invalid tool declaration"),
        }
    }

    debug!(count = tools.len(), "load_external_tools: loaded declarations");
    Ok(tools)
}

fn load_tool_from_yaml(path: &Path) -> Result<ExternalTool> {
    let data = std::fs::read_to_string(path)?;
    let tool: ExternalTool = serde_yaml::from_str(&data).context(format!("failed to parse {}", path.display()))?;
    Ok(tool)
}
