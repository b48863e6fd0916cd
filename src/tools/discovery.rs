//! Schema discovery tool
//!
//! Converts a command's `--help` output into a normalized, LM-consumable
//! schema so the planner can emit correct shell invocations without
//! guessing. The LM does the parsing; this tool does the fetching, the
//! validation, the caching, and the rendering.

use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::external::ExternalTool;
use crate::llm::LlmClient;

use super::schema_cache::{CachedSchema, SchemaCache};
use super::shell::{CommandObserver, merge_output};
use super::traits::{optional_str, require_str};
use super::{Tool, ToolArgs, ToolError};

const HELP_TIMEOUT: Duration = Duration::from_secs(10);
const SCHEMA_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_HELP_BYTES: usize = 8_000;
const MIN_HELP_BYTES: usize = 20;

/// Common developer tools that may always be discovered
const SAFE_COMMANDS: [&str; 16] = [
    "git", "docker", "kubectl", "npm", "yarn", "pnpm", "cargo", "go", "python", "pip", "node", "ruby", "make",
    "cmake", "gradle", "mvn",
];

const SCHEMA_SYSTEM_PROMPT: &str = r#"# Role
You are a CLI Documentation Parser. Your task is to transform raw "--help" output into a precise, machine-readable JSON schema. All descriptions and text in the output MUST be in English.

# Task
Analyze the provided help text and output ONLY a valid JSON object.

# Schema Specification
{
  "name": "full_command_path",
  "description": "Concise summary of purpose in English",
  "subcommands": [
    {
      "name": "name",
      "description": "description in English"
    }
  ],
  "flags": [
    {
      "name": "--long-name",
      "short": "-s",
      "description": "description in English",
      "type": "boolean | string | number | array",
      "required": false,
      "default": "value or null"
    }
  ],
  "arguments": [
    {
      "name": "arg_name",
      "description": "description in English",
      "required": true,
      "variadic": false
    }
  ],
  "examples": [
    "example usage 1",
    "example usage 2"
  ]
}

# Strict Guidelines
1. **Language**: The entire output must be in English, regardless of the language of the source help text.
2. **Type Precision**:
   - Use "boolean" for "switches" (flags with no value).
   - Use "string" or "number" for options that require an argument (e.g., "--port 80").
   - Use "array" if a flag can be passed multiple times.
3. **Completeness**: Include all subcommands. For flags, prioritize the 10 most relevant if the list is exhaustive.
4. **Required vs. Optional**: Infer "required: true" if the help text uses angle brackets like "<item>" or explicitly states a field is mandatory.
5. **Variadic Arguments**: Mark "variadic: true" for arguments that accept multiple values (e.g., "[files...]").
6. **No Prose**: Output the JSON block only. Do not include introductory text, conversational filler, or markdown code blocks in your response."#;

/// Discovers and returns the schema for a CLI command
pub struct SchemaDiscoveryTool {
    settings: Arc<Settings>,
    external_tools: Vec<ExternalTool>,
    cache: Option<Arc<SchemaCache>>,
    llm: Arc<dyn LlmClient>,
    observer: RwLock<Option<CommandObserver>>,
    help_timeout: Duration,
}

impl SchemaDiscoveryTool {
    /// Create a new discovery tool
    pub fn new(
        settings: Arc<Settings>,
        external_tools: Vec<ExternalTool>,
        cache: Option<Arc<SchemaCache>>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            settings,
            external_tools,
            cache,
            llm,
            observer: RwLock::new(None),
            help_timeout: HELP_TIMEOUT,
        }
    }

    /// Override the help-fetch deadline (tests)
    pub fn with_help_timeout(mut self, timeout: Duration) -> Self {
        self.help_timeout = timeout;
        self
    }

    /// Mount an observer that sees every help fetch before it runs
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
            observer(command, true);
        }
    }

    fn is_command_allowed(&self, base: &str) -> bool {
        self.settings.is_command_allowed(base)
            || SAFE_COMMANDS.contains(&base)
            || self
                .external_tools
                .iter()
                .any(|ext| ext.access.kind == "shell" && ext.access.command == base)
    }

    /// Run `<cmd> --help` and return the merged output
    ///
    /// The exit status is ignored since help often exits non-zero.
    async fn fetch_help(&self, command_path: &str) -> Result<String, ToolError> {
        let help_command = format!("{command_path} --help");
        self.notify_observer(&help_command);

        let result = tokio::time::timeout(
            self.help_timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&help_command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    timeout_secs: self.help_timeout.as_secs(),
                    output: String::new(),
                });
            }
        };

        let mut help = merge_output(&output.stdout, &output.stderr);
        if help.len() < MIN_HELP_BYTES {
            return Err(ToolError::NoHelpOutput {
                command: command_path.to_string(),
            });
        }

        if help.len() > MAX_HELP_BYTES {
            help.truncate(MAX_HELP_BYTES);
            help.push_str("\n... (truncated)");
        }

        Ok(help)
    }

    /// Ask the LM to turn help text into a structured schema
    async fn generate_schema(&self, command_path: &str, help_text: &str) -> Result<Value, ToolError> {
        let user_message = format!("Convert this help text for `{command_path}` into a JSON schema:\n\n```\n{help_text}\n```");

        let response = tokio::time::timeout(SCHEMA_TIMEOUT, self.llm.simple_chat(SCHEMA_SYSTEM_PROMPT, &user_message))
            .await
            .map_err(|_| ToolError::Timeout {
                timeout_secs: SCHEMA_TIMEOUT.as_secs(),
                output: String::new(),
            })??;

        extract_json(&response)
            .ok_or_else(|| ToolError::InvalidArgument("no JSON object found in LM response".to_string()))
    }
}

#[async_trait]
impl Tool for SchemaDiscoveryTool {
    fn name(&self) -> &'static str {
        "get_command_schema"
    }

    fn description(&self) -> String {
        r#"Generates a structured JSON schema for a CLI command by analyzing its "--help" output. Use this tool for pre-execution discovery to ensure correct syntax and parameter handling.

## Operational Procedure
1.  **Top-Down Analysis:** Always start with the base command (e.g., "tfl").
2.  **Recursive Logic:** Identify available subcommands from the top-level schema. **Never** hallucinate or guess subcommand names.
3.  **Incremental Detail:** To investigate a subcommand, call the tool with the subcommand (e.g., {"command":"tfl", "subcommand": "status"}) only after the parent command has confirmed its existence.

## Strict Constraints
* **No Execution:** Do not attempt to run the command with the shell tool until the parameter schema is fully resolved.
* **Incremental Only:** If a command has deep nesting, you must resolve one level at a time."#
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to discover (e.g., 'docker', 'git', 'tfl departures')"
                },
                "subcommand": {
                    "type": "string",
                    "description": "Optional subcommand to get detailed schema for (e.g., 'run' for 'docker run')"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let command = require_str(args, "command")?;
        let subcommand = optional_str(args, "subcommand");

        let Some(base) = command.split_whitespace().next() else {
            return Err(ToolError::InvalidArgument("empty command".to_string()));
        };

        if !self.is_command_allowed(base) {
            return Err(ToolError::NotInAllowlist {
                command: base.to_string(),
                allowed: self.settings.tools.shell.allowlist.join(", "),
            });
        }

        let command_path = match subcommand {
            Some(sub) => format!("{command} {sub}"),
            None => command.to_string(),
        };

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&command_path) {
                debug!(command = %command_path, "execute: cache hit");
                return Ok(render_schema(&command_path, &cached.schema));
            }
        }

        debug!(command = %command_path, "execute: fetching help");
        let help_text = self.fetch_help(&command_path).await?;

        let schema = match self.generate_schema(&command_path, &help_text).await {
            Ok(schema) => schema,
            Err(e) => {
                // Soft fallback: the raw help is still useful to the planner
                warn!(command = %command_path, error = %e, "execute: schema generation failed, returning raw help");
                return Ok(format!(
                    "# {command_path} Help\n\nCould not generate schema: {e}\n\nRaw help:\n```\n{help_text}\n```"
                ));
            }
        };

        if let Some(cache) = &self.cache {
            let entry = CachedSchema {
                command: command_path.clone(),
                schema: schema.clone(),
                help_text: help_text.clone(),
                generated_at: chrono::Utc::now(),
            };
            if let Err(e) = cache.set(entry) {
                warn!(command = %command_path, error = %e, "execute: failed to cache schema");
            }
        }

        Ok(render_schema(&command_path, &schema))
    }
}

/// Extract a JSON object from an LM response
///
/// Tries the whole response first, then the substring from the first `{` to
/// the last `}`.
fn extract_json(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok().filter(Value::is_object)
}

/// Render a parsed schema as a human-readable markdown block
fn render_schema(command_path: &str, schema: &Value) -> String {
    let mut out = format!("# {command_path} Schema\n\n");

    if let Some(desc) = schema["description"].as_str() {
        out.push_str(&format!("**Description:** {desc}\n\n"));
    }

    if let Some(subs) = schema["subcommands"].as_array().filter(|s| !s.is_empty()) {
        out.push_str("## Subcommands\n");
        for sub in subs {
            let name = sub["name"].as_str().unwrap_or("?");
            let desc = sub["description"].as_str().unwrap_or("");
            out.push_str(&format!("- `{command_path} {name}`: {desc}\n"));
        }
        out.push('\n');
    }

    if let Some(flags) = schema["flags"].as_array().filter(|f| !f.is_empty()) {
        out.push_str("## Flags\n");
        for flag in flags {
            let name = flag["name"].as_str().unwrap_or("?");
            let desc = flag["description"].as_str().unwrap_or("");
            match flag["short"].as_str().filter(|s| !s.is_empty()) {
                Some(short) => out.push_str(&format!("- `{name}`, `{short}`: {desc}\n")),
                None => out.push_str(&format!("- `{name}`: {desc}\n")),
            }
        }
        out.push('\n');
    }

    if let Some(args) = schema["arguments"].as_array().filter(|a| !a.is_empty()) {
        out.push_str("## Arguments\n");
        for arg in args {
            let name = arg["name"].as_str().unwrap_or("?");
            let desc = arg["description"].as_str().unwrap_or("");
            let required = if arg["required"].as_bool().unwrap_or(false) {
                " (required)"
            } else {
                ""
            };
            out.push_str(&format!("- `{name}`{required}: {desc}\n"));
        }
        out.push('\n');
    }

    if let Some(examples) = schema["examples"].as_array().filter(|e| !e.is_empty()) {
        out.push_str("## Examples\n```\n");
        for example in examples {
            if let Some(text) = example.as_str() {
                out.push_str(text);
                out.push('\n');
            }
        }
        out.push_str("```\n\n");
    }

    out.push_str("---\nUse the `shell` tool to execute this command.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, Message};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Mock LM that replies to every simple_chat with a fixed string
    struct FixedLm {
        reply: String,
        calls: Mutex<u32>,
    }

    impl FixedLm {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmClient for FixedLm {
        async fn chat_messages(
            &self,
            _messages: &[Message],
            _token_tx: Option<mpsc::Sender<String>>,
            _cancel: &CancellationToken,
        ) -> Result<String, LlmError> {
            Ok(self.reply.clone())
        }

        async fn simple_chat(&self, _system_prompt: &str, _user_message: &str) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.reply.clone())
        }

        fn model(&self) -> String {
            "mock".to_string()
        }
    }

    const VALID_SCHEMA_JSON: &str = r#"{
        "name": "cat",
        "description": "concatenate files",
        "subcommands": [],
        "flags": [{"name": "--number", "short": "-n", "description": "number lines", "type": "boolean", "required": false, "default": null}],
        "arguments": [{"name": "file", "description": "input file", "required": false, "variadic": true}],
        "examples": ["cat file.txt"]
    }"#;

    fn discovery_args(command: &str) -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("command".to_string(), json!(command));
        args
    }

    #[test]
    fn test_extract_json_whole_response() {
        let value = extract_json(r#"{"name": "git"}"#).unwrap();
        assert_eq!(value["name"], "git");
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let value = extract_json("Here is the schema:\n{\"name\": \"git\"}\nHope that helps!").unwrap();
        assert_eq!(value["name"], "git");
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{ broken").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_render_schema_sections() {
        let schema: Value = serde_json::from_str(VALID_SCHEMA_JSON).unwrap();
        let rendered = render_schema("cat", &schema);

        assert!(rendered.contains("# cat Schema"));
        assert!(rendered.contains("concatenate files"));
        assert!(rendered.contains("`--number`, `-n`"));
        assert!(rendered.contains("- `file`: input file"));
        assert!(rendered.contains("cat file.txt"));
        assert!(rendered.contains("Use the `shell` tool"));
    }

    #[tokio::test]
    async fn test_rejects_command_not_allowed() {
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, FixedLm::new("{}"));
        let err = tool.execute(&discovery_args("nmap")).await.unwrap_err();
        assert!(matches!(err, ToolError::NotInAllowlist { command, .. } if command == "nmap"));
    }

    #[tokio::test]
    async fn test_safe_commands_always_allowed() {
        // git is not in the default shell allowlist but is a safe dev tool;
        // the allowlist check passes and the tool proceeds to the help fetch.
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, FixedLm::new("{}"));
        let result = tool.execute(&discovery_args("git")).await;
        // Depending on the environment git may or may not be installed; either
        // way the error must not be an allowlist rejection.
        assert!(!matches!(result, Err(ToolError::NotInAllowlist { .. })));
    }

    #[tokio::test]
    async fn test_short_help_is_no_help_output() {
        // `echo --help` prints just "--help", well under the minimum
        let llm = FixedLm::new("{}");
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, Arc::clone(&llm) as Arc<dyn LlmClient>);

        let err = tool.execute(&discovery_args("echo")).await.unwrap_err();
        assert!(matches!(err, ToolError::NoHelpOutput { .. }));
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_junk_lm_response_falls_back_to_raw_help() {
        let llm = FixedLm::new("I cannot produce a schema, sorry!");
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, Arc::clone(&llm) as Arc<dyn LlmClient>);

        let output = tool.execute(&discovery_args("cat")).await.unwrap();
        assert!(output.contains("Could not generate schema"));
        assert!(output.contains("Raw help:"));
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_valid_lm_response_renders_schema() {
        let llm = FixedLm::new(VALID_SCHEMA_JSON);
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, llm);

        let output = tool.execute(&discovery_args("cat")).await.unwrap();
        assert!(output.contains("# cat Schema"));
        assert!(output.contains("concatenate files"));
    }

    #[tokio::test]
    async fn test_schema_is_cached_and_reused() {
        let temp = tempdir().unwrap();
        let cache = Arc::new(SchemaCache::new(temp.path().to_path_buf()).unwrap());
        let llm = FixedLm::new(VALID_SCHEMA_JSON);
        let tool =
            SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), Some(Arc::clone(&cache)), Arc::clone(&llm) as Arc<dyn LlmClient>);

        tool.execute(&discovery_args("cat")).await.unwrap();
        assert_eq!(cache.list(), vec!["cat".to_string()]);

        // Second call is served from the cache without another LM round-trip
        tool.execute(&discovery_args("cat")).await.unwrap();
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_observer_sees_discovery_flag() {
        let llm = FixedLm::new(VALID_SCHEMA_JSON);
        let tool = SchemaDiscoveryTool::new(Arc::new(Settings::default()), Vec::new(), None, llm);

        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tool.set_observer(Arc::new(move |command, is_discovery| {
            sink.lock().unwrap().push((command.to_string(), is_discovery));
        }));

        tool.execute(&discovery_args("cat")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("cat --help".to_string(), true)]);
    }
}
