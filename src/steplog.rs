//! Step logger
//!
//! Append-only, numbered markdown records per request: LM calls, generated
//! plans, and tool executions. Not on the hot path; failures are logged and
//! otherwise ignored by callers.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::config::sanitize_component;

/// A logged LM call (planning, synthesis, schema discovery)
#[derive(Debug, Clone, Default)]
pub struct LlmRecord {
    pub phase: String,
    pub model: String,
    /// (role, content) pairs of the input messages
    pub messages: Vec<(String, String)>,
    pub response: String,
    pub error: String,
    pub duration_ms: u128,
}

/// A logged plan
#[derive(Debug, Clone, Default)]
pub struct PlanRecord {
    pub intent: String,
    pub complexity: String,
    pub needs_tools: bool,
    pub ready_to_answer: bool,
    pub context: Vec<String>,
    pub steps: Vec<PlanStepRecord>,
    /// The raw LM response the plan was parsed from
    pub raw: String,
}

/// One step within a logged plan
#[derive(Debug, Clone, Default)]
pub struct PlanStepRecord {
    pub id: String,
    pub depends_on: String,
    pub tool: String,
    pub purpose: String,
    pub args: Vec<(String, String)>,
}

/// A logged tool execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    pub step_id: String,
    pub tool: String,
    pub purpose: String,
    pub args_json: String,
    pub output: String,
    pub success: bool,
    pub error: String,
    pub duration_ms: u128,
}

/// Writes pipeline step records to numbered markdown files
pub struct StepLogger {
    logs_dir: PathBuf,
    index: Mutex<u32>,
}

impl StepLogger {
    /// Create a step logger rooted at the given directory
    pub fn new(logs_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&logs_dir)?;
        Ok(Self {
            logs_dir,
            index: Mutex::new(0),
        })
    }

    /// Reset the step counter (called at the start of each request)
    pub fn reset(&self) {
        *self.lock_index() = 0;
    }

    /// Remove all step records (called at daemon startup)
    pub fn clear(&self) -> std::io::Result<()> {
        for entry in std::fs::read_dir(&self.logs_dir)? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if name.starts_with("step_") && name.ends_with(".md") {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    /// Log an LM call
    pub fn log_llm(&self, record: &LlmRecord) -> std::io::Result<()> {
        let index = self.next_index();
        let filename = format!("step_{index:03}_llm_{}.md", sanitize_component(&record.phase));

        let mut doc = format!("# Step {index:03}: LM Call ({})\n\n", record.phase);
        doc.push_str(&format!("**Phase:** {}  \n", record.phase));
        doc.push_str(&format!("**Model:** {}  \n", record.model));
        doc.push_str(&format!("**Time:** {}  \n", chrono::Utc::now().to_rfc3339()));
        doc.push_str(&format!("**Duration:** {}ms  \n\n", record.duration_ms));

        doc.push_str("## Input Messages\n\n");
        for (i, (role, content)) in record.messages.iter().enumerate() {
            doc.push_str(&format!("### Message {i} ({role})\n\n```\n{content}\n```\n\n"));
        }

        doc.push_str("## Response\n\n");
        if !record.error.is_empty() {
            doc.push_str(&format!("**Error:** {}\n\n", record.error));
        } else {
            doc.push_str(&format!("```\n{}\n```\n", record.response));
        }

        self.write(&filename, &doc)
    }

    /// Log a generated plan
    pub fn log_plan(&self, record: &PlanRecord) -> std::io::Result<()> {
        let index = self.next_index();
        let filename = format!("step_{index:03}_plan.md");

        let mut doc = format!("# Step {index:03}: Plan Generated\n\n");
        doc.push_str(&format!("**Time:** {}  \n\n", chrono::Utc::now().to_rfc3339()));

        doc.push_str("## Overview\n\n");
        doc.push_str(&format!("**Intent:** {}  \n", record.intent));
        doc.push_str(&format!("**Complexity:** {}  \n", record.complexity));
        doc.push_str(&format!("**Needs Tools:** {}  \n", record.needs_tools));
        doc.push_str(&format!("**Ready to Answer:** {}  \n\n", record.ready_to_answer));

        if !record.context.is_empty() {
            doc.push_str("## Context\n\n");
            for item in &record.context {
                doc.push_str(&format!("- {item}\n"));
            }
            doc.push('\n');
        }

        if !record.steps.is_empty() {
            doc.push_str("## Planned Steps\n\n");
            for step in &record.steps {
                doc.push_str(&format!("### {}: {}\n\n", step.id, step.tool));
                if !step.depends_on.is_empty() {
                    doc.push_str(&format!("**Depends On:** {}  \n", step.depends_on));
                }
                doc.push_str(&format!("**Purpose:** {}  \n\n", step.purpose));
                if !step.args.is_empty() {
                    doc.push_str("**Arguments:**\n```\n");
                    for (name, value) in &step.args {
                        doc.push_str(&format!("  {name}: {value}\n"));
                    }
                    doc.push_str("```\n\n");
                }
            }
        }

        if !record.raw.is_empty() {
            doc.push_str(&format!("## Raw Plan Response\n\n```xml\n{}\n```\n", record.raw));
        }

        self.write(&filename, &doc)
    }

    /// Log a tool execution
    pub fn log_execution(&self, record: &ExecutionRecord) -> std::io::Result<()> {
        let index = self.next_index();
        let filename = format!("step_{index:03}_exec_{}.md", sanitize_component(&record.tool));

        let mut doc = format!("# Step {index:03}: Execute {}\n\n", record.tool);
        doc.push_str(&format!("**Step ID:** {}  \n", record.step_id));
        doc.push_str(&format!("**Tool:** {}  \n", record.tool));
        doc.push_str(&format!("**Time:** {}  \n", chrono::Utc::now().to_rfc3339()));
        doc.push_str(&format!("**Duration:** {}ms  \n", record.duration_ms));
        doc.push_str(&format!("**Success:** {}  \n\n", record.success));

        if !record.purpose.is_empty() {
            doc.push_str(&format!("**Purpose:** {}\n\n", record.purpose));
        }

        if !record.args_json.is_empty() {
            doc.push_str(&format!("## Arguments\n\n```json\n{}\n```\n\n", record.args_json));
        }

        doc.push_str("## Output\n\n");
        if !record.error.is_empty() {
            doc.push_str(&format!("**Error:** {}\n\n", record.error));
        }
        doc.push_str(&format!("```\n{}\n```\n", record.output));

        self.write(&filename, &doc)
    }

    fn next_index(&self) -> u32 {
        let mut index = self.lock_index();
        let current = *index;
        *index += 1;
        current
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, u32> {
        match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self, filename: &str, content: &str) -> std::io::Result<()> {
        let path = self.logs_dir.join(filename);
        debug!(?path, "write: recording step");
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_indices_increment_and_reset() {
        let temp = tempdir().unwrap();
        let logger = StepLogger::new(temp.path().to_path_buf()).unwrap();

        logger.log_llm(&LlmRecord { phase: "planning".to_string(), ..Default::default() }).unwrap();
        logger.log_plan(&PlanRecord::default()).unwrap();
        logger
            .log_execution(&ExecutionRecord { tool: "shell".to_string(), ..Default::default() })
            .unwrap();

        assert!(temp.path().join("step_000_llm_planning.md").exists());
        assert!(temp.path().join("step_001_plan.md").exists());
        assert!(temp.path().join("step_002_exec_shell.md").exists());

        logger.reset();
        logger.log_plan(&PlanRecord::default()).unwrap();
        // Overwrites by index after reset
        assert!(temp.path().join("step_000_plan.md").exists());
    }

    #[test]
    fn test_filename_component_sanitized() {
        let temp = tempdir().unwrap();
        let logger = StepLogger::new(temp.path().to_path_buf()).unwrap();

        logger
            .log_execution(&ExecutionRecord {
                tool: "get schema/../evil".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert!(temp.path().join("step_000_exec_get_schema____evil.md").exists());
    }

    #[test]
    fn test_llm_record_contents() {
        let temp = tempdir().unwrap();
        let logger = StepLogger::new(temp.path().to_path_buf()).unwrap();

        logger
            .log_llm(&LlmRecord {
                phase: "synthesis".to_string(),
                model: "qwen2.5:14b".to_string(),
                messages: vec![("system".to_string(), "prompt body".to_string())],
                response: "final answer".to_string(),
                error: String::new(),
                duration_ms: 42,
            })
            .unwrap();

        let doc = std::fs::read_to_string(temp.path().join("step_000_llm_synthesis.md")).unwrap();
        assert!(doc.contains("**Model:** qwen2.5:14b"));
        assert!(doc.contains("**Duration:** 42ms"));
        assert!(doc.contains("prompt body"));
        assert!(doc.contains("final answer"));
    }

    #[test]
    fn test_plan_record_contents() {
        let temp = tempdir().unwrap();
        let logger = StepLogger::new(temp.path().to_path_buf()).unwrap();

        logger
            .log_plan(&PlanRecord {
                intent: "get the time".to_string(),
                complexity: "tool".to_string(),
                needs_tools: true,
                ready_to_answer: false,
                context: vec!["note".to_string()],
                steps: vec![PlanStepRecord {
                    id: "step_1".to_string(),
                    depends_on: String::new(),
                    tool: "shell".to_string(),
                    purpose: "run date".to_string(),
                    args: vec![("command".to_string(), "date".to_string())],
                }],
                raw: "<plan>...</plan>".to_string(),
            })
            .unwrap();

        let doc = std::fs::read_to_string(temp.path().join("step_000_plan.md")).unwrap();
        assert!(doc.contains("**Intent:** get the time"));
        assert!(doc.contains("### step_1: shell"));
        assert!(doc.contains("command: date"));
        assert!(doc.contains("## Raw Plan Response"));
    }

    #[test]
    fn test_clear_removes_only_step_files() {
        let temp = tempdir().unwrap();
        let logger = StepLogger::new(temp.path().to_path_buf()).unwrap();

        logger.log_plan(&PlanRecord::default()).unwrap();
        std::fs::write(temp.path().join("other.md"), "keep me").unwrap();

        logger.clear().unwrap();

        assert!(!temp.path().join("step_000_plan.md").exists());
        assert!(temp.path().join("other.md").exists());
    }
}
