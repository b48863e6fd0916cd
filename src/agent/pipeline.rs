//! Iterative planning pipeline
//!
//! The request loop: plan with the LM, validate the plan against the tool
//! registry, execute steps in dependency order, feed the results back into
//! the next planning round, and finally synthesize a streamed answer. Step
//! failures are inputs to the next round, never termination conditions;
//! planner and synthesis failures are terminal.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::{LlmClient, LlmError, Message, Role};
use crate::prompts::{PlanningContext, PromptSet, SynthesisContext};
use crate::steplog::{ExecutionRecord, LlmRecord, PlanRecord, PlanStepRecord, StepLogger};
use crate::tools::ToolRegistry;

use super::plan::{Plan, PlanParseError, PlanStep, parse_plan};
use super::{Event, EventRole};

/// Maximum number of plan-execute cycles per request
pub const MAX_ITERATIONS: u32 = 10;

/// Per-request options supplied by the session handler
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Prior conversation history
    pub history: Vec<Message>,
    /// User-provided hints for the planner
    pub context: String,
}

/// The result of executing one plan step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub tool: String,
    pub purpose: String,
    pub output: String,
    pub success: bool,
    /// Empty iff success
    pub error: String,
}

/// Terminal pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("plan parsing failed: {0}")]
    Plan(#[from] PlanParseError),

    #[error("step {step}: unknown tool {tool:?}")]
    UnknownTool { step: String, tool: String },

    #[error("step {step}: depends on unknown step {dependency:?}")]
    UnknownDependency { step: String, dependency: String },

    #[error("circular dependency detected in plan steps")]
    CircularDependency,

    #[error("iteration limit ({0}) exceeded without a final answer")]
    IterationLimitExceeded(u32),

    #[error("language model call failed: {0}")]
    Llm(LlmError),

    #[error("prompt rendering failed: {0}")]
    Template(String),

    #[error("run cancelled")]
    Cancelled,
}

fn map_llm_err(err: LlmError) -> PipelineError {
    if err.is_cancelled() {
        PipelineError::Cancelled
    } else {
        PipelineError::Llm(err)
    }
}

/// Request-scoped planner/executor
pub struct Pipeline {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    prompts: PromptSet,
    step_logger: Option<Arc<StepLogger>>,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, prompts: PromptSet) -> Self {
        Self {
            llm,
            registry,
            prompts,
            step_logger: None,
        }
    }

    /// Attach a step logger for request debugging
    pub fn with_step_logger(mut self, logger: Arc<StepLogger>) -> Self {
        self.step_logger = Some(logger);
        self
    }

    /// Run the full pipeline for one user message
    ///
    /// Events stream through `events` in program order; the sender is owned
    /// here and dropped on every exit path, which closes the channel exactly
    /// once. On success the returned history is the input history plus the
    /// user turn and the final assistant turn; on failure nothing is
    /// persisted.
    pub async fn run(
        &self,
        user_message: &str,
        opts: RunOptions,
        events: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> Result<Vec<Message>, PipelineError> {
        if let Some(logger) = &self.step_logger {
            logger.reset();
        }

        debug!(
            user_message_len = user_message.len(),
            history_len = opts.history.len(),
            "run: starting pipeline"
        );

        let mut all_results: Vec<StepResult> = Vec::new();
        let mut ready = false;

        for iteration in 0..MAX_ITERATIONS {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let (plan, raw) = self.plan_with_results(user_message, &opts, &all_results, &cancel).await?;

            info!(
                iteration,
                intent = %plan.intent,
                complexity = plan.complexity.as_str(),
                needs_tools = plan.needs_tools,
                ready_to_answer = plan.ready_to_answer,
                steps = plan.steps.len(),
                "run: plan generated"
            );

            self.log_plan(&plan, &raw);
            let _ = events.send(Event::PlanGenerated { plan: plan.clone() }).await;

            if plan.ready_to_answer || (!plan.needs_tools && plan.steps.is_empty()) {
                debug!(iteration, "run: ready to answer, proceeding to synthesis");
                ready = true;
                break;
            }

            if plan.needs_tools && !plan.steps.is_empty() {
                self.validate(&plan)?;
                let results = self.execute(&plan, &events, &cancel).await?;
                debug!(
                    iteration,
                    new_results = results.len(),
                    total_results = all_results.len() + results.len(),
                    "run: iteration complete"
                );
                all_results.extend(results);
            }
        }

        if !ready {
            warn!(max_iterations = MAX_ITERATIONS, "run: iteration limit exceeded");
            return Err(PipelineError::IterationLimitExceeded(MAX_ITERATIONS));
        }

        let answer = self.synthesize(user_message, &all_results, &opts, &events, &cancel).await?;

        let mut history = opts.history;
        history.push(Message::user(user_message));
        history.push(Message::assistant(answer));

        debug!(final_history_len = history.len(), "run: pipeline complete");
        Ok(history)
    }

    /// One planning round: render the prompt, call the LM, parse the plan
    async fn plan_with_results(
        &self,
        user_message: &str,
        opts: &RunOptions,
        previous_results: &[StepResult],
        cancel: &CancellationToken,
    ) -> Result<(Plan, String), PipelineError> {
        let prompt = self
            .prompts
            .render_planning(&PlanningContext {
                history: format_history(&opts.history),
                tools: format_tools(&self.registry),
                user_hints: opts.context.clone(),
                tool_results: format_tool_results(previous_results),
            })
            .map_err(|e| PipelineError::Template(e.to_string()))?;

        let messages = vec![Message::system(prompt), Message::user(user_message)];

        debug!(previous_results = previous_results.len(), "plan_with_results: calling LM");

        // Planning is not streamed; the complete response is needed to parse
        let start = Instant::now();
        let result = self.llm.chat_messages(&messages, None, cancel).await;
        self.log_llm("planning", &messages, &result, start.elapsed().as_millis());

        let response = result.map_err(map_llm_err)?;
        debug!(response_len = response.len(), "plan_with_results: received planning response");

        let plan = parse_plan(&response)?;
        Ok((plan, response))
    }

    /// Check that every tool resolves and every dependency is local
    fn validate(&self, plan: &Plan) -> Result<(), PipelineError> {
        for step in &plan.steps {
            if !self.registry.contains(&step.tool) {
                return Err(PipelineError::UnknownTool {
                    step: step.id.clone(),
                    tool: step.tool.clone(),
                });
            }

            if let Some(dep) = &step.depends_on {
                if !plan.steps.iter().any(|s| &s.id == dep) {
                    return Err(PipelineError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the plan steps sequentially in dependency order
    async fn execute(
        &self,
        plan: &Plan,
        events: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StepResult>, PipelineError> {
        let ordered = execution_order(&plan.steps)?;
        let mut results = Vec::with_capacity(ordered.len());

        for step in ordered {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let args = step.args_map();
            let args_json = serde_json::Value::Object(args.clone()).to_string();

            let _ = events
                .send(Event::StepStarted {
                    tool: step.tool.clone(),
                    args: args_json.clone(),
                })
                .await;
            let _ = events
                .send(Event::ToolCall {
                    id: step.id.clone(),
                    name: step.tool.clone(),
                    args: args_json.clone(),
                })
                .await;

            info!(step = %step.id, tool = %step.tool, "execute: executing step");

            let start = Instant::now();
            let result = self.registry.execute(&step.tool, &args).await;
            let duration_ms = start.elapsed().as_millis();

            let (output, success, error) = match result {
                Ok(output) => (output, true, String::new()),
                Err(e) => {
                    warn!(step = %step.id, error = %e, "execute: step execution failed");
                    (format!("Error: {e}"), false, e.to_string())
                }
            };

            self.log_execution(&step, &args_json, &output, success, &error, duration_ms);

            let _ = events
                .send(Event::ToolResult {
                    id: step.id.clone(),
                    name: step.tool.clone(),
                    output: output.clone(),
                    success,
                })
                .await;

            debug!(step = %step.id, success, "execute: step complete");

            results.push(StepResult {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                purpose: step.purpose.clone(),
                output,
                success,
                error,
            });
        }

        Ok(results)
    }

    /// Final LM call: stream the answer as text events
    async fn synthesize(
        &self,
        user_message: &str,
        results: &[StepResult],
        opts: &RunOptions,
        events: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let prompt = self
            .prompts
            .render_synthesis(&SynthesisContext {
                identity: self.prompts.identity.clone(),
                user_profile: self.prompts.user.clone(),
                history: format_history(&opts.history),
                tool_results: format_tool_results(results),
            })
            .map_err(|e| PipelineError::Template(e.to_string()))?;

        let messages = vec![Message::system(prompt), Message::user(user_message)];

        debug!("synthesize: calling LM");
        let start = Instant::now();

        let (token_tx, mut token_rx) = mpsc::channel::<String>(100);
        let llm = Arc::clone(&self.llm);
        let task_messages = messages.clone();
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { llm.chat_messages(&task_messages, Some(token_tx), &task_cancel).await });

        while let Some(token) = token_rx.recv().await {
            let _ = events
                .send(Event::Text {
                    role: EventRole::Assistant,
                    chunk: token,
                })
                .await;
        }

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(LlmError::InvalidResponse(format!("synthesis task failed: {e}"))),
        };
        self.log_llm("synthesis", &messages, &result, start.elapsed().as_millis());

        result.map_err(map_llm_err)
    }

    fn log_llm(&self, phase: &str, messages: &[Message], result: &Result<String, LlmError>, duration_ms: u128) {
        let Some(logger) = &self.step_logger else { return };

        let record = LlmRecord {
            phase: phase.to_string(),
            model: self.llm.model(),
            messages: messages
                .iter()
                .map(|m| (m.role.as_str().to_string(), m.content.clone()))
                .collect(),
            response: result.as_ref().map(String::clone).unwrap_or_default(),
            error: result.as_ref().err().map(|e| e.to_string()).unwrap_or_default(),
            duration_ms,
        };

        if let Err(e) = logger.log_llm(&record) {
            warn!(error = %e, "log_llm: failed to write step record");
        }
    }

    fn log_plan(&self, plan: &Plan, raw: &str) {
        let Some(logger) = &self.step_logger else { return };

        let record = PlanRecord {
            intent: plan.intent.clone(),
            complexity: plan.complexity.as_str().to_string(),
            needs_tools: plan.needs_tools,
            ready_to_answer: plan.ready_to_answer,
            context: plan.context.clone(),
            steps: plan
                .steps
                .iter()
                .map(|step| PlanStepRecord {
                    id: step.id.clone(),
                    depends_on: step.depends_on.clone().unwrap_or_default(),
                    tool: step.tool.clone(),
                    purpose: step.purpose.clone(),
                    args: step.args.iter().map(|a| (a.name.clone(), a.value.clone())).collect(),
                })
                .collect(),
            raw: raw.to_string(),
        };

        if let Err(e) = logger.log_plan(&record) {
            warn!(error = %e, "log_plan: failed to write step record");
        }
    }

    fn log_execution(&self, step: &PlanStep, args_json: &str, output: &str, success: bool, error: &str, duration_ms: u128) {
        let Some(logger) = &self.step_logger else { return };

        let record = ExecutionRecord {
            step_id: step.id.clone(),
            tool: step.tool.clone(),
            purpose: step.purpose.clone(),
            args_json: args_json.to_string(),
            output: output.to_string(),
            success,
            error: error.to_string(),
            duration_ms,
        };

        if let Err(e) = logger.log_execution(&record) {
            warn!(error = %e, "log_execution: failed to write step record");
        }
    }
}

/// Dependency-resolved step order (Kahn's algorithm)
///
/// The queue is seeded in plan order, so independent steps keep their
/// document order. A length mismatch at the end means a cycle.
fn execution_order(steps: &[PlanStep]) -> Result<Vec<PlanStep>, PipelineError> {
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let index_of: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();
    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        if let Some(dep) = &step.depends_on {
            // Validation guarantees the dependency resolves
            if let Some(&dep_index) = index_of.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[dep_index].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(steps.len());

    while let Some(i) = queue.pop_front() {
        ordered.push(steps[i].clone());
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }

    if ordered.len() != steps.len() {
        return Err(PipelineError::CircularDependency);
    }

    Ok(ordered)
}

/// Format conversation history for template insertion
fn format_history(history: &[Message]) -> String {
    if history.is_empty() {
        return "(No previous conversation)".to_string();
    }

    let mut out = String::new();
    for msg in history {
        let prefix = match msg.role {
            Role::User => "User: ",
            Role::Assistant => "Assistant: ",
            _ => continue,
        };
        out.push_str(prefix);
        out.push_str(&msg.content);
        out.push_str("\n\n");
    }
    out
}

/// Format the registered tools for the planning prompt
fn format_tools(registry: &ToolRegistry) -> String {
    let definitions = registry.definitions();
    if definitions.is_empty() {
        return "(No tools available)".to_string();
    }

    let mut out = String::new();
    for def in definitions {
        out.push_str(&format!("- **{}**: {}\n", def.name, def.description));
        if let Some(props) = def.parameters.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in props {
                let desc = prop.get("description").and_then(|d| d.as_str()).unwrap_or("");
                out.push_str(&format!("  - `{name}`: {desc}\n"));
            }
        }
    }
    out
}

/// Format accumulated step results for prompt insertion
fn format_tool_results(results: &[StepResult]) -> String {
    if results.is_empty() {
        return "(No tool results - direct answer)".to_string();
    }

    let mut out = String::new();
    for result in results {
        out.push_str(&format!("### Step: {}\n", result.step_id));
        out.push_str(&format!("**Tool**: {}\n", result.tool));
        out.push_str(&format!("**Purpose**: {}\n", result.purpose));
        if result.success {
            out.push_str(&format!("**Output**:\n```\n{}\n```\n\n", result.output));
        } else {
            out.push_str(&format!("**Error**: {}\n\n", result.error));
        }
    }
    out
}
