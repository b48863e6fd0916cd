//! Session handler
//!
//! Per-connection conversation state and the bridge between the pipeline's
//! event stream and the client-facing frame stream. History is replaced
//! atomically on success and left untouched on failure.

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Event, Pipeline, RunOptions};
use crate::llm::Message;
use crate::tools::{CommandObserver, SchemaDiscoveryTool, ShellTool};

use super::listener::{read_request, write_frame};
use super::protocol::{ClientRequest, FrameRole, ResponseFrame};

/// Capacity of the per-request event channel
///
/// Bounded so a slow client applies backpressure to the pipeline.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Per-connection session state
pub struct SessionHandler {
    pipeline: Arc<Pipeline>,
    shell: Arc<ShellTool>,
    discovery: Arc<SchemaDiscoveryTool>,
    history: Vec<Message>,
    context: String,
}

impl SessionHandler {
    /// Create a handler for one connection
    pub fn new(pipeline: Arc<Pipeline>, shell: Arc<ShellTool>, discovery: Arc<SchemaDiscoveryTool>) -> Self {
        Self {
            pipeline,
            shell,
            discovery,
            history: Vec::new(),
            context: String::new(),
        }
    }

    /// Current conversation history (tests)
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Serve the connection until disconnect or shutdown
    pub async fn handle(mut self, stream: UnixStream, shutdown: CancellationToken) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = read_request(&mut reader) => request?,
            };

            let Some(request) = request else {
                debug!("handle: client disconnected");
                break;
            };

            match request {
                ClientRequest::Ping => {
                    write_frame(
                        &mut write_half,
                        &ResponseFrame::Pong {
                            version: env!("CARGO_PKG_VERSION").to_string(),
                        },
                    )
                    .await?;
                }
                ClientRequest::SetContext { context } => {
                    debug!(context_len = context.len(), "handle: context updated");
                    self.context = context;
                }
                ClientRequest::Chat { message } => {
                    info!(message_len = message.len(), "handle: chat request");
                    self.process_chat(&mut write_half, &message, &shutdown).await?;
                }
            }
        }

        Ok(())
    }

    /// Run one chat request through the pipeline and stream frames back
    async fn process_chat(&mut self, writer: &mut OwnedWriteHalf, message: &str, shutdown: &CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let cancel = shutdown.child_token();

        // Relay shell commands into the pipeline's event stream. The observer
        // fires inline on the pipeline task, which keeps frame order.
        let observer_tx = event_tx.clone();
        let observer: CommandObserver = Arc::new(move |command: &str, is_discovery: bool| {
            let _ = observer_tx.try_send(Event::ShellCommand {
                command: command.to_string(),
                is_discovery,
            });
        });
        self.shell.set_observer(Arc::clone(&observer));
        self.discovery.set_observer(observer);

        let pipeline = Arc::clone(&self.pipeline);
        let opts = RunOptions {
            history: self.history.clone(),
            context: self.context.clone(),
        };
        let run_message = message.to_string();
        let run_cancel = cancel.clone();
        let mut task = tokio::spawn(async move { pipeline.run(&run_message, opts, event_tx, run_cancel).await });

        // Drain events until the channel closes. The observer keeps a sender
        // clone alive, so the channel only closes once the pipeline task has
        // finished and the observers have been cleared.
        let mut task_result = None;
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => self.forward_event(writer, event).await?,
                    None => break,
                },
                joined = &mut task, if task_result.is_none() => {
                    task_result = Some(joined.context("pipeline task panicked")?);
                    self.shell.clear_observer();
                    self.discovery.clear_observer();
                }
            }
        }

        let result = match task_result {
            Some(result) => result,
            // Unreachable in practice: the channel cannot close before the
            // task completes. Treat it as a defect rather than panic.
            None => {
                warn!("process_chat: event channel closed before pipeline finished");
                task.await.context("pipeline task panicked")?
            }
        };

        match result {
            Ok(history) => {
                self.history = history;
                write_frame(writer, &ResponseFrame::Done).await?;
            }
            Err(e) => {
                warn!(error = %e, "process_chat: pipeline failed");
                write_frame(writer, &ResponseFrame::Error { message: e.to_string() }).await?;
            }
        }

        Ok(())
    }

    /// Translate one pipeline event to a client frame
    async fn forward_event(&self, writer: &mut OwnedWriteHalf, event: Event) -> Result<()> {
        debug!(kind = event.kind(), "forward_event");

        let frame = match event {
            Event::Text { role, chunk } => ResponseFrame::Text {
                role: FrameRole::from(role),
                content: chunk,
            },
            Event::ToolCall { id, name, args } => ResponseFrame::ToolCall { id, name, args },
            Event::ToolResult {
                id,
                name,
                output,
                success,
            } => ResponseFrame::ToolResult {
                id,
                name,
                output,
                success,
            },
            Event::ShellCommand { command, is_discovery } => ResponseFrame::ShellCommand { command, is_discovery },
            Event::PlanGenerated { plan } => ResponseFrame::Text {
                role: FrameRole::System,
                content: format!("Planning: {}", plan.intent),
            },
            // ToolCall carries the same information a moment later
            Event::StepStarted { .. } => return Ok(()),
        };

        write_frame(writer, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::llm::{LlmClient, LlmError};
    use crate::prompts::PromptSet;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    struct ScriptedLm {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedLm {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLm {
        async fn chat_messages(
            &self,
            _messages: &[Message],
            token_tx: Option<mpsc::Sender<String>>,
            cancel: &CancellationToken,
        ) -> Result<String, LlmError> {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("no more scripted responses".to_string()))?;
            if let Some(tx) = token_tx {
                let _ = tx.send(response.clone()).await;
            }
            Ok(response)
        }

        async fn simple_chat(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("no more scripted responses".to_string()))
        }

        fn model(&self) -> String {
            "scripted".to_string()
        }
    }

    const READY_PLAN: &str = r#"<plan>
  <intent>Answer directly</intent>
  <complexity>simple</complexity>
  <needs_tools>false</needs_tools>
  <ready_to_answer>true</ready_to_answer>
  <context></context>
  <steps></steps>
</plan>"#;

    const SHELL_PLAN: &str = r#"<plan>
  <intent>Run date</intent>
  <complexity>tool</complexity>
  <needs_tools>true</needs_tools>
  <ready_to_answer>false</ready_to_answer>
  <context></context>
  <steps>
    <step id="step_1">
      <tool>shell</tool>
      <purpose>Get the date</purpose>
      <args>
        <arg name="command">echo mock-date</arg>
      </args>
    </step>
  </steps>
</plan>"#;

    fn build_handler(llm: Arc<dyn LlmClient>) -> SessionHandler {
        let settings = Arc::new(Settings::default());
        let registry = Arc::new(ToolRegistry::new());
        let shell = Arc::new(ShellTool::new(Arc::clone(&settings)));
        let discovery = Arc::new(SchemaDiscoveryTool::new(
            Arc::clone(&settings),
            Vec::new(),
            None,
            Arc::clone(&llm),
        ));
        registry.register(Arc::clone(&shell) as Arc<dyn crate::tools::Tool>);
        registry.register(Arc::clone(&discovery) as Arc<dyn crate::tools::Tool>);

        let prompts = PromptSet::from_templates(
            "{{tools}} {{history}} {{user_hints}} {{tool_results}}",
            "{{identity}} {{user_profile}} {{history}} {{tool_results}}",
            "Assistant",
            "User",
        );
        let pipeline = Arc::new(Pipeline::new(llm, registry, prompts));

        SessionHandler::new(pipeline, shell, discovery)
    }

    async fn run_chat(handler: SessionHandler, requests: &[ClientRequest]) -> Vec<ResponseFrame> {
        let (client, server) = UnixStream::pair().unwrap();
        let shutdown = CancellationToken::new();

        let server_task = tokio::spawn(handler.handle(server, shutdown));

        let (client_read, mut client_write) = client.into_split();
        for request in requests {
            let json = serde_json::to_string(request).unwrap();
            client_write.write_all(json.as_bytes()).await.unwrap();
            client_write.write_all(b"\n").await.unwrap();
        }
        drop(client_write);

        let mut frames = Vec::new();
        let mut reader = BufReader::new(client_read);
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            frames.push(serde_json::from_str(line.trim()).unwrap());
            line.clear();
        }

        server_task.await.unwrap().unwrap();
        frames
    }

    #[tokio::test]
    async fn test_simple_chat_ends_with_done() {
        let llm = ScriptedLm::new(&[READY_PLAN, "The answer is 4."]);
        let handler = build_handler(llm);

        let frames = run_chat(
            handler,
            &[ClientRequest::Chat {
                message: "What is 2+2?".to_string(),
            }],
        )
        .await;

        // Plan notice, streamed answer, terminal Done
        assert!(matches!(frames.first(), Some(ResponseFrame::Text { role: FrameRole::System, .. })));
        assert!(frames.iter().any(
            |f| matches!(f, ResponseFrame::Text { role: FrameRole::Assistant, content } if content.contains("4"))
        ));
        assert_eq!(frames.last(), Some(&ResponseFrame::Done));
    }

    #[tokio::test]
    async fn test_shell_step_emits_command_and_tool_frames() {
        let llm = ScriptedLm::new(&[SHELL_PLAN, READY_PLAN, "Today is mock-date."]);
        let handler = build_handler(llm);

        let frames = run_chat(
            handler,
            &[ClientRequest::Chat {
                message: "What day is it?".to_string(),
            }],
        )
        .await;

        let tool_call_at = frames
            .iter()
            .position(|f| matches!(f, ResponseFrame::ToolCall { name, .. } if name == "shell"))
            .expect("tool call frame");
        let shell_command_at = frames
            .iter()
            .position(|f| matches!(f, ResponseFrame::ShellCommand { command, is_discovery: false } if command == "echo mock-date"))
            .expect("shell command frame");
        let tool_result_at = frames
            .iter()
            .position(|f| matches!(f, ResponseFrame::ToolResult { success: true, output, .. } if output.contains("mock-date")))
            .expect("tool result frame");

        assert!(tool_call_at < shell_command_at);
        assert!(shell_command_at < tool_result_at);
        assert_eq!(frames.last(), Some(&ResponseFrame::Done));
    }

    #[tokio::test]
    async fn test_pipeline_error_is_terminal_frame() {
        // No scripted responses: the first planning call fails
        let llm = ScriptedLm::new(&[]);
        let handler = build_handler(llm);

        let frames = run_chat(handler, &[ClientRequest::Chat { message: "hi".to_string() }]).await;

        assert_eq!(frames.len(), 1);
        assert!(matches!(frames.last(), Some(ResponseFrame::Error { .. })));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let llm = ScriptedLm::new(&[]);
        let handler = build_handler(llm);

        let frames = run_chat(handler, &[ClientRequest::Ping]).await;
        assert!(matches!(frames.as_slice(), [ResponseFrame::Pong { .. }]));
    }

    #[tokio::test]
    async fn test_history_survives_across_requests_in_connection() {
        let llm = ScriptedLm::new(&[READY_PLAN, "First answer.", READY_PLAN, "Second answer."]);
        let handler = build_handler(llm);

        let frames = run_chat(
            handler,
            &[
                ClientRequest::Chat { message: "one".to_string() },
                ClientRequest::Chat { message: "two".to_string() },
            ],
        )
        .await;

        let done_count = frames.iter().filter(|f| matches!(f, ResponseFrame::Done)).count();
        assert_eq!(done_count, 2);
    }

    #[tokio::test]
    async fn test_failed_request_leaves_history_unchanged() {
        // First request succeeds, second fails (responses run out)
        let llm = ScriptedLm::new(&[READY_PLAN, "First answer."]);
        let handler = build_handler(llm);

        let frames = run_chat(
            handler,
            &[
                ClientRequest::Chat { message: "one".to_string() },
                ClientRequest::Chat { message: "two".to_string() },
            ],
        )
        .await;

        assert!(frames.iter().any(|f| matches!(f, ResponseFrame::Done)));
        assert!(matches!(frames.last(), Some(ResponseFrame::Error { .. })));
    }
}
