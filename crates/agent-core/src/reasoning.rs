//! Controller Loop
//!
//! Drives one question to a final answer by alternating between two phases:
//! ask the model for the next action, then execute whatever tool calls it
//! requested. The transcript is the only state; every phase appends to it.
//!
//! ```text
//! AwaitingModel ──(no calls)──▶ Terminal
//!      ▲  └──(calls)──▶ ExecutingTools
//!      └───────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Turn};
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::tool::{ToolCall, ToolRegistry, ToolResult};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Maximum loop iterations before the give-up turn is appended
    pub max_iterations: usize,

    /// Retry budget for retryable provider errors
    pub max_retries: usize,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,

    /// Hard wall-clock limit per tool execution
    pub tool_timeout: Duration,

    /// Generation options
    pub generation: GenerationOptions,

    /// Whether to append tool descriptions to the system prompt
    pub inject_tool_descriptions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            tool_timeout: Duration::from_secs(60),
            generation: GenerationOptions::default(),
            inject_tool_descriptions: true,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant.

When you need to use a tool, respond with a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

After receiving tool results, synthesize them into a helpful response.
If you can answer directly without tools, do so.
Be concise and accurate."#;

/// Text of the terminal turn appended when the iteration cap is reached
pub const GIVE_UP_TEXT: &str =
    "I was unable to finish answering this question within the allowed number of steps. \
     Please try rephrasing or asking a simpler question.";

/// Loop phase. `ExecutingTools` carries the pending requests from the
/// assistant turn that produced them.
enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Terminal(String),
}

/// The agent: a provider, a closed tool set, and the loop configuration.
///
/// Cheap to clone; all heavy state is behind `Arc`.
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Build the full system prompt including tool descriptions
    fn build_system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tools.generate_prompt_section());
        }

        prompt
    }

    /// Create the per-invocation transcript, seeded with one user turn
    pub fn seed_conversation(&self, question: &str) -> Conversation {
        let mut conversation = Conversation::with_system_prompt(self.build_system_prompt());
        conversation.push(Turn::user(question));
        conversation
    }

    /// Synchronous façade: drive the loop to terminal and return the final
    /// assistant turn's text.
    pub async fn run(&self, question: &str) -> Result<String> {
        let mut conversation = self.seed_conversation(question);
        self.run_conversation(&mut conversation).await
    }

    /// Drive an already-seeded transcript to terminal
    pub async fn run_conversation(&self, conversation: &mut Conversation) -> Result<String> {
        self.drive(conversation, None).await
    }

    /// Streaming façade: one fragment per appended turn with non-empty text,
    /// final answer last. On internal failure the stream yields a single
    /// error-labelled fragment and ends. Dropping the receiver stops the
    /// producer task at its next emission.
    pub fn run_stream(&self, question: &str) -> ReceiverStream<String> {
        let (tx, rx) = mpsc::channel(16);
        let agent = self.clone();
        let question = question.to_string();

        tokio::spawn(async move {
            let mut conversation = agent.seed_conversation(&question);
            if let Err(e) = agent.drive(&mut conversation, Some(&tx)).await {
                let _ = tx.send(format!("Error: {}", e.user_message())).await;
            }
        });

        ReceiverStream::new(rx)
    }

    /// The state machine. `events`, when present, receives the text of every
    /// appended turn with non-empty content.
    async fn drive(
        &self,
        conversation: &mut Conversation,
        events: Option<&mpsc::Sender<String>>,
    ) -> Result<String> {
        let mut state = LoopState::AwaitingModel;
        let mut iterations = 0usize;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    iterations += 1;

                    if iterations > self.config.max_iterations {
                        let turn = Turn::assistant(GIVE_UP_TEXT);
                        emit(events, &turn.content).await?;
                        conversation.push(turn);
                        tracing::warn!(
                            max = self.config.max_iterations,
                            "iteration cap reached, giving up"
                        );
                        LoopState::Terminal(GIVE_UP_TEXT.into())
                    } else {
                        let completion = self.complete_with_retry(conversation).await?;
                        let (prose, calls) = parse_tool_calls(&completion.content);

                        if calls.is_empty() {
                            let turn = Turn::assistant(completion.content.clone());
                            emit(events, &turn.content).await?;
                            conversation.push(turn);
                            LoopState::Terminal(completion.content)
                        } else {
                            let turn = Turn::assistant_with_calls(prose, calls.clone());
                            emit(events, &turn.content).await?;
                            conversation.push(turn);
                            LoopState::ExecutingTools(calls)
                        }
                    }
                }

                LoopState::ExecutingTools(calls) => {
                    // One result turn per pending request, each carrying the
                    // id of the request it resolves. Requests are independent;
                    // sequential dispatch keeps the transcript deterministic.
                    for call in &calls {
                        let result = self.execute_tool(call).await;
                        let turn = Turn::tool(format_tool_result(&result), result.id.clone());
                        emit(events, &turn.content).await?;
                        conversation.push(turn);
                    }
                    LoopState::AwaitingModel
                }

                LoopState::Terminal(answer) => return Ok(answer),
            };
        }
    }

    /// Model call with bounded retry for retryable transport errors
    async fn complete_with_retry(&self, conversation: &Conversation) -> Result<Completion> {
        let mut attempt = 0usize;

        loop {
            match self
                .provider
                .complete(conversation.turns(), &self.config.generation)
                .await
            {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay * (1 << (attempt - 1)) as u32;
                    tracing::warn!(attempt, error = %e, "retryable provider error, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one tool call. Failures and timeouts become failure results,
    /// never errors: the model is the recovery mechanism.
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        tracing::debug!(tool = %call.name, id = %call.id, "executing tool");

        match tokio::time::timeout(self.config.tool_timeout, self.tools.execute(call)).await {
            Ok(Ok(result)) => result.with_id(call.id.clone()),
            Ok(Err(e)) => {
                ToolResult::failure(call.name.clone(), format!("Error: {}", e)).with_id(call.id.clone())
            }
            Err(_) => ToolResult::failure(
                call.name.clone(),
                format!(
                    "Error: tool timed out after {}s",
                    self.config.tool_timeout.as_secs()
                ),
            )
            .with_id(call.id.clone()),
        }
    }

    /// The tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The loop configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

async fn emit(events: Option<&mpsc::Sender<String>>, text: &str) -> Result<()> {
    if let Some(tx) = events {
        if !text.is_empty() && tx.send(text.to_string()).await.is_err() {
            return Err(AgentError::Other("stream closed by consumer".into()));
        }
    }
    Ok(())
}

/// Frame a tool result for the transcript
fn format_tool_result(result: &ToolResult) -> String {
    if result.success {
        format!("[Tool '{}' returned]\n{}", result.name, result.output)
    } else {
        format!("[Tool '{}' failed]\n{}", result.name, result.output)
    }
}

/// Extract every fenced ```tool block from a model response.
///
/// Returns the remaining prose (block text removed) and the parsed requests
/// in order of appearance, each with an id. Malformed blocks are left in the
/// prose untouched. When no fenced block parses, a single inline JSON object
/// with a "tool" key is accepted as a fallback.
pub fn parse_tool_calls(content: &str) -> (String, Vec<ToolCall>) {
    const OPEN: &str = "```tool";
    const CLOSE: &str = "```";

    let mut prose = String::new();
    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };

        match serde_json::from_str::<ToolCall>(after[..end].trim()) {
            Ok(mut call) if !call.name.is_empty() => {
                if call.id.is_empty() {
                    call.id = uuid::Uuid::new_v4().to_string();
                }
                prose.push_str(&rest[..start]);
                calls.push(call);
            }
            _ => {
                prose.push_str(&rest[..start + OPEN.len() + end + CLOSE.len()]);
            }
        }

        rest = &after[end + CLOSE.len()..];
    }
    prose.push_str(rest);

    if calls.is_empty() {
        if let Some(call) = parse_inline_tool_call(content) {
            return (String::new(), vec![call]);
        }
    }

    (prose.trim().to_string(), calls)
}

/// Fallback: a bare JSON object with a "tool" key, no fences
fn parse_inline_tool_call(content: &str) -> Option<ToolCall> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    let mut call = serde_json::from_str::<ToolCall>(&content[start..=end]).ok()?;
    if call.name.is_empty() {
        return None;
    }
    if call.id.is_empty() {
        call.id = uuid::Uuid::new_v4().to_string();
    }
    Some(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tool::{ParameterSchema, Tool, ToolSchema};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    /// Provider that replays a fixed script of responses
    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _turns: &[Turn], options: &GenerationOptions) -> Result<Completion> {
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Provider("script exhausted".into()))?;
            Ok(Completion {
                content,
                model: options.model.clone(),
                usage: None,
            })
        }
    }

    /// Provider that fails N times with a retryable error, then answers
    struct FlakyProvider {
        remaining_failures: Mutex<usize>,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _turns: &[Turn], options: &GenerationOptions) -> Result<Completion> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AgentError::ProviderUnavailable("connection refused".into()));
            }
            Ok(Completion {
                content: "recovered".into(),
                model: options.model.clone(),
                usage: None,
            })
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "Echo the input back".into(),
                parameters: vec![ParameterSchema {
                    name: "text".into(),
                    param_type: "string".into(),
                    description: "Text to echo".into(),
                    required: true,
                }],
            }
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
            let text = call
                .arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(ToolResult::success("echo", text))
        }
    }

    fn agent_with(provider: impl LlmProvider + 'static, config: AgentConfig) -> Agent {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        Agent::new(Arc::new(provider), Arc::new(tools), config)
    }

    fn fast_config() -> AgentConfig {
        AgentConfig {
            retry_base_delay: Duration::from_millis(1),
            ..AgentConfig::default()
        }
    }

    const ECHO_CALL: &str = "```tool\n{\"tool\": \"echo\", \"arguments\": {\"text\": \"hi\"}}\n```";

    #[test]
    fn test_parse_fenced_tool_call() {
        let (prose, calls) = parse_tool_calls("Let me check.\n```tool\n{\"tool\": \"echo\", \"arguments\": {\"text\": \"hi\"}}\n```");
        assert_eq!(prose, "Let me check.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert!(!calls[0].id.is_empty());
    }

    #[test]
    fn test_parse_multiple_blocks_in_order() {
        let content = format!("{}\nand also\n{}", ECHO_CALL, ECHO_CALL.replace("hi", "bye"));
        let (prose, calls) = parse_tool_calls(&content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["text"], "hi");
        assert_eq!(calls[1].arguments["text"], "bye");
        assert_eq!(prose, "and also");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_malformed_block_stays_prose() {
        let content = "```tool\nnot json at all\n```";
        let (prose, calls) = parse_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(prose, content);
    }

    #[test]
    fn test_inline_fallback() {
        let (_, calls) = parse_tool_calls(r#"{"tool": "echo", "arguments": {"text": "hi"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
    }

    #[test]
    fn test_plain_prose_has_no_calls() {
        let (prose, calls) = parse_tool_calls("The total revenue was $12,345.");
        assert!(calls.is_empty());
        assert_eq!(prose, "The total revenue was $12,345.");
    }

    #[tokio::test]
    async fn test_no_tool_question_terminates_in_one_iteration() {
        let agent = agent_with(ScriptedProvider::new(&["The answer is 4."]), fast_config());
        let mut conversation = agent.seed_conversation("What is 2 + 2?");

        let answer = agent.run_conversation(&mut conversation).await.unwrap();

        assert_eq!(answer, "The answer is 4.");
        assert_eq!(conversation.count_role(&Role::Assistant), 1);
        assert_eq!(conversation.count_role(&Role::Tool), 0);
    }

    #[tokio::test]
    async fn test_tool_round_trip_preserves_request_id() {
        let agent = agent_with(
            ScriptedProvider::new(&[ECHO_CALL, "The tool said: hi"]),
            fast_config(),
        );
        let mut conversation = agent.seed_conversation("Echo hi for me");

        let answer = agent.run_conversation(&mut conversation).await.unwrap();
        assert_eq!(answer, "The tool said: hi");

        let turns = conversation.turns();
        let request_turn = turns
            .iter()
            .find(|t| t.has_tool_calls())
            .expect("assistant turn with a call");
        let result_turn = turns
            .iter()
            .find(|t| t.role == Role::Tool)
            .expect("tool result turn");

        assert_eq!(request_turn.tool_calls.len(), 1);
        assert_eq!(
            result_turn.tool_call_id.as_deref(),
            Some(request_turn.tool_calls[0].id.as_str())
        );
        assert!(result_turn.content.contains("hi"));
        assert_eq!(conversation.count_role(&Role::Tool), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_contained_and_loop_continues() {
        let bogus = "```tool\n{\"tool\": \"bogus\", \"arguments\": {}}\n```";
        let agent = agent_with(
            ScriptedProvider::new(&[bogus, "I could not use that tool."]),
            fast_config(),
        );
        let mut conversation = agent.seed_conversation("Use a tool that does not exist");

        let answer = agent.run_conversation(&mut conversation).await.unwrap();
        assert_eq!(answer, "I could not use that tool.");

        let result_turn = conversation
            .turns()
            .iter()
            .find(|t| t.role == Role::Tool)
            .unwrap();
        assert!(result_turn.content.contains("failed"));
    }

    #[tokio::test]
    async fn test_iteration_cap_yields_give_up_turn() {
        struct AlwaysToolProvider;

        #[async_trait]
        impl LlmProvider for AlwaysToolProvider {
            async fn health_check(&self) -> Result<bool> {
                Ok(true)
            }
            async fn complete(&self, _: &[Turn], o: &GenerationOptions) -> Result<Completion> {
                Ok(Completion {
                    content: ECHO_CALL.into(),
                    model: o.model.clone(),
                    usage: None,
                })
            }
        }

        let config = AgentConfig {
            max_iterations: 3,
            ..fast_config()
        };
        let agent = agent_with(AlwaysToolProvider, config);
        let mut conversation = agent.seed_conversation("Loop forever");

        let answer = agent.run_conversation(&mut conversation).await.unwrap();
        assert_eq!(answer, GIVE_UP_TEXT);
        assert_eq!(conversation.last().unwrap().content, GIVE_UP_TEXT);
        // 3 request turns + the give-up turn
        assert_eq!(conversation.count_role(&Role::Assistant), 4);
    }

    #[tokio::test]
    async fn test_empty_question_still_seeds_user_turn() {
        let agent = agent_with(ScriptedProvider::new(&[""]), fast_config());
        let mut conversation = agent.seed_conversation("");

        assert_eq!(conversation.count_role(&Role::User), 1);
        assert_eq!(conversation.turns()[1].content, "");

        let answer = agent.run_conversation(&mut conversation).await.unwrap();
        assert_eq!(answer, "");
        assert_eq!(conversation.count_role(&Role::Assistant), 1);
    }

    #[tokio::test]
    async fn test_retryable_provider_error_is_retried() {
        let provider = FlakyProvider {
            remaining_failures: Mutex::new(2),
        };
        let agent = agent_with(provider, fast_config());

        let answer = agent.run("hello").await.unwrap();
        assert_eq!(answer, "recovered");
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_surfaces_error() {
        let provider = FlakyProvider {
            remaining_failures: Mutex::new(10),
        };
        let agent = agent_with(provider, fast_config());

        let err = agent.run("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_then_closes() {
        let agent = agent_with(
            ScriptedProvider::new(&[ECHO_CALL, "Final answer."]),
            fast_config(),
        );

        let fragments: Vec<String> = agent.run_stream("Echo hi").collect().await;

        assert!(!fragments.is_empty());
        assert_eq!(fragments.last().unwrap(), "Final answer.");
        // The tool-result fragment precedes the final answer
        assert!(fragments.iter().any(|f| f.contains("[Tool 'echo' returned]")));
    }

    #[tokio::test]
    async fn test_stream_failure_yields_single_error_fragment() {
        let agent = agent_with(ScriptedProvider::new(&[]), fast_config());

        let fragments: Vec<String> = agent.run_stream("anything").collect().await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("Error:"));
    }

    /// Tool that parks its blocking thread well past any configured timeout
    struct SlowBlockingTool;

    #[async_trait]
    impl Tool for SlowBlockingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "slow".into(),
                description: "Takes a long time".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _call: &ToolCall) -> Result<ToolResult> {
            let done = tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_millis(500));
                "done"
            })
            .await
            .map_err(|e| AgentError::Other(e.to_string()))?;
            Ok(ToolResult::success("slow", done))
        }
    }

    #[tokio::test]
    async fn test_blocking_tool_is_cut_off_by_timeout() {
        let slow_call = "```tool\n{\"tool\": \"slow\", \"arguments\": {}}\n```";
        let mut tools = ToolRegistry::new();
        tools.register(SlowBlockingTool);
        let config = AgentConfig {
            tool_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let agent = Agent::new(
            Arc::new(ScriptedProvider::new(&[slow_call, "Gave up on the tool."])),
            Arc::new(tools),
            config,
        );

        let mut conversation = agent.seed_conversation("take your time");
        let answer = agent.run_conversation(&mut conversation).await.unwrap();
        assert_eq!(answer, "Gave up on the tool.");

        let result_turn = conversation
            .turns()
            .iter()
            .find(|t| t.role == Role::Tool)
            .unwrap();
        assert!(result_turn.content.contains("failed"));
        assert!(result_turn.content.contains("timed out"));
    }

    /// Provider that counts its calls and always requests another tool
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _: &[Turn], o: &GenerationOptions) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                content: ECHO_CALL.into(),
                model: o.model.clone(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_dropped_stream_receiver_stops_producer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = AgentConfig {
            max_iterations: 100,
            ..fast_config()
        };
        let agent = agent_with(
            CountingProvider {
                calls: calls.clone(),
            },
            config,
        );

        let mut fragments = agent.run_stream("loop forever");
        assert!(fragments.next().await.is_some());
        drop(fragments);

        // The producer halts at its next send into the closed channel,
        // long before the iteration cap.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = calls.load(Ordering::SeqCst);
        assert!(settled < 100);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }
}
