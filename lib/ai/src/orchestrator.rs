//! The tool-calling chat loop.
//!
//! Each step sends the system prompt, the conversation so far and the full
//! tool catalogue to the model, forwarding its text as it streams in. If
//! the model asks for tools, they run
//! concurrently and their results are fed back in completion order; the
//! loop ends when the model answers without tools or the step cap is hit.
//! The whole turn is bounded by a maximum duration.

use crate::backend::{
    ChatModel, ContentBlock, ModelChunk, ModelMessage, ModelRequest, ModelResponse, ModelRole,
    ToolUse,
};
use crate::error::LlmError;
use crate::event::{ChatEvent, FinishReason};
use beyond_ops_conversation::{ChatMessage, ToolInvocation};
use beyond_ops_tools::{ToolRunner, is_error_payload};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_STEPS: u32 = 5;
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);

const EVENT_BUFFER: usize = 32;

/// Limits applied to one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub max_steps: u32,
    pub max_duration: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

/// Runs chat turns against a model and a tool runner.
#[derive(Clone)]
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolRunner>,
    settings: ChatSettings,
}

enum Halt {
    /// The receiving side of the stream is gone.
    Closed,
    Model(Report<LlmError>),
}

/// What the assistant said and did during a turn.
#[derive(Default)]
struct Transcript {
    text: Vec<String>,
    invocations: Vec<ToolInvocation>,
    steps: u32,
}

impl Transcript {
    fn into_message(self) -> ChatMessage {
        let mut message = ChatMessage::assistant(self.text.join("\n\n"));
        if !self.invocations.is_empty() {
            message.tool_invocations = Some(self.invocations);
        }
        message
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolRunner>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            model,
            tools,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> ChatSettings {
        self.settings
    }

    /// Starts a turn and returns its event stream.
    ///
    /// The turn runs on its own task. Dropping the receiver stops it: a
    /// model step in flight is dropped mid-stream and no further tools are
    /// dispatched. Tool calls already running are abandoned, not undone.
    pub fn stream(
        &self,
        system: String,
        messages: Vec<ModelMessage>,
    ) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        tokio::spawn(async move { this.run(system, messages, tx).await });
        rx
    }

    async fn run(self, system: String, messages: Vec<ModelMessage>, tx: mpsc::Sender<ChatEvent>) {
        let started = Instant::now();
        let mut request = ModelRequest {
            system,
            messages,
            tools: self.tools.definitions(),
        };
        let mut transcript = Transcript::default();

        let outcome = tokio::time::timeout(
            self.settings.max_duration,
            self.steps(&mut request, &tx, &mut transcript),
        )
        .await;

        let reason = match outcome {
            Ok(Ok(reason)) => reason,
            Ok(Err(Halt::Closed)) => FinishReason::Cancelled,
            Ok(Err(Halt::Model(report))) => {
                warn!(
                    steps = transcript.steps,
                    error = %report.current_context(),
                    "chat turn failed"
                );
                let _ = tx
                    .send(ChatEvent::Error {
                        message: report.current_context().to_string(),
                    })
                    .await;
                return;
            }
            Err(_) => FinishReason::Timeout,
        };

        info!(
            %reason,
            steps = transcript.steps,
            tool_calls = transcript.invocations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat turn finished"
        );
        if reason == FinishReason::Cancelled {
            return;
        }
        let steps = transcript.steps;
        let _ = tx
            .send(ChatEvent::Finish {
                reason,
                steps,
                message: transcript.into_message(),
            })
            .await;
    }

    async fn steps(
        &self,
        request: &mut ModelRequest,
        tx: &mpsc::Sender<ChatEvent>,
        transcript: &mut Transcript,
    ) -> Result<FinishReason, Halt> {
        for step in 1..=self.settings.max_steps {
            if tx.is_closed() {
                return Err(Halt::Closed);
            }
            let response = self.model_step(request, tx).await?;
            transcript.steps = step;

            let text = response.text();
            if !text.is_empty() {
                transcript.text.push(text);
            }

            let uses = response.tool_uses();
            request.messages.push(response.into_message());
            debug!(step, tool_calls = uses.len(), "model step");

            if uses.is_empty() {
                emit(tx, ChatEvent::StepFinish { step, tool_calls: 0 }).await?;
                return Ok(FinishReason::Stop);
            }

            let results = self.dispatch(&uses, tx, transcript).await?;
            request.messages.push(ModelMessage {
                role: ModelRole::User,
                content: results,
            });
            emit(
                tx,
                ChatEvent::StepFinish {
                    step,
                    tool_calls: uses.len(),
                },
            )
            .await?;
        }
        Ok(FinishReason::StepLimit)
    }

    /// Streams one model step, forwarding text as it arrives. Returns as
    /// soon as the receiver goes away, which drops the model stream.
    async fn model_step(
        &self,
        request: &ModelRequest,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<ModelResponse, Halt> {
        let mut chunks = tokio::select! {
            opened = self.model.stream(request) => opened.map_err(Halt::Model)?,
            () = tx.closed() => return Err(Halt::Closed),
        };
        loop {
            let next = tokio::select! {
                next = chunks.next() => next,
                () = tx.closed() => return Err(Halt::Closed),
            };
            match next {
                Some(Ok(ModelChunk::Text(text))) if text.is_empty() => {}
                Some(Ok(ModelChunk::Text(text))) => emit(tx, ChatEvent::TextDelta { text }).await?,
                Some(Ok(ModelChunk::Done(response))) => return Ok(response),
                Some(Err(report)) => return Err(Halt::Model(report)),
                None => {
                    let ended = LlmError::ResponseParseFailed {
                        reason: "model stream ended before the step completed".to_string(),
                    };
                    return Err(Halt::Model(ended.into()));
                }
            }
        }
    }

    /// Runs one step's tool calls concurrently, reporting each result as it
    /// completes.
    async fn dispatch(
        &self,
        uses: &[ToolUse],
        tx: &mpsc::Sender<ChatEvent>,
        transcript: &mut Transcript,
    ) -> Result<Vec<ContentBlock>, Halt> {
        for tool_use in uses {
            emit(
                tx,
                ChatEvent::ToolCall {
                    tool_call_id: tool_use.id.clone(),
                    tool_name: tool_use.name.clone(),
                    args: tool_use.input.clone(),
                },
            )
            .await?;
        }

        let mut pending: FuturesUnordered<_> = uses
            .iter()
            .map(|tool_use| {
                let tools = Arc::clone(&self.tools);
                async move {
                    let started = Instant::now();
                    let result = tools.run(&tool_use.name, tool_use.input.clone()).await;
                    debug!(
                        tool = %tool_use.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "tool finished"
                    );
                    (tool_use, result)
                }
            })
            .collect();

        let mut results = Vec::with_capacity(uses.len());
        while let Some((tool_use, result)) = pending.next().await {
            emit(
                tx,
                ChatEvent::ToolResult {
                    tool_call_id: tool_use.id.clone(),
                    tool_name: tool_use.name.clone(),
                    result: result.clone(),
                },
            )
            .await?;
            results.push(ContentBlock::ToolResult {
                tool_use_id: tool_use.id.clone(),
                content: result.to_string(),
                is_error: is_error_payload(&result),
            });
            transcript.invocations.push(ToolInvocation::completed(
                &tool_use.id,
                &tool_use.name,
                tool_use.input.clone(),
                result,
            ));
        }
        Ok(results)
    }
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ModelStream, StopReason, TokenUsage, single_response};
    use async_trait::async_trait;
    use beyond_ops_tools::{ToolDefinition, catalogue};
    use futures::{future, stream};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
        requests: Mutex<Vec<ModelRequest>>,
        delay: Duration,
        /// Once the script runs out, keep asking for this tool.
        repeat_tool: Option<&'static str>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, Report<LlmError>> {
            self.requests.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let response = match next {
                Some(Ok(response)) => response,
                Some(Err(err)) => return Err(err.into()),
                None => match self.repeat_tool {
                    Some(name) => tools(&[("toolu_again", name)]),
                    None => text("done"),
                },
            };
            Ok(single_response(response))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Streams text pieces with a pause before each, then the whole answer.
    struct DripModel {
        pieces: Vec<&'static str>,
        pause: Duration,
        /// Whether the stream ends with the assembled step.
        finishes: bool,
        /// Set once the stream has been dropped.
        dropped: Arc<AtomicBool>,
    }

    impl DripModel {
        fn new(pieces: Vec<&'static str>, pause: Duration) -> Self {
            Self {
                pieces,
                pause,
                finishes: true,
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl ChatModel for DripModel {
        async fn stream(&self, _request: &ModelRequest) -> Result<ModelStream, Report<LlmError>> {
            let guard = SetOnDrop(Arc::clone(&self.dropped));
            let pause = self.pause;
            let done: Option<Result<ModelChunk, Report<LlmError>>> = self
                .finishes
                .then(|| Ok(ModelChunk::Done(text(&self.pieces.concat()))));
            let pieces = stream::iter(self.pieces.clone()).then(move |piece| async move {
                tokio::time::sleep(pause).await;
                Ok::<_, Report<LlmError>>(ModelChunk::Text(piece.to_string()))
            });
            let last = stream::once(async move {
                let _guard = guard;
                done
            })
            .filter_map(future::ready);
            Ok(pieces.chain(last).boxed())
        }

        fn model(&self) -> &str {
            "drip"
        }
    }

    /// Answers each tool with a canned value after an optional delay.
    #[derive(Default)]
    struct RecordingRunner {
        delays: HashMap<&'static str, Duration>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolRunner for RecordingRunner {
        fn definitions(&self) -> Vec<ToolDefinition> {
            catalogue()
        }

        async fn run(&self, name: &str, args: JsonValue) -> JsonValue {
            self.calls.lock().unwrap().push(name.to_string());
            if let Some(delay) = self.delays.get(name) {
                tokio::time::sleep(*delay).await;
            }
            if name == "get_targets" {
                return json!({"error": "salesforce is not configured"});
            }
            json!({"tool": name, "args": args})
        }
    }

    fn text(text: &str) -> ModelResponse {
        ModelResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: Some(StopReason::EndTurn),
            usage: TokenUsage::default(),
        }
    }

    fn tools(calls: &[(&str, &str)]) -> ModelResponse {
        ModelResponse {
            content: calls
                .iter()
                .map(|(id, name)| ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: json!({}),
                })
                .collect(),
            stop_reason: Some(StopReason::ToolUse),
            usage: TokenUsage::default(),
        }
    }

    fn orchestrator(
        model: Arc<dyn ChatModel>,
        runner: Arc<RecordingRunner>,
        settings: ChatSettings,
    ) -> Orchestrator {
        Orchestrator::new(model, runner, settings)
    }

    /// Default limits and a runner that answers every tool.
    fn plain(model: Arc<dyn ChatModel>) -> Orchestrator {
        orchestrator(model, Arc::new(RecordingRunner::default()), ChatSettings::default())
    }

    async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn finish(events: &[ChatEvent]) -> (FinishReason, u32, ChatMessage) {
        match events.last() {
            Some(ChatEvent::Finish {
                reason,
                steps,
                message,
            }) => (*reason, *steps, message.clone()),
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answer_without_tools_stops_after_one_step() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(text("Hello Sam."))]));
        let runner = Arc::new(RecordingRunner::default());
        let orch = orchestrator(model.clone(), runner.clone(), ChatSettings::default());

        let events = collect(orch.stream("sys".to_string(), vec![ModelMessage::user("hi")])).await;

        assert_eq!(events[0], ChatEvent::TextDelta { text: "Hello Sam.".to_string() });
        assert_eq!(events[1], ChatEvent::StepFinish { step: 1, tool_calls: 0 });
        let (reason, steps, message) = finish(&events);
        assert_eq!(reason, FinishReason::Stop);
        assert_eq!(steps, 1);
        assert_eq!(message.content, "Hello Sam.");
        assert!(message.tool_invocations.is_none());

        let requests = model.requests();
        assert_eq!(requests[0].system, "sys");
        assert_eq!(requests[0].tools.len(), 16);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_results_are_fed_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tools(&[("toolu_1", "get_pipeline")])),
            Ok(text("You have three open deals.")),
        ]));
        let runner = Arc::new(RecordingRunner::default());
        let orch = orchestrator(model.clone(), runner, ChatSettings::default());

        let rx = orch.stream("sys".to_string(), vec![ModelMessage::user("pipeline?")]);
        let events = collect(rx).await;

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ChatEvent::TextDelta { .. } => "text",
                ChatEvent::ToolCall { .. } => "call",
                ChatEvent::ToolResult { .. } => "result",
                ChatEvent::StepFinish { .. } => "step",
                ChatEvent::Finish { .. } => "finish",
                ChatEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(kinds, ["call", "result", "step", "text", "step", "finish"]);

        let second = &model.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[2].role, ModelRole::User);
        assert!(matches!(
            &second.messages[2].content[0],
            ContentBlock::ToolResult { tool_use_id, is_error: false, .. }
                if tool_use_id == "toolu_1"
        ));

        let (_, steps, message) = finish(&events);
        assert_eq!(steps, 2);
        assert_eq!(message.tool_invocations().len(), 1);
        assert_eq!(message.tool_invocations()[0].tool_name, "get_pipeline");
    }

    #[tokio::test]
    async fn independent_tools_report_in_completion_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tools(&[("slow", "get_clients"), ("fast", "get_reps")])),
            Ok(text("ok")),
        ]));
        let runner = Arc::new(RecordingRunner {
            delays: HashMap::from([("get_clients", Duration::from_millis(50))]),
            ..RecordingRunner::default()
        });
        let orch = orchestrator(model.clone(), runner.clone(), ChatSettings::default());

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("x")])).await;

        let results: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, ["fast", "slow"]);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn error_payloads_are_flagged_to_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tools(&[("toolu_1", "get_targets")])),
            Ok(text("Targets are unavailable.")),
        ]));
        let orch = plain(model.clone());

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("targets")])).await;

        assert_eq!(finish(&events).0, FinishReason::Stop);
        assert!(matches!(
            &model.requests()[1].messages[2].content[0],
            ContentBlock::ToolResult { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn step_cap_ends_the_turn() {
        let model = Arc::new(ScriptedModel {
            repeat_tool: Some("get_leads"),
            ..ScriptedModel::default()
        });
        let runner = Arc::new(RecordingRunner::default());
        let settings = ChatSettings {
            max_steps: 2,
            ..ChatSettings::default()
        };
        let orch = orchestrator(model.clone(), runner.clone(), settings);

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("loop")])).await;

        let (reason, steps, _) = finish(&events);
        assert_eq!(reason, FinishReason::StepLimit);
        assert_eq!(steps, 2);
        assert_eq!(model.requests().len(), 2);
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_emits_error_without_finish() {
        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::RateLimited {
            retry_after_secs: Some(20),
        })]));
        let orch = plain(model);

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("hi")])).await;

        assert_eq!(
            events,
            vec![ChatEvent::Error {
                message: "rate limited, retry after 20s".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn slow_turn_times_out() {
        let model = Arc::new(ScriptedModel {
            delay: Duration::from_millis(200),
            ..ScriptedModel::default()
        });
        let settings = ChatSettings {
            max_duration: Duration::from_millis(20),
            ..ChatSettings::default()
        };
        let orch = orchestrator(model, Arc::new(RecordingRunner::default()), settings);

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("hi")])).await;

        assert_eq!(events.len(), 1);
        assert_eq!(finish(&events).0, FinishReason::Timeout);
    }

    #[tokio::test]
    async fn dropped_stream_stops_before_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(tools(&[(
            "toolu_1",
            "update_deal_stage",
        )]))]));
        let runner = Arc::new(RecordingRunner::default());
        let orch = orchestrator(model.clone(), runner.clone(), ChatSettings::default());

        drop(orch.stream(String::new(), vec![ModelMessage::user("close it")]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(model.requests().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_is_forwarded_as_it_streams() {
        let model = Arc::new(DripModel::new(
            vec!["Three ", "open ", "deals."],
            Duration::from_millis(1),
        ));
        let orch = plain(model);

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("deals?")])).await;

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, ["Three ", "open ", "deals."]);
        let (reason, _, message) = finish(&events);
        assert_eq!(reason, FinishReason::Stop);
        assert_eq!(message.content, "Three open deals.");
    }

    #[tokio::test]
    async fn dropped_stream_abandons_the_model_step() {
        let model = Arc::new(DripModel::new(
            vec!["One", "two", "three", "four"],
            Duration::from_millis(50),
        ));
        let dropped = Arc::clone(&model.dropped);
        let orch = plain(model);

        let mut rx = orch.stream(String::new(), vec![ModelMessage::user("count")]);
        assert_eq!(rx.recv().await, Some(ChatEvent::TextDelta { text: "One".to_string() }));
        drop(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_without_step_is_an_error() {
        let model = Arc::new(DripModel {
            finishes: false,
            ..DripModel::new(vec!["Hal"], Duration::ZERO)
        });
        let orch = plain(model);

        let events = collect(orch.stream(String::new(), vec![ModelMessage::user("hi")])).await;

        assert_eq!(
            events,
            vec![
                ChatEvent::TextDelta { text: "Hal".to_string() },
                ChatEvent::Error {
                    message: "failed to parse LLM response: \
                              model stream ended before the step completed"
                        .to_string()
                },
            ]
        );
    }
}
