use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::settings::TurnSettings;
use crate::chat::{AgentConfig, Chat, Message, ToolCall, ToolResult};
use crate::context::{context_budget, slice_list_to_context_length};
use crate::core::config::ChatSettings;
use crate::core::errors::{tools_unsupported_advisory, EngineError};
use crate::history::ChatStore;
use crate::llm::{ChatRequest, LlmService, ResolvedModel, StreamEvent};
use crate::rag::{format_context, RetrievalResolver, RetrievalResult};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    WaitingForFirstToken,
    Generating,
    ToolExecution,
    Error,
}

#[derive(Debug, Clone)]
pub enum TurnEvent {
    StateChanged(TurnState),
    /// Snapshot after every applied chunk or appended message.
    ChatUpdated(Chat),
    /// User-facing notice.
    Advisory(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing to respond to; the chat was not touched.
    Rejected,
    Completed,
    /// Stopped by the caller. The chat holds whatever was applied before.
    Cancelled,
    /// Calls that need explicit approval before the turn can continue.
    AwaitingToolApproval(Vec<ToolCall>),
}

/// Per-turn handles owned by the caller.
#[derive(Clone, Default)]
pub struct TurnContext {
    pub cancel: CancellationToken,
    pub events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

struct StateTracker<'a> {
    ctx: &'a TurnContext,
    state: TurnState,
}

impl<'a> StateTracker<'a> {
    fn new(ctx: &'a TurnContext) -> Self {
        Self {
            ctx,
            state: TurnState::Idle,
        }
    }

    fn transition(&mut self, state: TurnState) {
        if self.state != state {
            self.state = state;
            self.ctx.emit(TurnEvent::StateChanged(state));
        }
    }

    fn fail(&mut self, chat: &Chat, err: EngineError) -> EngineError {
        tracing::error!(chat_id = %chat.id, "Turn failed: {}", err);
        if self.state != TurnState::Idle {
            self.transition(TurnState::Error);
        }
        self.ctx.emit(TurnEvent::Advisory(err.advisory()));
        self.transition(TurnState::Idle);
        err
    }
}

enum StreamOutcome {
    Finished(Vec<ToolCall>),
    Cancelled,
}

/// Drives conversational turns: retrieval on the first turn, streaming,
/// and the tool-call loop.
///
/// One turn per chat at a time; callers wait for a turn to finish or be
/// cancelled before starting the next one.
#[derive(Clone)]
pub struct ChatOrchestrator {
    llm: LlmService,
    store: Arc<dyn ChatStore>,
    retrieval: RetrievalResolver,
    tools: ToolRegistry,
    chat_settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        llm: LlmService,
        store: Arc<dyn ChatStore>,
        retrieval: RetrievalResolver,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            llm,
            store,
            retrieval,
            tools,
            chat_settings: ChatSettings::default(),
        }
    }

    pub fn with_chat_settings(mut self, chat_settings: ChatSettings) -> Self {
        self.chat_settings = chat_settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub async fn handle_turn(
        &self,
        chat: &mut Chat,
        user_input: &str,
        agent: &AgentConfig,
        ctx: &TurnContext,
    ) -> Result<TurnOutcome, EngineError> {
        let input = user_input.trim();
        if input.is_empty() && chat.is_empty() {
            return Ok(TurnOutcome::Rejected);
        }

        let mut tracker = StateTracker::new(ctx);
        let (settings, model) = match self.prepare(chat).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(tracker.fail(chat, err)),
        };

        if chat.is_empty() {
            if let Err(err) = self.seed_chat(chat, input, agent, &model, &settings).await {
                return Err(tracker.fail(chat, err));
            }
        } else if !input.is_empty() {
            chat.push_message(Message::user(input));
        }

        if let Err(err) = self.store.save_chat(chat).await {
            return Err(tracker.fail(chat, err));
        }
        ctx.emit(TurnEvent::ChatUpdated(chat.clone()));

        self.run_loop(chat, &model, &settings, &mut tracker).await
    }

    /// Execute a call that was held back for approval, then continue the turn
    /// once nothing is pending.
    pub async fn run_pending_tool_call(
        &self,
        chat: &mut Chat,
        call_id: &str,
        ctx: &TurnContext,
    ) -> Result<TurnOutcome, EngineError> {
        let mut tracker = StateTracker::new(ctx);
        let call = chat
            .pending_tool_calls()
            .into_iter()
            .find(|c| c.id == call_id)
            .ok_or_else(|| EngineError::ToolExecution {
                tool: String::new(),
                message: format!("no pending tool call with id {}", call_id),
            })?;

        tracker.transition(TurnState::ToolExecution);
        if let Err(err) = self.execute_call(chat, &call).await {
            return Err(tracker.fail(chat, err));
        }
        if let Err(err) = self.store.save_chat(chat).await {
            return Err(tracker.fail(chat, err));
        }
        ctx.emit(TurnEvent::ChatUpdated(chat.clone()));

        let pending = chat.pending_tool_calls();
        if !pending.is_empty() {
            tracker.transition(TurnState::Idle);
            return Ok(TurnOutcome::AwaitingToolApproval(pending));
        }

        let (settings, model) = match self.prepare(chat).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(tracker.fail(chat, err)),
        };
        self.run_loop(chat, &model, &settings, &mut tracker).await
    }

    async fn prepare(&self, chat: &Chat) -> Result<(TurnSettings, ResolvedModel), EngineError> {
        let settings = TurnSettings::load(self.store.as_ref(), &self.chat_settings).await?;
        let model_name = settings.default_llm.clone().ok_or_else(|| {
            EngineError::Configuration(
                "No default LLM selected. Please choose one in settings.".to_string(),
            )
        })?;
        let model = self.llm.resolve(&model_name).await?;
        tracing::debug!(chat_id = %chat.id, model = %model_name, "Prepared turn");
        Ok((settings, model))
    }

    async fn seed_chat(
        &self,
        chat: &mut Chat,
        query: &str,
        agent: &AgentConfig,
        model: &ResolvedModel,
        settings: &TurnSettings,
    ) -> Result<(), EngineError> {
        let filters = agent.filters_for_input(query);
        let results = self.retrieval.resolve(query, &filters).await?;

        let prompt_tokens: usize = agent
            .seed_messages(query, "", &[])
            .iter()
            .map(|m| model.tokenizer.count(&m.text()))
            .sum();
        let budget = context_budget(
            model.config.context_length,
            prompt_tokens,
            settings.output_token_reserve,
        );
        let results = fit_results(results, model, budget);
        let context = format_context(&results);

        tracing::info!(
            chat_id = %chat.id,
            results = results.len(),
            agent = %agent.name,
            "Seeding chat with retrieved context"
        );

        chat.tool_definitions = agent.tool_definitions.clone();
        chat.agent = Some(agent.clone());
        for message in agent.seed_messages(query, &context, &results) {
            chat.push_message(message);
        }
        Ok(())
    }

    async fn run_loop(
        &self,
        chat: &mut Chat,
        model: &ResolvedModel,
        settings: &TurnSettings,
        tracker: &mut StateTracker<'_>,
    ) -> Result<TurnOutcome, EngineError> {
        let ctx = tracker.ctx;
        let mut rounds = 0;
        let mut retried_without_tools = false;

        loop {
            tracker.transition(TurnState::WaitingForFirstToken);
            let snapshot = chat.messages.clone();

            let request = ChatRequest::new(
                model.config.model_name.clone(),
                chat.messages_for_backend(),
            )
            .with_tools(chat.tool_definitions.clone())
            .with_params(settings.params.clone());

            let calls = match self.stream_once(chat, model, request, tracker).await {
                Ok(StreamOutcome::Finished(calls)) => calls,
                Ok(StreamOutcome::Cancelled) => {
                    tracing::info!(chat_id = %chat.id, "Turn cancelled");
                    return Ok(TurnOutcome::Cancelled);
                }
                Err(EngineError::ToolsUnsupported(model_name))
                    if !chat.tool_definitions.is_empty() && !retried_without_tools =>
                {
                    tracing::warn!(
                        chat_id = %chat.id,
                        model = %model_name,
                        "Model does not support tools, retrying without them"
                    );
                    chat.messages = snapshot;
                    chat.tool_definitions.clear();
                    retried_without_tools = true;
                    ctx.emit(TurnEvent::Advisory(tools_unsupported_advisory()));
                    continue;
                }
                Err(err) => return Err(tracker.fail(chat, err)),
            };

            if !calls.is_empty() && rounds >= settings.max_tool_rounds {
                return Err(tracker.fail(chat, EngineError::ToolLoopLimit(rounds)));
            }

            let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
            if let Err(err) = chat.append_tool_calls(calls) {
                chat.messages = snapshot;
                return Err(tracker.fail(chat, err));
            }

            if ids.is_empty() {
                if let Err(err) = self.store.save_chat(chat).await {
                    return Err(tracker.fail(chat, err));
                }
                tracker.transition(TurnState::Idle);
                return Ok(TurnOutcome::Completed);
            }

            tracker.transition(TurnState::ToolExecution);
            let awaiting = match self.execute_round(chat, &ids).await {
                Ok(awaiting) => awaiting,
                Err(err) => {
                    if let Err(save_err) = self.store.save_chat(chat).await {
                        tracing::error!(chat_id = %chat.id, "Failed to save chat: {}", save_err);
                    }
                    return Err(tracker.fail(chat, err));
                }
            };
            if let Err(err) = self.store.save_chat(chat).await {
                return Err(tracker.fail(chat, err));
            }
            ctx.emit(TurnEvent::ChatUpdated(chat.clone()));

            if !awaiting.is_empty() {
                tracker.transition(TurnState::Idle);
                return Ok(TurnOutcome::AwaitingToolApproval(awaiting));
            }

            rounds += 1;
        }
    }

    async fn stream_once(
        &self,
        chat: &mut Chat,
        model: &ResolvedModel,
        request: ChatRequest,
        tracker: &mut StateTracker<'_>,
    ) -> Result<StreamOutcome, EngineError> {
        let ctx = tracker.ctx;
        let mut rx = model.stream(request, ctx.cancel.clone()).await?;
        let mut calls = Vec::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                event = rx.recv() => event,
            };
            match event {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(StreamEvent::Text(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    chat.append_text(&delta);
                    tracker.transition(TurnState::Generating);
                    ctx.emit(TurnEvent::ChatUpdated(chat.clone()));
                }
                Some(Ok(StreamEvent::ToolCall(call))) => calls.push(call),
            }
        }

        if ctx.cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        Ok(StreamOutcome::Finished(calls))
    }

    /// Run this round's calls in stream order. Calls whose definition
    /// disables auto execution are returned instead.
    async fn execute_round(
        &self,
        chat: &mut Chat,
        ids: &[String],
    ) -> Result<Vec<ToolCall>, EngineError> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut awaiting = Vec::new();

        for call in chat.pending_tool_calls() {
            if !wanted.contains(call.id.as_str()) {
                continue;
            }
            let auto = chat
                .tool_definition(&call.name)
                .map_or(true, |definition| definition.auto_execute);
            if !auto {
                tracing::info!(chat_id = %chat.id, tool = %call.name, "Tool call awaits approval");
                awaiting.push(call);
                continue;
            }
            self.execute_call(chat, &call).await?;
        }
        Ok(awaiting)
    }

    async fn execute_call(&self, chat: &mut Chat, call: &ToolCall) -> Result<(), EngineError> {
        let result = self
            .tools
            .execute(chat.tool_definition(&call.name), call)
            .await?;
        chat.append_tool_result(ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
        })
    }
}

/// Slice retrieved contents to the token budget, dropping results that no
/// longer fit.
fn fit_results(
    results: Vec<RetrievalResult>,
    model: &ResolvedModel,
    budget: i64,
) -> Vec<RetrievalResult> {
    let contents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
    let sliced = slice_list_to_context_length(&contents, model.tokenizer.as_ref(), budget);
    if sliced.len() < results.len() {
        tracing::debug!(
            kept = sliced.len(),
            retrieved = results.len(),
            "Context truncated to fit the model window"
        );
    }
    results
        .into_iter()
        .zip(sliced)
        .map(|(result, content)| RetrievalResult { content, ..result })
        .collect()
}
