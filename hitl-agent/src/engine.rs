//! Execution engine: the resumable model/tool loop.
//!
//! A turn runs until the model answers without tools, until a dangerous
//! call needs a human decision, or until the round-trip bound is hit.
//! Every step boundary is written to the checkpoint store, so a suspended
//! turn survives process restarts and resumes from the latest checkpoint
//! without replaying the model call that produced it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use hitl_checkpoint::{
    call_id_in_use, unresolved_calls, Checkpoint, CheckpointStore, Message, PendingConfirmation,
    StoreError, ToolInvocationRequest,
};
use hitl_common::logging::generate_trace_id;
use hitl_common::AgentConfig;
use hitl_tools::{ClampPolicy, ToolOutcome, ToolRegistry, ToolSpec};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::event::{EventSink, ExecutionEvent, NoopSink};
use crate::model::{ModelClient, ModelError};

/// Maximum model calls per `submit`/`resume` to prevent infinite loops
pub const DEFAULT_MAX_ROUND_TRIPS: u32 = 10;

/// Errors returned by the engine. History is never left half-written.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("thread id must not be empty")]
    InvalidThreadId,

    #[error("thread '{thread_id}' is waiting for a decision on call '{call_id}'")]
    AwaitingConfirmation { thread_id: String, call_id: String },

    #[error("cannot resume thread '{thread_id}': {reason}")]
    InvalidResumeState { thread_id: String, reason: String },

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("checkpoint store failed: {0}")]
    Store(#[from] StoreError),
}

/// How a `submit`/`resume` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    /// The model gave a final answer.
    Completed,
    /// Parked before a dangerous call.
    Suspended { pending: PendingConfirmation },
    /// The model kept requesting tools past the round-trip bound.
    Stalled { round_trips: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionResult {
    pub fn is_suspended(&self) -> bool {
        matches!(self.status, ExecutionStatus::Suspended { .. })
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        match &self.status {
            ExecutionStatus::Suspended { pending } => Some(pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Idle,
    Running,
    SuspendedAwaitingConfirmation,
}

/// Content of the tool result injected when a human rejects a call.
pub fn denial_message(tool_name: &str) -> String {
    format!(
        "USER DENIED: The human user rejected the {tool_name} action. Acknowledge this and stop."
    )
}

/// Drives threads through the model/tool loop.
pub struct ExecutionEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn CheckpointStore>,
    clamp: ClampPolicy,
    max_round_trips: u32,
    /// One lock per thread id, held for a whole submit/resume. Entries are
    /// dropped once no turn holds or awaits them.
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionEngine {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            model,
            tools,
            store,
            clamp: ClampPolicy::default(),
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Engine with round-trip bound and clamp policy taken from config.
    pub fn from_config(
        config: &AgentConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::new(model, tools, store)
            .with_max_round_trips(config.max_round_trips)
            .with_clamp(ClampPolicy::from(&config.clamp))
    }

    pub fn with_max_round_trips(mut self, max_round_trips: u32) -> Self {
        self.max_round_trips = max_round_trips.max(1);
        self
    }

    pub fn with_clamp(mut self, clamp: ClampPolicy) -> Self {
        self.clamp = clamp;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    // ── Public operations ───────────────────────────────────────

    /// Start a new user turn on a thread.
    pub async fn submit(
        &self,
        thread_id: &str,
        user_text: &str,
    ) -> Result<ExecutionResult, EngineError> {
        self.submit_with_sink(thread_id, user_text, &NoopSink).await
    }

    /// `submit`, pushing events to `sink` as they happen.
    pub async fn submit_with_sink(
        &self,
        thread_id: &str,
        user_text: &str,
        sink: &dyn EventSink,
    ) -> Result<ExecutionResult, EngineError> {
        validate_thread_id(thread_id)?;
        let span = tracing::info_span!("submit", turn_id = %generate_trace_id(), thread_id = %thread_id);

        let lock = self.thread_lock(thread_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_submit(thread_id, user_text, sink)
                .instrument(span)
                .await
        };
        self.release_lock(thread_id, lock);
        result
    }

    async fn run_submit(
        &self,
        thread_id: &str,
        user_text: &str,
        sink: &dyn EventSink,
    ) -> Result<ExecutionResult, EngineError> {
        let previous = self.store.load_latest(thread_id).await?;
        if let Some(pending) = previous.as_ref().and_then(|cp| cp.pending.as_ref()) {
            tracing::warn!(call_id = %pending.call_id, "Submit rejected: thread is suspended");
            return Err(EngineError::AwaitingConfirmation {
                thread_id: thread_id.to_string(),
                call_id: pending.call_id.clone(),
            });
        }

        let mut turn = Turn::start(thread_id, previous, sink);
        turn.messages.push(Message::user(user_text));
        tracing::info!(history = turn.messages.len(), "Turn started");

        let status = self.run_rounds(&mut turn).await?;
        Ok(turn.finish(status))
    }

    /// Answer the pending confirmation of a suspended thread.
    pub async fn resume(
        &self,
        thread_id: &str,
        approved: bool,
    ) -> Result<ExecutionResult, EngineError> {
        self.resume_with_sink(thread_id, approved, &NoopSink).await
    }

    /// `resume`, pushing events to `sink` as they happen.
    pub async fn resume_with_sink(
        &self,
        thread_id: &str,
        approved: bool,
        sink: &dyn EventSink,
    ) -> Result<ExecutionResult, EngineError> {
        validate_thread_id(thread_id)?;
        let span = tracing::info_span!(
            "resume",
            turn_id = %generate_trace_id(),
            thread_id = %thread_id,
            approved
        );

        let lock = self.thread_lock(thread_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_resume(thread_id, approved, sink)
                .instrument(span)
                .await
        };
        self.release_lock(thread_id, lock);
        result
    }

    async fn run_resume(
        &self,
        thread_id: &str,
        approved: bool,
        sink: &dyn EventSink,
    ) -> Result<ExecutionResult, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidResumeState {
            thread_id: thread_id.to_string(),
            reason: reason.to_string(),
        };

        let checkpoint = self
            .store
            .load_latest(thread_id)
            .await?
            .ok_or_else(|| invalid("thread has no checkpoints"))?;
        if !checkpoint.is_suspended() {
            return Err(invalid("thread is not awaiting confirmation"));
        }
        let pending = checkpoint
            .pending
            .clone()
            .ok_or_else(|| invalid("checkpoint has no pending confirmation"))?;
        if !unresolved_calls(&checkpoint.messages)
            .iter()
            .any(|c| c.call_id == pending.call_id)
        {
            return Err(invalid("pending call is not part of the open tool batch"));
        }

        let mut turn = Turn::start(thread_id, Some(checkpoint), sink);
        let decision = Decision {
            call_id: pending.call_id,
            approved,
        };

        if let Some(pending) = self
            .drain_batch(&mut turn, BatchMode::Continue(decision))
            .await?
        {
            return Ok(turn.finish(ExecutionStatus::Suspended { pending }));
        }
        self.persist_idle(&mut turn).await?;

        let status = self.run_rounds(&mut turn).await?;
        Ok(turn.finish(status))
    }

    /// Thread ids, oldest first by latest checkpoint.
    pub async fn list_threads(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.list_thread_ids().await?)
    }

    /// Messages as of the latest checkpoint. Empty for unknown threads.
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<Message>, EngineError> {
        Ok(self.store.list_messages(thread_id).await?)
    }

    pub async fn pending_confirmation(
        &self,
        thread_id: &str,
    ) -> Result<Option<PendingConfirmation>, EngineError> {
        Ok(self
            .store
            .load_latest(thread_id)
            .await?
            .and_then(|cp| cp.pending))
    }

    pub async fn thread_status(&self, thread_id: &str) -> Result<ThreadStatus, EngineError> {
        if let Some(lock) = self.existing_lock(thread_id) {
            let held = lock.try_lock().is_err();
            if held {
                return Ok(ThreadStatus::Running);
            }
        }

        Ok(match self.store.load_latest(thread_id).await? {
            Some(cp) if cp.is_suspended() => ThreadStatus::SuspendedAwaitingConfirmation,
            _ => ThreadStatus::Idle,
        })
    }

    // ── Loop ────────────────────────────────────────────────────

    async fn run_rounds(&self, turn: &mut Turn<'_>) -> Result<ExecutionStatus, EngineError> {
        let specs: Vec<ToolSpec> = self.tools.specs();

        for round in 1..=self.max_round_trips {
            let response = match self.model.converse(&turn.messages, &specs).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(round, model = self.model.name(), error = %e, "Model call failed");
                    return Err(e.into());
                }
            };

            if let Some(text) = response.text {
                turn.emit(ExecutionEvent::AiText { text: text.clone() });
                turn.messages.push(Message::AssistantText { text });
            }

            if response.tool_calls.is_empty() {
                self.persist_idle(turn).await?;
                tracing::info!(round, "Turn completed");
                return Ok(ExecutionStatus::Completed);
            }

            let calls = self.prepare_calls(&turn.messages, response.tool_calls);
            tracing::debug!(round, calls = calls.len(), "Model requested tools");
            for call in &calls {
                turn.emit(ExecutionEvent::ToolCall {
                    name: call.tool_name.clone(),
                    args: call.arguments.clone(),
                    call_id: call.call_id.clone(),
                });
            }
            turn.messages.push(Message::AssistantToolCall { calls });

            if let Some(pending) = self.drain_batch(turn, BatchMode::Fresh).await? {
                return Ok(ExecutionStatus::Suspended { pending });
            }
            self.persist_idle(turn).await?;
        }

        // the last batch's results are already checkpointed
        tracing::warn!(
            round_trips = self.max_round_trips,
            "Turn stalled: model kept requesting tools"
        );
        Ok(ExecutionStatus::Stalled {
            round_trips: self.max_round_trips,
        })
    }

    /// Clamp arguments and make call ids unique within the thread.
    fn prepare_calls(
        &self,
        history: &[Message],
        calls: Vec<ToolInvocationRequest>,
    ) -> Vec<ToolInvocationRequest> {
        let mut seen = HashSet::new();
        calls
            .into_iter()
            .map(|mut call| {
                if call.call_id.trim().is_empty()
                    || call_id_in_use(history, &call.call_id)
                    || seen.contains(&call.call_id)
                {
                    let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                    tracing::debug!(original = %call.call_id, assigned = %fresh, "Reassigned call id");
                    call.call_id = fresh;
                }
                seen.insert(call.call_id.clone());

                if self.clamp.clamp(&call.tool_name, &mut call.arguments) {
                    tracing::info!(call_id = %call.call_id, tool = %call.tool_name, "Clamped tool arguments");
                }
                call
            })
            .collect()
    }

    /// Work through the unresolved calls of the open batch.
    ///
    /// `Fresh` suspends before executing anything when the batch holds a
    /// dangerous call. `Continue` walks the batch in model order: safe calls
    /// execute, the decided call is settled where it stands, and the next
    /// undecided dangerous call suspends again.
    async fn drain_batch(
        &self,
        turn: &mut Turn<'_>,
        mode: BatchMode,
    ) -> Result<Option<PendingConfirmation>, EngineError> {
        let open: Vec<ToolInvocationRequest> = unresolved_calls(&turn.messages)
            .into_iter()
            .cloned()
            .collect();

        let decision = match mode {
            BatchMode::Fresh => {
                if let Some(call) = open.iter().find(|c| self.tools.is_dangerous(&c.tool_name)) {
                    return self.suspend(turn, call).await.map(Some);
                }
                None
            }
            BatchMode::Continue(decision) => Some(decision),
        };

        for call in &open {
            match &decision {
                Some(decision) if decision.call_id == call.call_id => {
                    self.settle(turn, call, decision.approved).await;
                }
                _ if self.tools.is_dangerous(&call.tool_name) => {
                    return self.suspend(turn, call).await.map(Some);
                }
                _ => self.execute_call(turn, call).await,
            }
        }
        Ok(None)
    }

    /// Apply a human decision to the call it was asked for.
    async fn settle(&self, turn: &mut Turn<'_>, call: &ToolInvocationRequest, approved: bool) {
        if approved {
            tracing::info!(call_id = %call.call_id, tool = %call.tool_name, "Confirmation approved");
            self.execute_call(turn, call).await;
        } else {
            tracing::info!(call_id = %call.call_id, tool = %call.tool_name, "Confirmation denied");
            turn.record_result(call, denial_message(&call.tool_name), false);
        }
    }

    async fn execute_call(&self, turn: &mut Turn<'_>, call: &ToolInvocationRequest) {
        tracing::info!(call_id = %call.call_id, tool = %call.tool_name, args = %call.arguments, "Executing tool");

        match self.tools.invoke(&call.tool_name, call.arguments.clone()).await {
            ToolOutcome::Ok(output) => turn.record_result(call, output, false),
            ToolOutcome::Failed(message) => {
                tracing::warn!(call_id = %call.call_id, tool = %call.tool_name, error = %message, "Tool failed");
                turn.record_result(call, format!("Tool '{}' failed: {message}", call.tool_name), true);
            }
        }
    }

    async fn suspend(
        &self,
        turn: &mut Turn<'_>,
        call: &ToolInvocationRequest,
    ) -> Result<PendingConfirmation, EngineError> {
        let pending = PendingConfirmation::for_call(turn.thread_id, call);
        let checkpoint = Checkpoint::suspended(
            turn.messages.clone(),
            pending.clone(),
            turn.previous.as_ref(),
        );
        self.store.save(&checkpoint).await?;
        turn.previous = Some(checkpoint);

        turn.emit(ExecutionEvent::SuspendRequired {
            name: call.tool_name.clone(),
            args: call.arguments.clone(),
            call_id: call.call_id.clone(),
        });
        tracing::info!(call_id = %call.call_id, tool = %call.tool_name, "Suspended for confirmation");
        Ok(pending)
    }

    async fn persist_idle(&self, turn: &mut Turn<'_>) -> Result<(), EngineError> {
        let checkpoint = Checkpoint::idle(
            turn.thread_id,
            turn.messages.clone(),
            turn.previous.as_ref(),
        );
        self.store.save(&checkpoint).await?;
        turn.previous = Some(checkpoint);
        Ok(())
    }

    // ── Locks ───────────────────────────────────────────────────

    fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock of a thread nobody else is waiting on.
    fn release_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // one reference in the map, one held here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(thread_id);
        }
    }

    fn existing_lock(&self, thread_id: &str) -> Option<Arc<Mutex<()>>> {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(thread_id)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchMode {
    /// A batch the model just produced.
    Fresh,
    /// A suspended batch, with the human's answer for its pending call.
    Continue(Decision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Decision {
    call_id: String,
    approved: bool,
}

/// Working state of one submit/resume.
struct Turn<'a> {
    thread_id: &'a str,
    messages: Vec<Message>,
    previous: Option<Checkpoint>,
    events: Vec<ExecutionEvent>,
    sink: &'a dyn EventSink,
}

impl<'a> Turn<'a> {
    fn start(thread_id: &'a str, previous: Option<Checkpoint>, sink: &'a dyn EventSink) -> Self {
        Self {
            thread_id,
            messages: previous
                .as_ref()
                .map(|cp| cp.messages.clone())
                .unwrap_or_default(),
            previous,
            events: Vec::new(),
            sink,
        }
    }

    fn emit(&mut self, event: ExecutionEvent) {
        self.sink.emit(&event);
        self.events.push(event);
    }

    fn record_result(&mut self, call: &ToolInvocationRequest, content: String, is_error: bool) {
        self.emit(ExecutionEvent::ToolResult {
            name: call.tool_name.clone(),
            content: content.clone(),
            call_id: call.call_id.clone(),
        });
        self.messages.push(Message::ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content,
            is_error,
        });
    }

    fn finish(self, status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            status,
            events: self.events,
        }
    }
}

fn validate_thread_id(thread_id: &str) -> Result<(), EngineError> {
    if thread_id.trim().is_empty() {
        return Err(EngineError::InvalidThreadId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelTurn;
    use async_trait::async_trait;
    use hitl_checkpoint::MemoryCheckpointStore;

    struct Greeter;

    #[async_trait]
    impl ModelClient for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        async fn converse(
            &self,
            _history: &[Message],
            _tools: &[ToolSpec],
        ) -> Result<ModelTurn, ModelError> {
            Ok(ModelTurn::answer("Hello."))
        }
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(Greeter),
            Arc::new(ToolRegistry::new()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    fn lock_entries(engine: &ExecutionEngine) -> usize {
        engine.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_thread_locks_are_dropped_after_turns() {
        let engine = engine();
        for thread in ["a", "b", "c"] {
            engine.submit(thread, "hi").await.unwrap();
        }
        assert_eq!(lock_entries(&engine), 0);

        // failed turns release too
        engine.resume("a", true).await.unwrap_err();
        assert_eq!(lock_entries(&engine), 0);
    }

    #[tokio::test]
    async fn test_lock_kept_while_another_turn_waits() {
        let engine = engine();
        let held = engine.thread_lock("t");
        let guard = held.lock().await;

        let waiting = engine.thread_lock("t");
        drop(guard);
        engine.release_lock("t", held);
        assert_eq!(lock_entries(&engine), 1);

        engine.release_lock("t", waiting);
        assert_eq!(lock_entries(&engine), 0);
    }

    #[test]
    fn test_denial_message_text() {
        assert_eq!(
            denial_message("delete_repository"),
            "USER DENIED: The human user rejected the delete_repository action. Acknowledge this and stop."
        );
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::AwaitingConfirmation {
            thread_id: "t2".into(),
            call_id: "c1".into(),
        };
        assert_eq!(err.to_string(), "thread 't2' is waiting for a decision on call 'c1'");
        assert_eq!(EngineError::InvalidThreadId.to_string(), "thread id must not be empty");
    }

    #[test]
    fn test_validate_thread_id() {
        assert!(validate_thread_id("t1").is_ok());
        assert!(matches!(validate_thread_id("  "), Err(EngineError::InvalidThreadId)));
    }
}
