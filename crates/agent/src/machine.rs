//! The bounded think/act state machine.
//!
//! An [`Agent`] owns an [`AgentRun`] (state, step counter, transcript,
//! prompts) and a [`ReActStrategy`] that supplies the two step behaviors.
//! Each step calls `think`; if it asks to act, `act` runs next. The loop
//! stops when the strategy finishes the run, when `max_steps` is exhausted,
//! or when a streamed run loses its subscriber.
//!
//! ```text
//! Idle ──run──▶ Running ──▶ Finished ──run──▶ Running ...
//!                  │
//!                  └──(loop-fatal)──▶ Error ──reset──▶ Idle
//! ```

use async_trait::async_trait;
use metrics::{counter, histogram};
use stepwise_core::agent::AgentState;
use stepwise_core::error::AgentError;
use stepwise_core::message::Message;
use stepwise_core::telemetry::{AGENT_EXECUTIONS_TOTAL, AGENT_STEPS_TOTAL, STATUS_ERROR, STATUS_SUCCESS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::sink::EventSink;
use crate::stream_event::AgentStreamEvent;

pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Returned by `run` when a step failed beyond recovery.
pub const EXECUTION_ERROR: &str = "Executing agent error";

/// Step result when `think` decided no tools are needed.
pub const NO_ACTION: &str = "Thinking complete, no action required";

/// Mutable state of one agent across turns.
///
/// The transcript is append-only: strategies may push messages but never
/// remove or edit them.
#[derive(Debug, Clone)]
pub struct AgentRun {
    name: String,
    state: AgentState,
    current_step: u32,
    max_steps: u32,
    messages: Vec<Message>,
    system_prompt: String,
    next_step_prompt: String,
}

impl AgentRun {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AgentState::Idle,
            current_step: 0,
            max_steps: DEFAULT_MAX_STEPS,
            messages: Vec::new(),
            system_prompt: String::new(),
            next_step_prompt: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn next_step_prompt(&self) -> &str {
        &self.next_step_prompt
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Mark the run as done; the loop exits after the current step.
    pub fn finish(&mut self) {
        self.state = AgentState::Finished;
    }

    pub fn is_finished(&self) -> bool {
        self.state == AgentState::Finished
    }
}

/// The two behaviors that make up a step.
///
/// `think` returns whether `act` should run. Model failures are expected to
/// be absorbed by the strategy; an `Err` from either method is loop-fatal and
/// moves the agent to [`AgentState::Error`].
#[async_trait]
pub trait ReActStrategy: Send {
    async fn think(&mut self, run: &mut AgentRun, sink: &mut EventSink) -> Result<bool, AgentError>;

    async fn act(&mut self, run: &mut AgentRun, sink: &mut EventSink) -> Result<String, AgentError>;

    /// Release per-run resources. Called on every exit path.
    fn cleanup(&mut self, _run: &mut AgentRun) {}
}

/// How the step loop ended.
enum LoopExit {
    /// The strategy finished the run.
    Finished,
    /// `max_steps` ran out first.
    Exhausted,
    /// The event subscriber disconnected.
    Abandoned,
}

/// A reusable agent: one transcript, many turns.
pub struct Agent<S> {
    run: AgentRun,
    strategy: S,
}

impl<S: ReActStrategy> Agent<S> {
    pub fn new(name: impl Into<String>, strategy: S) -> Self {
        Self {
            run: AgentRun::new(name),
            strategy,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.run.system_prompt = prompt.into();
        self
    }

    pub fn with_next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.run.next_step_prompt = prompt.into();
        self
    }

    /// Set the step budget (at least 1).
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.run.max_steps = max_steps.max(1);
        self
    }

    pub fn name(&self) -> &str {
        self.run.name()
    }

    pub fn state(&self) -> AgentState {
        self.run.state
    }

    pub fn current_step(&self) -> u32 {
        self.run.current_step
    }

    pub fn max_steps(&self) -> u32 {
        self.run.max_steps
    }

    pub fn messages(&self) -> &[Message] {
        self.run.messages()
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Run to completion and return the per-step summary.
    ///
    /// Admission failures are returned as errors. Failures inside the loop
    /// are logged and turned into [`EXECUTION_ERROR`].
    pub async fn run(&mut self, user_text: &str) -> Result<String, AgentError> {
        self.admit(user_text)?;

        let mut sink = EventSink::detached();
        let outcome = self.drive(&mut sink).await;
        self.cleanup();
        self.record(outcome.is_ok());

        match outcome {
            Ok((mut results, exit)) => {
                if let LoopExit::Exhausted = exit {
                    results.push(self.force_finish());
                }
                Ok(results.join("\n"))
            }
            Err(e) => {
                self.run.state = AgentState::Error;
                error!(agent = %self.run.name, error = %e, "Executing agent error");
                Ok(EXECUTION_ERROR.to_string())
            }
        }
    }

    /// Run while streaming events into `tx`.
    ///
    /// Nothing is returned: admission failures become a single `error` event.
    /// The channel closes when this future completes, which is the stream's
    /// one and only terminal signal.
    pub async fn run_stream(&mut self, user_text: &str, tx: mpsc::Sender<AgentStreamEvent>) {
        let mut sink = EventSink::new(tx);

        if let Err(e) = self.admit(user_text) {
            warn!(agent = %self.run.name, error = %e, "Rejected agent run");
            sink.emit(AgentStreamEvent::Error { content: e.to_string() }).await;
            return;
        }

        let outcome = self.drive(&mut sink).await;
        self.cleanup();
        self.record(outcome.is_ok());

        match outcome {
            Ok((_, LoopExit::Finished)) => {}
            Ok((_, LoopExit::Exhausted)) => {
                let content = self.force_finish();
                sink.emit(AgentStreamEvent::Finished { content }).await;
            }
            Ok((_, LoopExit::Abandoned)) => {
                // Nobody is listening; leave the agent reusable.
                info!(agent = %self.run.name, step = self.run.current_step, "Subscriber left, stopping run");
                self.run.state = AgentState::Idle;
            }
            Err(e) => {
                self.run.state = AgentState::Error;
                error!(agent = %self.run.name, error = %e, "Executing agent error");
                sink.emit(AgentStreamEvent::Error { content: EXECUTION_ERROR.into() }).await;
            }
        }
    }

    /// Return an agent to `Idle` so it can be run again, keeping its transcript.
    pub fn reset(&mut self) {
        if self.run.state != AgentState::Idle {
            debug!(agent = %self.run.name, from = %self.run.state, "Resetting agent");
        }
        self.run.state = AgentState::Idle;
        self.run.current_step = 0;
        self.strategy.cleanup(&mut self.run);
    }

    fn admit(&mut self, user_text: &str) -> Result<(), AgentError> {
        if !self.run.state.accepts_run() {
            return Err(AgentError::InvalidState { state: self.run.state });
        }
        if user_text.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        self.run.state = AgentState::Running;
        self.run.current_step = 0;
        self.run.messages.push(Message::user(user_text));
        Ok(())
    }

    async fn drive(&mut self, sink: &mut EventSink) -> Result<(Vec<String>, LoopExit), AgentError> {
        let max_steps = self.run.max_steps;
        let mut results = Vec::new();

        while self.run.current_step < max_steps {
            if self.run.is_finished() {
                return Ok((results, LoopExit::Finished));
            }
            if sink.is_closed() {
                return Ok((results, LoopExit::Abandoned));
            }

            self.run.current_step += 1;
            let step = self.run.current_step;
            info!(agent = %self.run.name, step, max_steps, "Executing step");
            sink.emit(AgentStreamEvent::StepStart { step, max_steps }).await;

            let result = self.step(sink).await?;
            results.push(format!("Step {step}: {result}"));
            sink.emit(AgentStreamEvent::StepResult { step, content: result }).await;
        }

        if self.run.is_finished() {
            Ok((results, LoopExit::Finished))
        } else {
            Ok((results, LoopExit::Exhausted))
        }
    }

    async fn step(&mut self, sink: &mut EventSink) -> Result<String, AgentError> {
        let should_act = self.strategy.think(&mut self.run, sink).await?;
        if !should_act {
            return Ok(NO_ACTION.to_string());
        }
        self.strategy.act(&mut self.run, sink).await
    }

    fn force_finish(&mut self) -> String {
        warn!(agent = %self.run.name, max_steps = self.run.max_steps, "Reached max steps");
        self.run.state = AgentState::Finished;
        format!("Terminated, reached max steps ({})", self.run.max_steps)
    }

    fn cleanup(&mut self) {
        self.strategy.cleanup(&mut self.run);
    }

    /// Count an admitted run and the steps it took.
    fn record(&self, ok: bool) {
        let status = if ok { STATUS_SUCCESS } else { STATUS_ERROR };
        counter!(AGENT_EXECUTIONS_TOTAL, "agent" => self.run.name.clone(), "status" => status).increment(1);
        histogram!(AGENT_STEPS_TOTAL, "agent" => self.run.name.clone()).record(f64::from(self.run.current_step));
    }
}
