use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vox_agent_core::{
    AgentAbortController, AgentContext, AgentEvent, AgentLoopConfig, AgentLoopError,
    AgentRunOutcome, AgentRunStatus, run_agent_loop,
};
use vox_ai::{Message, StopReason};

use super::events::{SessionEndReason, SessionEvent, SessionInput};
use super::phrases::{contains_phrase, split_sentences, starts_with_phrase};
use super::state::{InteractionState, SessionState};
use crate::collaborators::{
    ContextCollaborator, SpeechCollaborator, SpeechEvent, TtsCollaborator,
};
use crate::config::SessionSettings;
use crate::delegation::DelegationManager;
use crate::error::AssistantError;
use crate::tools::ToolGateway;

/// Collaborators and shared services a session drives.
#[derive(Clone)]
pub struct SessionServices {
    pub loop_config: AgentLoopConfig,
    pub gateway: ToolGateway,
    pub tts: Arc<dyn TtsCollaborator>,
    pub speech: Option<Arc<dyn SpeechCollaborator>>,
    pub context: Arc<dyn ContextCollaborator>,
    pub delegations: Option<Arc<DelegationManager>>,
    pub workspace_id: String,
}

enum Envelope {
    External(SessionInput),
    Agent {
        turn: u64,
        event: AgentEvent,
    },
    TurnFinished {
        turn: u64,
        outcome: Result<AgentRunOutcome, AgentLoopError>,
    },
    Speech {
        generation: u64,
        event: SpeechEvent,
    },
    PlaybackFinished {
        generation: u64,
    },
    EndGraceElapsed {
        generation: u64,
    },
    IdleTimeout {
        generation: u64,
    },
}

/// Cloneable sender for feeding inputs to a running orchestrator.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SessionHandle {
    /// Returns `false` once the orchestrator is gone.
    pub fn send(&self, input: SessionInput) -> bool {
        self.tx.send(Envelope::External(input)).is_ok()
    }
}

struct ActiveTurn {
    id: u64,
    abort: AgentAbortController,
    task: JoinHandle<()>,
    /// Text streamed so far by the current model request.
    partial: String,
}

/// Single-use timer task identified by a generation number; a firing whose
/// generation is stale is ignored.
#[derive(Default)]
struct Timer {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    fn arm(&mut self) -> u64 {
        self.cancel();
        self.generation
    }

    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// Owner of the interaction and session state machines. All state changes
/// happen inside `dispatch`/`process_next`; turns, timers and speech run as
/// tasks that report back through the orchestrator's own queue.
pub struct SessionOrchestrator {
    settings: SessionSettings,
    default_system_prompt: String,
    services: SessionServices,
    interaction: InteractionState,
    session: SessionState,
    messages: Vec<Message>,
    active_agent: Option<String>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    observer: Option<mpsc::UnboundedSender<SessionEvent>>,
    turn: Option<ActiveTurn>,
    turn_counter: u64,
    playback: Timer,
    end_grace: Timer,
    idle: Timer,
    listening: Timer,
}

impl SessionOrchestrator {
    pub fn new(
        settings: SessionSettings,
        default_system_prompt: impl Into<String>,
        services: SessionServices,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let active_agent = services.context.active_agent(&services.workspace_id);
        Self {
            settings,
            default_system_prompt: default_system_prompt.into(),
            services,
            interaction: InteractionState::Idle,
            session: SessionState::Inactive,
            messages: Vec::new(),
            active_agent,
            tx,
            rx,
            observer: None,
            turn: None,
            turn_counter: 0,
            playback: Timer::default(),
            end_grace: Timer::default(),
            idle: Timer::default(),
            listening: Timer::default(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Replaces any previous observer.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    pub fn interaction_state(&self) -> &InteractionState {
        &self.interaction
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.active_agent.as_deref()
    }

    /// Streamed text of the in-flight model request, if a turn is running.
    pub fn partial_text(&self) -> Option<&str> {
        self.turn.as_ref().map(|turn| turn.partial.as_str())
    }

    /// Applies a legal transition; anything else is logged and refused,
    /// leaving the state unchanged. Entering `Processing` is refused while
    /// the session is confirming its end.
    pub fn request_transition(&mut self, next: InteractionState) -> Result<(), AssistantError> {
        if self.interaction == next {
            return Ok(());
        }
        let blocked_by_ending =
            next == InteractionState::Processing && self.session == SessionState::Ending;
        if blocked_by_ending || !self.interaction.can_transition_to(&next) {
            warn!(
                from = %self.interaction,
                to = %next,
                session = %self.session,
                "rejected interaction state transition"
            );
            return Err(AssistantError::InvalidStateTransition {
                from: self.interaction.clone(),
                to: next,
            });
        }
        debug!(from = %self.interaction, to = %next, "interaction state changed");
        let from = std::mem::replace(&mut self.interaction, next.clone());
        self.emit(SessionEvent::InteractionChanged { from, to: next });
        Ok(())
    }

    fn set_session_state(&mut self, next: SessionState) {
        if self.session == next {
            return;
        }
        if !self.session.can_transition_to(next) {
            warn!(from = %self.session, to = %next, "rejected session state transition");
            return;
        }
        info!(from = %self.session, to = %next, "session state changed");
        let from = self.session;
        self.session = next;
        self.emit(SessionEvent::SessionChanged { from, to: next });
    }

    /// Handles one input. Work it starts (turns, playback, timers) reports
    /// back through `process_next`.
    pub async fn dispatch(&mut self, input: SessionInput) {
        self.apply(Envelope::External(input)).await;
    }

    /// Waits for the next queued input and applies it. Returns `false` after
    /// a shutdown.
    pub async fn process_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(envelope) => self.apply(envelope).await,
            None => false,
        }
    }

    pub async fn run(mut self) {
        while self.process_next().await {}
        debug!("session orchestrator stopped");
    }

    async fn apply(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::External(input) => return self.apply_input(input).await,
            Envelope::Agent { turn, event } => self.on_agent_event(turn, event),
            Envelope::TurnFinished { turn, outcome } => {
                self.on_turn_finished(turn, outcome).await;
            }
            Envelope::Speech { generation, event } => {
                if self.listening.is_current(generation) {
                    self.on_speech_event(event).await;
                }
            }
            Envelope::PlaybackFinished { generation } => {
                if self.playback.is_current(generation) {
                    self.on_playback_finished().await;
                }
            }
            Envelope::EndGraceElapsed { generation } => {
                if self.end_grace.is_current(generation) && self.session == SessionState::Ending {
                    info!("no answer to end confirmation, ending session");
                    self.end_session(SessionEndReason::GraceElapsed).await;
                }
            }
            Envelope::IdleTimeout { generation } => {
                if self.idle.is_current(generation) {
                    self.on_idle_timeout().await;
                }
            }
        }
        true
    }

    async fn apply_input(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::UserText(text) => self.on_utterance(text, false).await,
            SessionInput::SpeechFinal(text) => self.on_utterance(text, true).await,
            SessionInput::SpeechPartial(text) => {
                self.emit(SessionEvent::PartialTranscript { text });
            }
            SessionInput::SpeechError(message) => {
                self.on_speech_event(SpeechEvent::Error(message)).await;
            }
            SessionInput::WakeDetected => self.on_wake().await,
            SessionInput::Cancel => self.cancel_current().await,
            SessionInput::SwitchAgent(agent) => self.switch_agent(agent).await,
            SessionInput::NewConversation => {
                self.reset_conversation().await;
                self.emit(SessionEvent::ConversationReset);
            }
            SessionInput::Shutdown => {
                self.end_session(SessionEndReason::Shutdown).await;
                return false;
            }
        }
        true
    }

    async fn on_wake(&mut self) {
        if self.interaction == InteractionState::Speaking {
            self.barge_in().await;
        }
        if self.session == SessionState::Inactive {
            self.set_session_state(SessionState::Active);
        }
        self.arm_idle_timer();
        if self.interaction == InteractionState::Idle {
            self.start_listening().await;
        }
    }

    async fn on_utterance(&mut self, text: String, spoken: bool) {
        let text = text.trim().to_string();
        if self.interaction == InteractionState::Listening {
            self.stop_listening().await;
            let _ = self.request_transition(InteractionState::Idle);
        }
        if text.is_empty() {
            return;
        }

        if self.interaction == InteractionState::Speaking {
            self.barge_in().await;
        }
        if self.interaction.is_busy() {
            info!("new input while a turn is running, cancelling it");
            self.cancel_current().await;
        }

        if self.session == SessionState::Ending {
            self.answer_end_confirmation(&text).await;
            return;
        }
        if spoken && self.session == SessionState::Inactive && self.settings.continuous_listening {
            self.set_session_state(SessionState::Active);
        }
        if self.session != SessionState::Inactive {
            self.arm_idle_timer();
        }
        if self.session == SessionState::Active
            && contains_phrase(&text, &self.settings.end_phrases)
        {
            self.begin_ending().await;
            return;
        }

        self.start_turn(text).await;
    }

    async fn start_turn(&mut self, text: String) {
        if self.request_transition(InteractionState::Processing).is_err() {
            return;
        }
        self.messages.push(Message::user(text.clone()));
        self.emit(SessionEvent::UserMessage { text });

        self.turn_counter = self.turn_counter.wrapping_add(1);
        let turn = self.turn_counter;
        let abort = AgentAbortController::new();
        let signal = abort.signal();
        let context = AgentContext {
            system_prompt: self.system_prompt(),
            messages: self.messages.clone(),
            tools: self.services.gateway.available_tool_schemas(),
        };
        let config = self.services.loop_config.clone();
        let gateway = self.services.gateway.clone();
        let tx = self.tx.clone();

        let task = tokio::spawn(async move {
            let (sink, mut events) = mpsc::unbounded_channel();
            let run = run_agent_loop(context, &config, &gateway, Some(&signal), Some(&sink));
            tokio::pin!(run);
            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(event) = events.recv() => {
                        let _ = tx.send(Envelope::Agent { turn, event });
                    }
                    outcome = &mut run => break outcome,
                }
            };
            while let Ok(event) = events.try_recv() {
                let _ = tx.send(Envelope::Agent { turn, event });
            }
            let _ = tx.send(Envelope::TurnFinished { turn, outcome });
        });

        self.turn = Some(ActiveTurn {
            id: turn,
            abort,
            task,
            partial: String::new(),
        });
    }

    fn on_agent_event(&mut self, turn: u64, event: AgentEvent) {
        let Some(active) = self.turn.as_mut() else {
            return;
        };
        if active.id != turn {
            return;
        }
        match event {
            AgentEvent::RequestStart { .. } => {
                active.partial.clear();
            }
            AgentEvent::TextDelta { delta, accumulated } => {
                active.partial = accumulated.clone();
                self.emit(SessionEvent::AssistantDelta { delta, accumulated });
            }
            AgentEvent::ToolExecutionStart { tool_name, .. } => {
                let _ = self.request_transition(InteractionState::ExecutingTool(tool_name.clone()));
                self.emit(SessionEvent::ToolStarted { name: tool_name });
            }
            AgentEvent::ToolExecutionEnd {
                tool_name,
                is_error,
                ..
            } => {
                let _ = self.request_transition(InteractionState::Processing);
                self.emit(SessionEvent::ToolFinished {
                    name: tool_name,
                    is_error,
                });
            }
            AgentEvent::IterationLimitReached { max_iterations } => {
                warn!(max_iterations, "turn hit the tool round limit");
            }
            AgentEvent::RetryScheduled { attempt, .. } => {
                debug!(attempt, "model request retry scheduled");
            }
            AgentEvent::Metrics { .. } => {}
        }
    }

    async fn on_turn_finished(
        &mut self,
        turn: u64,
        outcome: Result<AgentRunOutcome, AgentLoopError>,
    ) {
        if self.turn.as_ref().map(|active| active.id) != Some(turn) {
            debug!(turn, "ignoring result of a stale turn");
            return;
        }
        self.turn = None;
        if self.interaction.is_busy() {
            let _ = self.request_transition(InteractionState::Processing);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(error = %error, "turn could not start");
                self.fail_turn(error.to_string());
                return;
            }
        };
        self.messages.extend(outcome.messages);

        match outcome.status {
            AgentRunStatus::Completed => self.finish_reply(outcome.final_text).await,
            AgentRunStatus::IterationLimitExceeded => {
                let error = AssistantError::AgentLoopIterationLimitExceeded(
                    self.services.loop_config.max_iterations,
                );
                warn!(error = %error, "turn ended at the tool round limit");
                if outcome.final_text.trim().is_empty() {
                    self.fail_turn(error.to_string());
                } else {
                    self.finish_reply(outcome.final_text).await;
                }
            }
            AgentRunStatus::Aborted => {
                let _ = self.request_transition(InteractionState::Idle);
            }
            AgentRunStatus::Failed(error) => {
                self.fail_turn(error.message);
            }
        }
        if self.session == SessionState::Active {
            self.arm_idle_timer();
        }
    }

    async fn finish_reply(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            self.fail_turn("The assistant returned an empty response.".to_string());
        } else {
            self.speak(text).await;
        }
    }

    fn fail_turn(&mut self, message: String) {
        self.emit(SessionEvent::Error { message });
        let _ = self.request_transition(InteractionState::Idle);
    }

    async fn speak(&mut self, text: String) {
        if self.request_transition(InteractionState::Speaking).is_err() {
            return;
        }
        self.emit(SessionEvent::AssistantMessage { text: text.clone() });
        for sentence in split_sentences(&text) {
            self.services.tts.enqueue_sentence(&sentence).await;
        }

        let generation = self.playback.arm();
        let tts = self.services.tts.clone();
        let tx = self.tx.clone();
        self.playback.task = Some(tokio::spawn(async move {
            tts.wait_idle().await;
            let _ = tx.send(Envelope::PlaybackFinished { generation });
        }));
    }

    async fn on_playback_finished(&mut self) {
        self.playback.task = None;
        if self.interaction != InteractionState::Speaking {
            return;
        }
        if self.session == SessionState::Active && self.settings.continuous_listening {
            self.start_listening().await;
            if self.interaction == InteractionState::Listening {
                return;
            }
        }
        let _ = self.request_transition(InteractionState::Idle);
    }

    /// Stops playback and returns to `Idle` so new input starts from a
    /// clean checkpoint.
    async fn barge_in(&mut self) {
        info!("barge-in, stopping playback");
        self.playback.cancel();
        self.services.tts.stop_and_clear().await;
        let _ = self.request_transition(InteractionState::Idle);
    }

    /// Cancels the running turn, keeping its streamed text, and stops any
    /// playback. Always lands in `Idle`.
    async fn cancel_current(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.abort.abort();
            turn.task.abort();
            let partial = turn.partial.trim_end().to_string();
            if !partial.is_empty() {
                self.messages
                    .push(Message::assistant_text(partial, StopReason::Aborted));
            }
            info!(turn = turn.id, "turn cancelled");
        }
        self.playback.cancel();
        self.services.tts.stop_and_clear().await;
        if self.interaction == InteractionState::Listening {
            self.stop_listening().await;
        }
        let _ = self.request_transition(InteractionState::Idle);
    }

    async fn begin_ending(&mut self) {
        self.set_session_state(SessionState::Ending);
        let prompt = self.settings.end_confirmation_prompt.clone();
        self.prompt_end_confirmation(prompt).await;
    }

    async fn prompt_end_confirmation(&mut self, prompt: String) {
        self.emit(SessionEvent::ConfirmationPrompt {
            text: prompt.clone(),
        });
        self.services.tts.enqueue_sentence(&prompt).await;

        let generation = self.end_grace.arm();
        let grace = self.settings.end_grace();
        let tx = self.tx.clone();
        self.end_grace.task = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Envelope::EndGraceElapsed { generation });
        }));

        if self.interaction == InteractionState::Idle && self.settings.continuous_listening {
            self.start_listening().await;
        }
    }

    async fn answer_end_confirmation(&mut self, text: &str) {
        if starts_with_phrase(text, &self.settings.confirm_phrases) {
            self.end_session(SessionEndReason::UserConfirmed).await;
        } else if starts_with_phrase(text, &self.settings.decline_phrases) {
            info!("session end declined");
            self.end_grace.cancel();
            self.set_session_state(SessionState::Active);
            self.arm_idle_timer();
            if self.interaction == InteractionState::Idle && self.settings.continuous_listening {
                self.start_listening().await;
            }
        } else {
            debug!("unrecognized answer to end confirmation, asking again");
            let prompt = self.settings.end_confirmation_prompt.clone();
            self.prompt_end_confirmation(prompt).await;
        }
    }

    async fn end_session(&mut self, reason: SessionEndReason) {
        if self.session == SessionState::Inactive && reason != SessionEndReason::Shutdown {
            return;
        }
        self.reset_conversation().await;
        self.end_grace.cancel();
        self.idle.cancel();
        self.set_session_state(SessionState::Inactive);
        info!(reason = ?reason, "session ended");
        self.emit(SessionEvent::SessionEnded { reason });
    }

    async fn on_idle_timeout(&mut self) {
        self.idle.task = None;
        if self.session != SessionState::Active {
            return;
        }
        if self.interaction.is_busy() || self.interaction == InteractionState::Speaking {
            self.arm_idle_timer();
            return;
        }
        info!("session idle, ending");
        self.end_session(SessionEndReason::IdleTimeout).await;
    }

    fn arm_idle_timer(&mut self) {
        let Some(timeout) = self.settings.idle_timeout() else {
            return;
        };
        let generation = self.idle.arm();
        let tx = self.tx.clone();
        self.idle.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Envelope::IdleTimeout { generation });
        }));
    }

    /// Cancels work, clears the transcript and revokes tool elevation.
    async fn reset_conversation(&mut self) {
        self.cancel_current().await;
        self.messages.clear();
        self.services.gateway.registry().reset();
        if let Some(delegations) = &self.services.delegations {
            let cancelled = delegations.cancel_all();
            if cancelled > 0 {
                info!(cancelled, "cancelled running delegations");
            }
        }
    }

    async fn switch_agent(&mut self, agent: String) {
        let workspace = self.services.workspace_id.clone();
        if !self.services.context.set_active_agent(&workspace, &agent) {
            self.emit(SessionEvent::Error {
                message: format!("Agent '{agent}' was not found in this workspace"),
            });
            return;
        }
        self.reset_conversation().await;
        self.active_agent = Some(agent.clone());
        info!(agent = agent.as_str(), "active agent switched");
        self.emit(SessionEvent::AgentSwitched { agent });
    }

    fn system_prompt(&self) -> String {
        self.active_agent
            .as_deref()
            .and_then(|agent| {
                self.services
                    .context
                    .agent_persona(&self.services.workspace_id, agent)
            })
            .map(|persona| persona.system_prompt)
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or_else(|| self.default_system_prompt.clone())
    }

    async fn start_listening(&mut self) {
        let Some(speech) = self.services.speech.clone() else {
            return;
        };
        if !speech.is_authorized() {
            self.emit(SessionEvent::Error {
                message: "Speech recognition is not authorized".to_string(),
            });
            return;
        }
        if self.request_transition(InteractionState::Listening).is_err() {
            return;
        }
        let mut events = match speech.start_listening(self.settings.silence_timeout()).await {
            Ok(events) => events,
            Err(error) => {
                warn!(error = %error, "failed to start listening");
                self.emit(SessionEvent::Error {
                    message: error.message,
                });
                let _ = self.request_transition(InteractionState::Idle);
                return;
            }
        };

        let generation = self.listening.arm();
        let tx = self.tx.clone();
        self.listening.task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(Envelope::Speech { generation, event }).is_err() {
                    break;
                }
            }
        }));
    }

    async fn stop_listening(&mut self) {
        self.listening.cancel();
        if let Some(speech) = &self.services.speech {
            speech.stop_listening().await;
        }
    }

    async fn on_speech_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Partial(text) => {
                self.emit(SessionEvent::PartialTranscript { text });
            }
            SpeechEvent::Final(text) => self.on_utterance(text, true).await,
            SpeechEvent::Error(message) => {
                warn!(error = message.as_str(), "speech recognition failed");
                self.emit(SessionEvent::Error { message });
                if self.interaction == InteractionState::Listening {
                    self.stop_listening().await;
                    let _ = self.request_transition(InteractionState::Idle);
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.abort.abort();
            turn.task.abort();
        }
        self.playback.cancel();
        self.end_grace.cancel();
        self.idle.cancel();
        self.listening.cancel();
    }
}
