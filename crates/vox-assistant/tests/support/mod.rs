#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use vox_agent_core::StreamFn;
use vox_ai::{
    AssistantContentBlock, AssistantMessage, AssistantMessageEvent, AssistantMessageEventStream,
    Context, Model, StopReason, StreamOptions, VoxError,
};
use vox_assistant::{
    AgentPersona, ConfirmationHandler, DelegationPolicy, InMemoryContextStore,
    SessionOrchestrator, SpeechCollaborator, SpeechEvent, TtsCollaborator,
};

pub const WORKSPACE: &str = "home";

pub fn sample_model() -> Model {
    Model {
        id: "voice-model".to_string(),
        name: "Voice Model".to_string(),
        api: "scripted".to_string(),
        provider: "scripted".to_string(),
        base_url: "http://localhost".to_string(),
    }
}

fn assistant(content: Vec<AssistantContentBlock>, stop_reason: StopReason) -> AssistantMessage {
    let mut message = AssistantMessage::empty("scripted", "voice-model");
    message.content = content;
    message.stop_reason = stop_reason;
    message
}

pub fn text_reply(text: &str) -> AssistantMessageEventStream {
    AssistantMessageEventStream::from_events([AssistantMessageEvent::Done {
        message: assistant(
            vec![AssistantContentBlock::Text {
                text: text.to_string(),
            }],
            StopReason::Stop,
        ),
    }])
}

pub fn tool_reply(id: &str, name: &str, arguments: Value) -> AssistantMessageEventStream {
    AssistantMessageEventStream::from_events([AssistantMessageEvent::Done {
        message: assistant(
            vec![AssistantContentBlock::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
            StopReason::ToolUse,
        ),
    }])
}

/// Stream that has produced `text` and then stalls without finishing.
pub fn stalled_reply(text: &str) -> AssistantMessageEventStream {
    let stream = AssistantMessageEventStream::new();
    stream.push(AssistantMessageEvent::TextDelta {
        delta: text.to_string(),
        partial: assistant(
            vec![AssistantContentBlock::Text {
                text: text.to_string(),
            }],
            StopReason::Stop,
        ),
    });
    stream
}

/// Replays canned streams in order and records every context it was sent.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<AssistantMessageEventStream>>>,
    seen: Arc<Mutex<Vec<Context>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<AssistantMessageEventStream>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            seen: Arc::default(),
        }
    }

    pub fn push(&self, reply: AssistantMessageEventStream) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn stream_fn(&self) -> StreamFn {
        let replies = self.replies.clone();
        let seen = self.seen.clone();
        Arc::new(
            move |_model: Model, context: Context, _options: StreamOptions| {
                seen.lock().expect("seen lock").push(context);
                let next = replies.lock().expect("replies lock").pop_front();
                Ok::<_, VoxError>(next.unwrap_or_else(|| text_reply("(script exhausted)")))
            },
        )
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.seen.lock().expect("seen lock").clone()
    }
}

/// Records spoken sentences. With `hold_playback` set, `wait_idle` blocks
/// until `finish_playback` or `stop_and_clear`.
#[derive(Default)]
pub struct RecordingTts {
    pub sentences: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
    hold_playback: AtomicBool,
    speaking: AtomicBool,
    idle: Notify,
}

impl RecordingTts {
    pub fn holding() -> Self {
        let tts = Self::default();
        tts.hold_playback.store(true, Ordering::SeqCst);
        tts
    }

    pub fn spoken(&self) -> Vec<String> {
        self.sentences.lock().expect("sentences lock").clone()
    }

    pub fn finish_playback(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

#[async_trait]
impl TtsCollaborator for RecordingTts {
    async fn enqueue_sentence(&self, text: &str) {
        self.speaking.store(true, Ordering::SeqCst);
        self.sentences
            .lock()
            .expect("sentences lock")
            .push(text.to_string());
    }

    async fn stop_and_clear(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish_playback();
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        if !self.hold_playback.load(Ordering::SeqCst) {
            self.speaking.store(false, Ordering::SeqCst);
            return;
        }
        let notified = self.idle.notified();
        if !self.is_speaking() {
            return;
        }
        notified.await;
    }
}

/// Speech recognizer driven by the test through `say`/`hear_partial`.
#[derive(Default)]
pub struct ScriptedSpeech {
    sender: Mutex<Option<mpsc::UnboundedSender<SpeechEvent>>>,
    pub sessions: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedSpeech {
    pub fn is_listening(&self) -> bool {
        self.sender.lock().expect("sender lock").is_some()
    }

    pub fn say(&self, text: &str) {
        self.send(SpeechEvent::Final(text.to_string()));
    }

    pub fn hear_partial(&self, text: &str) {
        self.send(SpeechEvent::Partial(text.to_string()));
    }

    fn send(&self, event: SpeechEvent) {
        let sender = self.sender.lock().expect("sender lock");
        sender
            .as_ref()
            .expect("recognizer should be listening")
            .send(event)
            .expect("orchestrator should receive speech");
    }
}

#[async_trait]
impl SpeechCollaborator for ScriptedSpeech {
    async fn start_listening(
        &self,
        _silence_timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<SpeechEvent>, VoxError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().expect("sender lock") = Some(tx);
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop_listening(&self) {
        self.sender.lock().expect("sender lock").take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_authorized(&self) -> bool {
        true
    }
}

pub struct FixedConfirmation {
    pub approve: bool,
    pub asked: AtomicUsize,
}

impl FixedConfirmation {
    pub fn new(approve: bool) -> Self {
        Self {
            approve,
            asked: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConfirmationHandler for FixedConfirmation {
    async fn confirm(&self, _tool_name: &str, _description: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.approve
    }
}

pub fn persona(name: &str) -> AgentPersona {
    AgentPersona {
        name: name.to_string(),
        system_prompt: format!("You are agent {name}."),
    }
}

/// Workspace with agents A (active) and B, both on the default policy.
pub fn two_agent_store() -> Arc<InMemoryContextStore> {
    let store = InMemoryContextStore::new();
    store.upsert_agent(WORKSPACE, persona("A"), DelegationPolicy::default());
    store.upsert_agent(WORKSPACE, persona("B"), DelegationPolicy::default());
    Arc::new(store)
}

pub fn empty_args() -> Value {
    json!({})
}

/// Applies queued inputs until `done` holds, failing after two seconds.
pub async fn drive_until(
    orchestrator: &mut SessionOrchestrator,
    mut done: impl FnMut(&SessionOrchestrator) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !done(orchestrator) {
        let running = tokio::time::timeout_at(deadline, orchestrator.process_next())
            .await
            .expect("condition should be reached before the deadline");
        assert!(running, "orchestrator stopped before the condition held");
    }
}
