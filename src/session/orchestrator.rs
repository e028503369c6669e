//! Voice session orchestrator
//!
//! Wires capture -> protocol client -> playback, owns the connection
//! state machine, and dispatches tool calls. Connection state is written
//! only by the orchestrator and the event loop it spawns; a remote close
//! or transport error transitions the session to disconnected.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::audio::{AudioChunk, AudioFormat};
use crate::config::{AudioOptions, SessionOptions};
use crate::protocol::{
    ConversationTurn, SessionEvent, SessionProtocolClient, TranscriptKind,
};
use crate::session::tools::{EndSessionTool, Tool, ToolContext, ToolRegistry};
use crate::voice::{AudioCaptureEngine, AudioPlaybackEngine};
use crate::{Error, Result};

/// Connection lifecycle of one session.
///
/// `Reconnecting` is a state value available to a caller-driven retry
/// policy; this layer never enters it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,
    /// Transport opening, setup not yet acknowledged
    Connecting,
    /// Live session
    Connected,
    /// Caller-driven retry in progress
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Observer callbacks, one explicit field per event kind.
///
/// These are the only points where the session core hands control back
/// to the surrounding application.
#[derive(Clone, Default)]
pub struct SessionObserver {
    /// Connection state changed
    pub on_state_change: Option<Arc<dyn Fn(ConnectionState) + Send + Sync>>,
    /// Transcript delta with its stream tag
    pub on_transcript: Option<Arc<dyn Fn(TranscriptKind, String) + Send + Sync>>,
    /// RMS level of local input, per device tick
    pub on_level: Option<Arc<dyn Fn(f32) + Send + Sync>>,
    /// Transport or audio error; retry policy is the caller's
    pub on_error: Option<Arc<dyn Fn(Error) + Send + Sync>>,
    /// A tool requested that the session end
    pub on_session_end: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl SessionObserver {
    fn state(&self, state: ConnectionState) {
        if let Some(cb) = &self.on_state_change {
            cb(state);
        }
    }

    fn transcript(&self, kind: TranscriptKind, text: String) {
        if let Some(cb) = &self.on_transcript {
            cb(kind, text);
        }
    }

    fn level(&self, level: f32) {
        if let Some(cb) = &self.on_level {
            cb(level);
        }
    }

    fn error(&self, error: Error) {
        if let Some(cb) = &self.on_error {
            cb(error);
        } else {
            tracing::warn!(error = %error, "unobserved session error");
        }
    }

    fn session_end(&self) {
        if let Some(cb) = &self.on_session_end {
            cb();
        }
    }
}

/// Facade over one voice session: capture, protocol client, playback,
/// and tool dispatch.
pub struct VoiceSessionOrchestrator {
    options: SessionOptions,
    audio: AudioOptions,
    observer: SessionObserver,
    state: Arc<Mutex<ConnectionState>>,
    system_tools: Vec<Arc<dyn Tool>>,
    caller_tools: Vec<Arc<dyn Tool>>,
    client: Option<Arc<SessionProtocolClient>>,
    playback: Option<Arc<AudioPlaybackEngine>>,
    capture: Option<AudioCaptureEngine>,
    ctx: Option<Arc<ToolContext>>,
    event_task: Option<tokio::task::JoinHandle<()>>,
    forward_task: Option<tokio::task::JoinHandle<()>>,
}

impl VoiceSessionOrchestrator {
    /// Create a disconnected orchestrator with the built-in system tools
    #[must_use]
    pub fn new(options: SessionOptions, audio: AudioOptions, observer: SessionObserver) -> Self {
        Self {
            options,
            audio,
            observer,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            system_tools: vec![Arc::new(EndSessionTool)],
            caller_tools: Vec::new(),
            client: None,
            playback: None,
            capture: None,
            ctx: None,
            event_task: None,
            forward_task: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a caller-supplied tool for the next session.
    ///
    /// The tool set is fixed at connect time; names must be unique
    /// across system and caller tools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] on a duplicate name, or [`Error::Api`]
    /// when called while a session is live.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let state = self.state();
        if state == ConnectionState::Connected || state == ConnectionState::Connecting {
            return Err(Error::Api(
                "tools cannot change while a session is live".to_string(),
            ));
        }
        let name = tool.name();
        if self
            .system_tools
            .iter()
            .chain(&self.caller_tools)
            .any(|t| t.name() == name)
        {
            return Err(Error::Tool(format!("duplicate tool name: {name}")));
        }
        self.caller_tools.push(tool);
        Ok(())
    }

    /// Mark the session as reconnecting, for caller-driven retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] unless the session is disconnected.
    pub fn begin_reconnect(&mut self) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(Error::Api(format!("cannot reconnect while {state}")));
        }
        self.set_state(ConnectionState::Reconnecting);
        Ok(())
    }

    /// Open the session: connect the transport, complete setup, and
    /// start the event loop. Playback is initialized only after the
    /// connection succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when not disconnected, or
    /// [`Error::Connection`] if the transport fails before setup is
    /// acknowledged; on failure the state returns to `Disconnected`.
    pub async fn connect(&mut self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        ) {
            return Err(Error::Api(format!(
                "connect requires disconnected state, currently {state}"
            )));
        }

        self.set_state(ConnectionState::Connecting);

        let registry = Arc::new(self.build_registry());
        let declarations = registry.declarations();
        let input_format = AudioFormat::pcm16_mono(self.audio.input_sample_rate);

        let connected = SessionProtocolClient::connect(
            &self.options,
            declarations,
            input_format,
            self.audio.repeat_guard_len,
        )
        .await;

        let (client, events) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let client = Arc::new(client);

        let playback = Arc::new(AudioPlaybackEngine::new(AudioFormat::pcm16_mono(
            self.audio.output_sample_rate,
        )));
        if let Err(e) = playback.start_device() {
            // The session stays usable (text, tools); audible output is
            // unavailable until the caller reconnects.
            self.observer.error(e);
        }

        let ctx = Arc::new(ToolContext::new());
        self.event_task = Some(tokio::spawn(run_event_loop(
            events,
            Arc::clone(&client),
            Arc::clone(&playback),
            registry,
            Arc::clone(&ctx),
            self.observer.clone(),
            Arc::clone(&self.state),
        )));

        self.client = Some(client);
        self.playback = Some(playback);
        self.ctx = Some(ctx);
        self.set_state(ConnectionState::Connected);
        tracing::info!(model = %self.options.model, "session connected");
        Ok(())
    }

    /// Start forwarding microphone chunks to the remote model.
    ///
    /// Suspends until the capture device is acquired. The level callback
    /// feeds the observer and the barge-in rule: any local input above
    /// the configured threshold while playback is active clears playback
    /// immediately, without waiting for a remote interruption signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when not connected, or [`Error::Audio`] if
    /// the device cannot be acquired.
    pub async fn start_listening(&mut self) -> Result<()> {
        self.require_connected("start_listening")?;
        if self.capture.is_some() {
            return Ok(());
        }

        let client = Arc::clone(self.client.as_ref().ok_or_else(missing_client)?);
        let activity_client = Arc::clone(&client);
        let playback = self.playback.clone();
        let observer = self.observer.clone();
        let threshold = self.audio.barge_in_threshold;

        // Chunk callbacks are synchronous; a forwarder task bridges them
        // onto the async sender, preserving call order.
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let forward_observer = self.observer.clone();
        self.forward_task = Some(tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if let Err(e) = client.send_audio_chunk(chunk).await {
                    forward_observer.error(e);
                }
            }
        }));

        let mut capture =
            AudioCaptureEngine::new(self.audio.input_sample_rate, self.audio.flush_interval_ms);
        let error_observer = self.observer.clone();

        capture
            .start(
                Arc::new(move |chunk| {
                    let _ = chunk_tx.send(chunk);
                }),
                Arc::new(move |level| {
                    observer.level(level);
                    if let Some(playback) = &playback {
                        apply_barge_in(level, threshold, playback);
                    }
                }),
                Arc::new(move |e| error_observer.error(e)),
            )
            .await?;

        // Mark the start of local voice activity; the boundary is
        // advisory, so a send failure does not stop listening.
        if let Err(e) = activity_client.send_activity_start().await {
            self.observer.error(e);
        }

        self.capture = Some(capture);
        Ok(())
    }

    /// Release the capture device and mark the end of voice activity
    pub fn stop_listening(&mut self) {
        let was_listening = self.capture.is_some();
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        if was_listening {
            if let Some(client) = self.client.clone() {
                tokio::spawn(async move {
                    let _ = client.send_activity_end().await;
                });
            }
        }
    }

    /// Mute or unmute capture without releasing the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when not connected.
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.require_connected("set_muted")?;
        if let Some(capture) = &self.capture {
            capture.set_muted(muted);
        }
        Ok(())
    }

    /// Send one completed user utterance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when not connected.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.require_connected("send_text")?;
        self.client
            .as_ref()
            .ok_or_else(missing_client)?
            .send_text(text)
            .await
    }

    /// Seed a restored session with prior turns.
    ///
    /// Must precede the first `send_text` of the restored session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] when not connected.
    pub async fn send_history(
        &self,
        turns: &[ConversationTurn],
        turn_complete: bool,
    ) -> Result<()> {
        self.require_connected("send_history")?;
        self.client
            .as_ref()
            .ok_or_else(missing_client)?
            .send_history(turns, turn_complete)
            .await
    }

    /// Tear down capture, playback, and the protocol client
    /// unconditionally, from any state. Safe to call at any time.
    pub async fn dispose(&mut self) {
        self.stop_listening();
        if let Some(playback) = self.playback.take() {
            playback.stop();
        }
        if let Some(client) = self.client.take() {
            client.close().await;
        }
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.ctx = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("session disposed");
    }

    fn set_state(&mut self, state: ConnectionState) {
        transition(&self.state, &self.observer, state);
    }

    fn require_connected(&self, operation: &str) -> Result<()> {
        let state = self.state();
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::Api(format!(
                "{operation} requires connected state, currently {state}"
            )))
        }
    }

    /// Merge system and caller tools, system tools first.
    ///
    /// `add_tool` already rejects duplicates, so registration here can
    /// only collide if the tool sets changed underneath us; collisions
    /// resolve to the earlier registration.
    fn build_registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in self.system_tools.iter().chain(&self.caller_tools) {
            if let Err(e) = registry.register(Arc::clone(tool)) {
                tracing::warn!(error = %e, "skipping shadowed tool");
            }
        }
        registry
    }
}

fn missing_client() -> Error {
    Error::Api("no active protocol client".to_string())
}

/// Write the shared connection state, notifying the observer on change.
///
/// The observer fires outside the lock.
fn transition(
    state: &Arc<Mutex<ConnectionState>>,
    observer: &SessionObserver,
    to: ConnectionState,
) {
    let changed = {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == to {
            false
        } else {
            tracing::debug!(from = %*guard, to = %to, "connection state");
            *guard = to;
            true
        }
    };
    if changed {
        observer.state(to);
    }
}

/// Local input above the threshold interrupts active playback
/// immediately, without waiting for the remote interruption signal.
fn apply_barge_in(level: f32, threshold: f32, playback: &AudioPlaybackEngine) {
    if level > threshold && playback.is_active() {
        tracing::debug!(level, "barge-in: clearing playback");
        playback.clear();
    }
}

/// Consume inbound session events until the connection ends.
///
/// Every exit path leaves the shared state disconnected, so operations
/// after a remote close or transport error are rejected synchronously.
async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    client: Arc<SessionProtocolClient>,
    playback: Arc<AudioPlaybackEngine>,
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    observer: SessionObserver,
    state: Arc<Mutex<ConnectionState>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Audio(bytes) => playback.enqueue(&bytes),
            SessionEvent::Interrupted => {
                tracing::debug!("remote interruption signal");
                playback.clear();
            }
            SessionEvent::Transcript { kind, text } => observer.transcript(kind, text),
            SessionEvent::TurnComplete => {
                tracing::trace!("model turn complete");
            }
            SessionEvent::ToolCalls(calls) => {
                tracing::debug!(count = calls.len(), "dispatching tool batch");
                let responses = registry.dispatch(calls, &ctx).await;
                if let Err(e) = client.send_tool_responses(responses).await {
                    observer.error(e);
                }
                if ctx.session_end_requested() {
                    observer.session_end();
                    client.close().await;
                    break;
                }
            }
            SessionEvent::Error(message) => {
                observer.error(Error::Connection(message));
                break;
            }
            SessionEvent::Closed => {
                tracing::info!("connection closed by remote");
                observer.error(Error::Connection("connection closed".to_string()));
                break;
            }
        }
    }
    transition(&state, &observer, ConnectionState::Disconnected);
}
