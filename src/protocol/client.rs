//! Session protocol client
//!
//! Translates domain events to and from wire frames over one persistent
//! WebSocket per session. `connect` resolves only after the remote side
//! acknowledges setup; afterwards a read loop surfaces inbound frames as
//! typed [`SessionEvent`]s, and transport errors become events rather
//! than panics.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::{AudioChunk, AudioFormat, from_transport_text, to_transport_text};
use crate::config::SessionOptions;
use crate::protocol::frames::{
    Blob, ClientContent, ClientFrame, Content, ConversationTurn, EmptyObject, FunctionDeclaration,
    FunctionResponse, GenerationConfig, Part, PrebuiltVoiceConfig, RealtimeInput, Role,
    ServerFrame, Setup, SpeechConfig, ToolDeclarations, ToolResponse, VoiceConfig,
    strip_trailing_repeats,
};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Which transcript stream a delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    /// User speech
    Input,
    /// Model speech
    Output,
    /// Model reasoning text
    Thinking,
}

/// Typed inbound events, one per wire frame section
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw PCM bytes, already decoded from transport text
    Audio(Vec<u8>),
    /// Partial or finalized transcript delta
    Transcript {
        /// Which stream the delta belongs to
        kind: TranscriptKind,
        /// Delta text, sanitized for output transcripts
        text: String,
    },
    /// A batch of pending tool invocations
    ToolCalls(Vec<crate::protocol::frames::FunctionCall>),
    /// The model finished its turn
    TurnComplete,
    /// The remote side detected an interruption
    Interrupted,
    /// Transport-level error during live operation
    Error(String),
    /// The connection closed
    Closed,
}

/// Client for one persistent session connection.
///
/// Owns the connection exclusively; outbound messages are serialized in
/// call order on the single sink.
pub struct SessionProtocolClient {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    read_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    input_format: AudioFormat,
}

impl SessionProtocolClient {
    /// Open the transport, send setup, and await the setup acknowledgment.
    ///
    /// Returns the client and the receiver of inbound events. Transcript
    /// deltas on the output stream pass through the trailing-repeat guard
    /// with the given minimum run length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the transport cannot open or
    /// closes before the acknowledgment arrives.
    pub async fn connect(
        options: &SessionOptions,
        declarations: Vec<FunctionDeclaration>,
        input_format: AudioFormat,
        repeat_guard_len: usize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        if options.api_key.is_empty() {
            return Err(Error::Api("missing API key".to_string()));
        }

        let mut endpoint = url::Url::parse(&options.endpoint)
            .map_err(|e| Error::Api(format!("invalid endpoint: {e}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("key", &options.api_key);

        let (ws, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::Connection(format!("transport failed to open: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        tracing::debug!(model = %options.model, "transport open, sending setup");

        let setup = build_setup(options, declarations);
        let text = serde_json::to_string(&ClientFrame::Setup(setup))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::Connection(format!("setup send failed: {e}")))?;

        wait_for_setup_ack(&mut stream).await?;
        tracing::debug!("setup acknowledged");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let read_task = tokio::spawn(read_loop(stream, events_tx, repeat_guard_len));

        Ok((
            Self {
                sink: tokio::sync::Mutex::new(sink),
                read_task: std::sync::Mutex::new(Some(read_task)),
                input_format,
            },
            events_rx,
        ))
    }

    /// Send one captured audio chunk.
    ///
    /// The chunk is consumed; it is never retained after send.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the transport send fails.
    pub async fn send_audio_chunk(&self, chunk: AudioChunk) -> Result<()> {
        let frame = ClientFrame::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: self.input_format.mime_type(),
                data: to_transport_text(&chunk.data),
            }),
            ..Default::default()
        });
        self.send_frame(&frame).await
    }

    /// Send a single completed user utterance.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the transport send fails.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let frame = ClientFrame::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    ..Default::default()
                }],
            }],
            turn_complete: true,
        });
        self.send_frame(&frame).await
    }

    /// Seed the session with prior conversation turns.
    ///
    /// `turn_complete` tells the remote side whether to respond now or
    /// wait for more input.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the transport send fails.
    pub async fn send_history(&self, turns: &[ConversationTurn], turn_complete: bool) -> Result<()> {
        let frame = ClientFrame::ClientContent(ClientContent {
            turns: turns.iter().map(turn_to_content).collect(),
            turn_complete,
        });
        self.send_frame(&frame).await
    }

    /// Mark the start of local voice activity.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport send fails.
    pub async fn send_activity_start(&self) -> Result<()> {
        let frame = ClientFrame::RealtimeInput(RealtimeInput {
            activity_start: Some(EmptyObject {}),
            ..Default::default()
        });
        self.send_frame(&frame).await
    }

    /// Mark the end of local voice activity.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport send fails.
    pub async fn send_activity_end(&self) -> Result<()> {
        let frame = ClientFrame::RealtimeInput(RealtimeInput {
            activity_end: Some(EmptyObject {}),
            ..Default::default()
        });
        self.send_frame(&frame).await
    }

    /// Send one batch of tool responses.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the transport send fails.
    pub async fn send_tool_responses(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        let frame = ClientFrame::ToolResponse(ToolResponse {
            function_responses: responses,
        });
        self.send_frame(&frame).await
    }

    /// Close the connection and stop the read loop.
    ///
    /// Idempotent; safe to call at any time.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        if let Ok(mut guard) = self.read_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }
}

/// Build the setup frame from session options and tool declarations
fn build_setup(options: &SessionOptions, declarations: Vec<FunctionDeclaration>) -> Setup {
    let tools = if declarations.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: declarations,
        }]
    };

    Setup {
        model: options.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: options.voice.clone(),
                    },
                },
            },
        },
        system_instruction: options.system_prompt.as_ref().map(|prompt| Content {
            role: None,
            parts: vec![Part {
                text: Some(prompt.clone()),
                ..Default::default()
            }],
        }),
        tools,
        input_audio_transcription: options
            .enable_input_transcription
            .then_some(EmptyObject {}),
        output_audio_transcription: options
            .enable_output_transcription
            .then_some(EmptyObject {}),
    }
}

fn turn_to_content(turn: &ConversationTurn) -> Content {
    Content {
        role: Some(
            match turn.role {
                Role::User => "user",
                Role::Model => "model",
            }
            .to_string(),
        ),
        parts: turn
            .parts
            .iter()
            .map(|text| Part {
                text: Some(text.clone()),
                ..Default::default()
            })
            .collect(),
    }
}

/// Read frames until the setup acknowledgment.
///
/// Any close or transport error before the acknowledgment is a
/// connection failure, not a normal disconnect.
async fn wait_for_setup_ack(stream: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(message) = stream.next().await {
        let message =
            message.map_err(|e| Error::Connection(format!("transport error before setup ack: {e}")))?;
        match message {
            Message::Text(text) => {
                if let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) {
                    if frame.setup_complete.is_some() {
                        return Ok(());
                    }
                }
            }
            Message::Binary(bytes) => {
                if let Ok(frame) = serde_json::from_slice::<ServerFrame>(&bytes) {
                    if frame.setup_complete.is_some() {
                        return Ok(());
                    }
                }
            }
            Message::Close(_) => {
                return Err(Error::Connection(
                    "connection closed before setup ack".to_string(),
                ));
            }
            _ => {}
        }
    }
    Err(Error::Connection(
        "connection ended before setup ack".to_string(),
    ))
}

/// Surface inbound frames as events until the connection ends
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<SessionEvent>,
    repeat_guard_len: usize,
) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                dispatch_payload(text.as_bytes(), &events, repeat_guard_len);
            }
            Some(Ok(Message::Binary(bytes))) => {
                dispatch_payload(&bytes, &events, repeat_guard_len);
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = events.send(SessionEvent::Closed);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport error");
                let _ = events.send(SessionEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

fn dispatch_payload(
    payload: &[u8],
    events: &mpsc::UnboundedSender<SessionEvent>,
    repeat_guard_len: usize,
) {
    match serde_json::from_slice::<ServerFrame>(payload) {
        Ok(frame) => {
            for event in map_server_frame(frame, repeat_guard_len) {
                let _ = events.send(event);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "unparseable frame");
        }
    }
}

/// Map one inbound frame to its internal events
fn map_server_frame(frame: ServerFrame, repeat_guard_len: usize) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if let Some(tool_call) = frame.tool_call {
        if !tool_call.function_calls.is_empty() {
            events.push(SessionEvent::ToolCalls(tool_call.function_calls));
        }
    }

    let Some(content) = frame.server_content else {
        return events;
    };

    if content.interrupted == Some(true) {
        events.push(SessionEvent::Interrupted);
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                match from_transport_text(&blob.data) {
                    Ok(bytes) => events.push(SessionEvent::Audio(bytes)),
                    Err(e) => tracing::warn!(error = %e, "undecodable audio part"),
                }
            } else if let Some(text) = part.text {
                let kind = if part.thought == Some(true) {
                    TranscriptKind::Thinking
                } else {
                    TranscriptKind::Output
                };
                events.push(SessionEvent::Transcript { kind, text });
            }
        }
    }

    if let Some(transcription) = content.input_transcription {
        if !transcription.text.is_empty() {
            events.push(SessionEvent::Transcript {
                kind: TranscriptKind::Input,
                text: transcription.text,
            });
        }
    }

    if let Some(transcription) = content.output_transcription {
        let text = strip_trailing_repeats(&transcription.text, repeat_guard_len);
        if !text.is_empty() {
            events.push(SessionEvent::Transcript {
                kind: TranscriptKind::Output,
                text,
            });
        }
    }

    if content.turn_complete == Some(true) {
        events.push(SessionEvent::TurnComplete);
    }

    events
}
