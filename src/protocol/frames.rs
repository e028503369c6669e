//! Wire frames for the bidirectional session connection
//!
//! All frames are self-contained JSON messages, camelCase on the wire.
//! Outbound frames serialize as externally-tagged variants, e.g.
//! `{"setup": {...}}`; inbound frames arrive as a struct of optional
//! sections, at most one populated per message.

use serde::{Deserialize, Serialize};

/// Role attribution for one conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Local user
    User,
    /// Remote model
    Model,
}

/// One role-attributed unit of prior conversation, used to seed a
/// restored session. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who said it
    pub role: Role,
    /// Ordered text parts
    pub parts: Vec<String>,
}

impl ConversationTurn {
    /// Single-part turn
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![text.into()],
        }
    }
}

/// A content block: role plus ordered parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// `user` or `model`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ordered parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a content block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Binary payload (audio) as transport text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Marks model reasoning text rather than spoken output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

/// Transport-text binary payload with a MIME-style format tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// Declares one callable tool to the remote model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    /// Unique name within the session
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON-schema-like parameter description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// A tool invocation requested by the remote model.
///
/// The `id` correlates exactly one response; this layer never retries a
/// call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Opaque correlation id
    #[serde(default)]
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as a key-value map
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The single response to one [`FunctionCall`].
///
/// `id` must equal the originating call's id. On execution failure
/// `error` is populated and `result` is empty; a call is never silently
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    /// Correlation id copied from the call
    pub id: String,
    /// Tool name copied from the call
    pub name: String,
    /// `{result, error?}` payload visible to the remote model
    pub response: FunctionResult,
}

/// Result payload of a function response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    /// Successful output; empty when `error` is set
    pub result: String,
    /// Failure message, protocol-visible so the model can react
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionResponse {
    /// Successful response for the given call
    #[must_use]
    pub fn ok(call: &FunctionCall, result: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: FunctionResult {
                result: result.into(),
                error: None,
            },
        }
    }

    /// Failed response for the given call
    #[must_use]
    pub fn err(call: &FunctionCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: FunctionResult {
                result: String::new(),
                error: Some(error.into()),
            },
        }
    }
}

// -- Outbound frames --

/// Session configuration sent immediately after the transport opens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model identity
    pub model: String,
    /// Voice and output modality
    pub generation_config: GenerationConfig,
    /// Optional system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Declared tools (system + caller), names unique
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclarations>,
    /// Request transcription of user speech
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyObject>,
    /// Request transcription of model speech
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyObject>,
}

/// Generation options inside setup
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Output modality, `AUDIO` for voice sessions
    pub response_modalities: Vec<String>,
    /// Synthesized voice selection
    pub speech_config: SpeechConfig,
}

/// Voice selection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Prebuilt voice wrapper
    pub voice_config: VoiceConfig,
}

/// Prebuilt voice wrapper
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Named prebuilt voice
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Named prebuilt voice
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, e.g. `Aoede`
    pub voice_name: String,
}

/// Tool declaration group inside setup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    /// Declared functions
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Serializes as `{}`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Streaming input: one audio chunk or an activity boundary
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// One transport-encoded PCM chunk with its format tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    /// Explicit start of voice activity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<EmptyObject>,
    /// Explicit end of voice activity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<EmptyObject>,
}

/// Completed user input: one utterance or restored history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Turns to append to the remote conversation
    pub turns: Vec<Content>,
    /// Whether the remote side should respond now or wait for more input
    pub turn_complete: bool,
}

/// Batched responses to a tool-call frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// One response per received call, self-identified by id
    pub function_responses: Vec<FunctionResponse>,
}

/// Everything the client can send, externally tagged on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientFrame {
    /// `{"setup": ...}`
    Setup(Setup),
    /// `{"realtimeInput": ...}`
    RealtimeInput(RealtimeInput),
    /// `{"clientContent": ...}`
    ClientContent(ClientContent),
    /// `{"toolResponse": ...}`
    ToolResponse(ToolResponse),
}

// -- Inbound frames --

/// One inbound message; at most one section is populated
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    /// Setup acknowledgment; `connect()` resolves on this
    pub setup_complete: Option<EmptyObject>,
    /// Model output: audio, transcripts, turn and interruption signals
    pub server_content: Option<ServerContent>,
    /// Pending tool invocations
    pub tool_call: Option<ToolCallFrame>,
}

/// Inbound model output
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Audio and text parts of the in-progress model turn
    pub model_turn: Option<Content>,
    /// Transcript delta of user speech
    pub input_transcription: Option<Transcription>,
    /// Transcript delta of model speech
    pub output_transcription: Option<Transcription>,
    /// The model finished its turn
    #[serde(default)]
    pub turn_complete: Option<bool>,
    /// The remote side detected an interruption
    #[serde(default)]
    pub interrupted: Option<bool>,
}

/// A partial or finalized transcript delta
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    /// Delta text
    #[serde(default)]
    pub text: String,
    /// Set when this delta finalizes the transcript
    #[serde(default)]
    pub finished: Option<bool>,
}

/// One or more pending tool invocations
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    /// The batch of calls; each gets exactly one response
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// Strip a terminal run of `min_run` or more identical characters.
///
/// Guards against a known model artifact where an output transcript
/// delta ends in a long repeated-character run. Shorter runs pass
/// through untouched.
#[must_use]
pub fn strip_trailing_repeats(text: &str, min_run: usize) -> String {
    if min_run == 0 {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let Some(&last) = chars.last() else {
        return String::new();
    };

    let run = chars.iter().rev().take_while(|&&c| c == last).count();
    if run >= min_run {
        chars[..chars.len() - run].iter().collect()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_externally_tagged() {
        let frame = ClientFrame::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAAA".to_string(),
            }),
            ..Default::default()
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["audio"]["data"], "AAAA");
        assert!(json["realtimeInput"].get("activityStart").is_none());
    }

    #[test]
    fn activity_boundaries_serialize_as_empty_objects() {
        let start = ClientFrame::RealtimeInput(RealtimeInput {
            activity_start: Some(EmptyObject {}),
            ..Default::default()
        });
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["realtimeInput"]["activityStart"], serde_json::json!({}));
        assert!(json["realtimeInput"].get("audio").is_none());
        assert!(json["realtimeInput"].get("activityEnd").is_none());

        let end = ClientFrame::RealtimeInput(RealtimeInput {
            activity_end: Some(EmptyObject {}),
            ..Default::default()
        });
        let json = serde_json::to_value(&end).unwrap();
        assert_eq!(json["realtimeInput"]["activityEnd"], serde_json::json!({}));
    }

    #[test]
    fn setup_serializes_camel_case() {
        let setup = Setup {
            model: "models/test".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Aoede".to_string(),
                        },
                    },
                },
            },
            system_instruction: None,
            tools: vec![ToolDeclarations {
                function_declarations: vec![FunctionDeclaration {
                    name: "end_session".to_string(),
                    description: "End the session".to_string(),
                    parameters: None,
                }],
            }],
            input_audio_transcription: Some(EmptyObject {}),
            output_audio_transcription: None,
        };

        let json = serde_json::to_value(ClientFrame::Setup(setup)).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Aoede"
        );
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "end_session");
        assert!(setup.get("inputAudioTranscription").is_some());
        assert!(setup.get("outputAudioTranscription").is_none());
    }

    #[test]
    fn server_frame_parses_tool_calls() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"toolCall":{"functionCalls":[{"id":"c1","name":"set_timer","args":{"minutes":5}}]}}"#,
        )
        .unwrap();
        let calls = frame.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].args["minutes"], 5);
    }

    #[test]
    fn server_frame_parses_interruption() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(frame.server_content.unwrap().interrupted, Some(true));
    }

    #[test]
    fn strip_trailing_repeats_long_run() {
        assert_eq!(strip_trailing_repeats("hello......", 6), "hello");
        assert_eq!(strip_trailing_repeats("aaaaaaa", 6), "");
    }

    #[test]
    fn strip_trailing_repeats_short_run_untouched() {
        assert_eq!(strip_trailing_repeats("hello.....", 6), "hello.....");
        assert_eq!(strip_trailing_repeats("hello", 6), "hello");
        assert_eq!(strip_trailing_repeats("", 6), "");
    }

    #[test]
    fn function_response_error_shape() {
        let call = FunctionCall {
            id: "c9".to_string(),
            name: "missing".to_string(),
            args: serde_json::Value::Null,
        };
        let resp = FunctionResponse::err(&call, "tool not found: missing");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], "c9");
        assert_eq!(json["response"]["result"], "");
        assert_eq!(json["response"]["error"], "tool not found: missing");
    }
}
