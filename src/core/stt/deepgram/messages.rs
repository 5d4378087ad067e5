//! Deepgram streaming API message types.
//!
//! Inbound messages are JSON with a `type` discriminator: transcription
//! results (interim and final), utterance-end markers, stream metadata,
//! warnings, and errors.

use serde::{Deserialize, Serialize};

/// Parsed inbound message from the recognizer.
#[derive(Debug, Clone)]
pub enum DeepgramMessage {
    /// Interim or final transcription result.
    Results(ResultsPayload),
    /// End of a spoken utterance detected by server-side VAD.
    UtteranceEnd,
    /// Stream metadata, sent at stream start and close.
    Metadata,
    /// Non-fatal warning from the recognizer.
    Warning(String),
    /// Error reported by the recognizer.
    Error(String),
    /// Unrecognized message type, kept for logging.
    Unknown(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPayload {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    pub channel: Channel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
struct WarningPayload {
    #[serde(default)]
    warning: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    description: String,
    #[serde(default)]
    message: String,
}

impl DeepgramMessage {
    /// Parse a raw text frame into a typed message.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let msg_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match msg_type {
            "Results" => {
                let payload: ResultsPayload = serde_json::from_value(value)?;
                Ok(DeepgramMessage::Results(payload))
            }
            "UtteranceEnd" => Ok(DeepgramMessage::UtteranceEnd),
            "Metadata" => Ok(DeepgramMessage::Metadata),
            "Warning" => {
                let payload: WarningPayload = serde_json::from_value(value)?;
                Ok(DeepgramMessage::Warning(payload.warning))
            }
            "Error" => {
                let payload: ErrorPayload = serde_json::from_value(value.clone())?;
                let detail = if payload.description.is_empty() {
                    payload.message
                } else {
                    payload.description
                };
                Ok(DeepgramMessage::Error(detail))
            }
            other => Ok(DeepgramMessage::Unknown(other.to_string())),
        }
    }
}

impl ResultsPayload {
    /// Best transcript text, if any alternative is present.
    pub fn transcript(&self) -> Option<(&str, f32)> {
        self.channel
            .alternatives
            .first()
            .map(|alt| (alt.transcript.as_str(), alt.confidence))
    }
}

/// Control frame telling the recognizer to finish processing and close.
#[derive(Debug, Serialize)]
pub struct CloseStreamMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

impl Default for CloseStreamMessage {
    fn default() -> Self {
        Self { msg_type: "CloseStream" }
    }
}

/// Control frame keeping an idle connection open.
#[derive(Debug, Serialize)]
pub struct KeepAliveMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

impl Default for KeepAliveMessage {
    fn default() -> Self {
        Self { msg_type: "KeepAlive" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interim_results() {
        let raw = r#"{
            "type": "Results",
            "is_final": false,
            "speech_final": false,
            "channel": {"alternatives": [{"transcript": "hola qu", "confidence": 0.82}]}
        }"#;
        let msg = DeepgramMessage::parse(raw).unwrap();
        match msg {
            DeepgramMessage::Results(payload) => {
                assert!(!payload.is_final);
                let (text, confidence) = payload.transcript().unwrap();
                assert_eq!(text, "hola qu");
                assert!((confidence - 0.82).abs() < 0.001);
            }
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_results() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": true,
            "channel": {"alternatives": [{"transcript": "hola", "confidence": 0.97}]}
        }"#;
        match DeepgramMessage::parse(raw).unwrap() {
            DeepgramMessage::Results(payload) => {
                assert!(payload.is_final);
                assert!(payload.speech_final);
            }
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_utterance_end() {
        let raw = r#"{"type": "UtteranceEnd", "last_word_end": 2.1}"#;
        assert!(matches!(
            DeepgramMessage::parse(raw).unwrap(),
            DeepgramMessage::UtteranceEnd
        ));
    }

    #[test]
    fn test_parse_error() {
        let raw = r#"{"type": "Error", "description": "bad audio encoding"}"#;
        match DeepgramMessage::parse(raw).unwrap() {
            DeepgramMessage::Error(detail) => assert_eq!(detail, "bad audio encoding"),
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        let raw = r#"{"type": "SpeechStarted", "timestamp": 0.4}"#;
        match DeepgramMessage::parse(raw).unwrap() {
            DeepgramMessage::Unknown(kind) => assert_eq!(kind, "SpeechStarted"),
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_results_without_alternatives() {
        let raw = r#"{"type": "Results", "is_final": true, "channel": {"alternatives": []}}"#;
        match DeepgramMessage::parse(raw).unwrap() {
            DeepgramMessage::Results(payload) => assert!(payload.transcript().is_none()),
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_control_frames_serialize() {
        let close = serde_json::to_string(&CloseStreamMessage::default()).unwrap();
        assert_eq!(close, r#"{"type":"CloseStream"}"#);
        let keepalive = serde_json::to_string(&KeepAliveMessage::default()).unwrap();
        assert_eq!(keepalive, r#"{"type":"KeepAlive"}"#);
    }
}
