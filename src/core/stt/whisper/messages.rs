//! Whisper transcription API response types.

use serde::Deserialize;

use crate::core::stt::base::{is_suppressed_transcript, TranscriptResult};

/// Successful transcription response (`response_format=json`).
#[derive(Debug, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

/// Error envelope returned by the transcription endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
}

/// Extract a human-readable error message from a response body, falling
/// back to the raw body when it is not the documented envelope.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => body.chars().take(200).collect(),
    }
}

/// Convert recognized text into a deliverable result, or `None` when the
/// text must be suppressed (silence or a configured junk phrase).
///
/// Buffered mode has no interim results: everything surfaced is final
/// with full confidence.
pub fn to_transcript(text: &str, junk_phrases: &[String]) -> Option<TranscriptResult> {
    if is_suppressed_transcript(text, junk_phrases) {
        None
    } else {
        Some(TranscriptResult::new(text.trim(), true, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcription_response() {
        let raw = r#"{"text": "hola, quiero información"}"#;
        let parsed: TranscriptionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text, "hola, quiero información");
    }

    #[test]
    fn test_error_message_from_envelope() {
        let raw = r#"{"error": {"message": "Invalid file format."}}"#;
        assert_eq!(error_message(raw), "Invalid file format.");
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_to_transcript_final_full_confidence() {
        let result = to_transcript(" hola ", &[]).unwrap();
        assert_eq!(result.text, "hola");
        assert!(result.is_final);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_to_transcript_suppresses_junk() {
        let junk = vec!["Gracias por ver el video".to_string()];
        assert!(to_transcript("Gracias por ver el video", &junk).is_none());
        assert!(to_transcript("", &junk).is_none());
    }
}
