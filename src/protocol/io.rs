//! JSONL parsing for messages tagged by a `type` field
//!
//! - `parse_graceful` classifies a line instead of failing on unknown types
//! - `serialize_message` produces one line (without the newline)
//! - `JsonlReader` streams typed messages from any reader

use std::io::{BufRead, BufReader, Read};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Maximum length for raw JSON in logs (program output can be large)
const MAX_RAW_LOG_PREVIEW: usize = 200;

/// Truncated preview of raw JSON for logging, plus the full length
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len > MAX_RAW_LOG_PREVIEW {
        let mut end = MAX_RAW_LOG_PREVIEW;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        (&raw[..end], len)
    } else {
        (raw, len)
    }
}

/// Classified result of parsing one line
#[derive(Debug)]
pub enum ParseResult<T> {
    Ok(T),
    /// No "type" field
    MissingType { raw: String },
    /// Valid JSON with a "type" we don't recognize
    UnknownType { message_type: String, raw: String },
    /// Known type, wrong or missing fields
    InvalidPayload {
        message_type: String,
        error: String,
        raw: String,
    },
    /// Not JSON at all
    ParseError(serde_json::Error),
}

/// Parse a line, separating unknown types from broken payloads.
///
/// Parses to `serde_json::Value` once, then converts, so unknown types are
/// not parsed twice. Raw JSON is truncated in the result.
pub fn parse_graceful<T: DeserializeOwned>(line: &str) -> ParseResult<T> {
    let (preview, _raw_len) = log_preview(line);

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return ParseResult::ParseError(e),
    };

    let msg_type: String = match value.get("type").and_then(|t| t.as_str()) {
        Some(t) => t.to_string(),
        None => {
            return ParseResult::MissingType {
                raw: preview.to_string(),
            };
        }
    };

    match serde_json::from_value::<T>(value) {
        Ok(msg) => ParseResult::Ok(msg),
        Err(e) => {
            let error_str = e.to_string();
            if error_str.contains("unknown variant") {
                ParseResult::UnknownType {
                    message_type: msg_type,
                    raw: preview.to_string(),
                }
            } else {
                ParseResult::InvalidPayload {
                    message_type: msg_type,
                    error: error_str,
                    raw: preview.to_string(),
                }
            }
        }
    }
}

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Streaming JSONL reader that skips lines it can't use.
///
/// Reuses one line buffer across reads.
pub struct JsonlReader<R: Read, T> {
    reader: BufReader<R>,
    line_buffer: String,
    _message: PhantomData<fn() -> T>,
}

impl<R: Read, T: DeserializeOwned> JsonlReader<R, T> {
    pub fn new(reader: R) -> Self {
        JsonlReader {
            reader: BufReader::new(reader),
            line_buffer: String::with_capacity(1024),
            _message: PhantomData,
        }
    }

    /// Next well-formed message of a known type.
    ///
    /// Blank, malformed and unknown lines are logged and skipped.
    /// Returns `Ok(None)` at end of stream; only I/O errors are returned.
    pub fn next_message_graceful(&mut self) -> Result<Option<T>, std::io::Error> {
        loop {
            self.line_buffer.clear();
            if self.reader.read_line(&mut self.line_buffer)? == 0 {
                debug!("Reached end of JSONL stream");
                return Ok(None);
            }

            let trimmed = self.line_buffer.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (preview, raw_len) = log_preview(trimmed);

            match parse_graceful::<T>(trimmed) {
                ParseResult::Ok(msg) => return Ok(Some(msg)),
                ParseResult::MissingType { .. } => {
                    warn!(
                        raw_preview = %preview,
                        raw_len,
                        "Skipping message with missing 'type' field"
                    );
                }
                ParseResult::UnknownType { message_type, .. } => {
                    warn!(
                        message_type = %message_type,
                        raw_preview = %preview,
                        raw_len,
                        "Skipping unknown message type"
                    );
                }
                ParseResult::InvalidPayload {
                    message_type,
                    error,
                    ..
                } => {
                    warn!(
                        message_type = %message_type,
                        error = %error,
                        raw_preview = %preview,
                        raw_len,
                        "Skipping message with invalid payload"
                    );
                }
                ParseResult::ParseError(e) => {
                    warn!(
                        error = %e,
                        raw_preview = %preview,
                        raw_len,
                        "Skipping malformed JSON message"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControllerMessage, HostMessage};
    use std::io::Cursor;

    #[test]
    fn test_log_preview_truncation() {
        let (preview, len) = log_preview("hello");
        assert_eq!(preview, "hello");
        assert_eq!(len, 5);

        let long = "a".repeat(500);
        let (preview, len) = log_preview(&long);
        assert_eq!(preview.len(), 200);
        assert_eq!(len, 500);
    }

    #[test]
    fn test_log_preview_respects_char_boundaries() {
        let long = "é".repeat(150);
        let (preview, len) = log_preview(&long);
        assert_eq!(len, 300);
        assert_eq!(preview.len(), 200);
        assert!(preview.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_parse_graceful_classifies_lines() {
        assert!(matches!(
            parse_graceful::<HostMessage>(r#"{"type":"LINT","content":"x = 1"}"#),
            ParseResult::Ok(HostMessage::Lint { .. })
        ));
        assert!(matches!(
            parse_graceful::<HostMessage>(r#"{"type":"REBOOT"}"#),
            ParseResult::UnknownType { message_type, .. } if message_type == "REBOOT"
        ));
        assert!(matches!(
            parse_graceful::<HostMessage>(r#"{"content":"x"}"#),
            ParseResult::MissingType { .. }
        ));
        assert!(matches!(
            parse_graceful::<HostMessage>(r#"{"type":"RUN"}"#),
            ParseResult::InvalidPayload { error, .. } if error.contains("content")
        ));
        assert!(matches!(
            parse_graceful::<HostMessage>("not json"),
            ParseResult::ParseError(_)
        ));
    }

    #[test]
    fn test_jsonl_reader_skips_unusable_lines() {
        let jsonl = "\n{\"type\":\"LOADED\"}\n{\"type\":\"WHO_KNOWS\"}\ngarbage\n{\"type\":\"FILES_SYNCED\"}\n";
        let mut reader = JsonlReader::<_, ControllerMessage>::new(Cursor::new(jsonl));

        assert_eq!(
            reader.next_message_graceful().unwrap(),
            Some(ControllerMessage::Loaded)
        );
        assert_eq!(
            reader.next_message_graceful().unwrap(),
            Some(ControllerMessage::FilesSynced)
        );
        assert_eq!(reader.next_message_graceful().unwrap(), None);
    }

    #[test]
    fn test_serialize_message_is_single_line() {
        let line = serialize_message(&ControllerMessage::stdout("a\nb")).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(line, r#"{"type":"OUTPUT","content":"a\nb"}"#);
    }
}
