use crate::data::ValidationResult;
use crate::validation::FieldError;
use serde::{Deserialize, Serialize};

/// Sent in place of a result when the server stops waiting for the validator.
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Comment event that keeps an idle event stream busy. Readers skip it.
pub const HEARTBEAT_EVENT: &str = ": ping\n\n";

// Response payloads

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum ErrorablePayload<T> {
    Ok(T),
    NotFound,
    Err(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
    /// Job state at the time the upload was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProgressResponse {
    pub progress: u8,
}

/// 400 body of the upload and pre-flight endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FieldErrorsResponse {
    pub errors: Vec<FieldError>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum StreamPayload {
    Result(ValidationResult),
    Notice(String),
}

/// One `data:` line of the progress stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StreamMessage {
    pub message: StreamPayload,
}

impl StreamMessage {
    pub fn result(result: ValidationResult) -> Self {
        Self {
            message: StreamPayload::Result(result),
        }
    }

    pub fn timeout() -> Self {
        Self {
            message: StreamPayload::Notice(TIMEOUT_MESSAGE.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(&self.message, StreamPayload::Notice(n) if n == TIMEOUT_MESSAGE)
    }

    /// Encodes the message as a complete server-sent event.
    pub fn to_event(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_messages_decode_both_shapes() {
        let pending = ValidationResult::pending(
            "abc".to_string(),
            None,
            crate::data::ValidationStage::VirusScanned,
        );
        let event = StreamMessage::result(pending.clone()).to_event().unwrap();
        assert!(event.starts_with("data: {\"message\":{\"status\":\"pending\""));
        assert!(event.ends_with("\n\n"));

        let line = event.trim_end().trim_start_matches("data: ");
        let decoded: StreamMessage = serde_json::from_str(line).unwrap();
        assert_eq!(decoded.message, StreamPayload::Result(pending));
        assert!(!decoded.is_timeout());

        let decoded: StreamMessage = serde_json::from_str(r#"{"message":"timeout"}"#).unwrap();
        assert!(decoded.is_timeout());
    }

    #[test]
    fn errorable_payload_shape() {
        let p: ErrorablePayload<()> = ErrorablePayload::Err("bad".to_string());
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            serde_json::json!({"status": "err", "payload": "bad"})
        );
    }
}
