use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{is_render_eligible, render_url, ValidationResult, ValidationStage};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Pending,
    Complete,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorMessage {
    #[serde(alias = "error")]
    pub error_message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorResultBody {
    /// Raw stage name; unknown names are reported by the mapper.
    #[serde(default)]
    pub validation_status: Option<String>,
    #[serde(default)]
    pub error_messages: Vec<ValidatorMessage>,
}

/// Response body of both the submit and the check calls of the validator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorEnvelope {
    pub status: EnvelopeStatus,
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub result: Option<ValidatorResultBody>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("validator response for file {0} has no result")]
    MissingResult(String),
    #[error("unknown validation status {0:?}")]
    UnknownStatus(String),
    #[error("validation status {0} contradicts the envelope status")]
    UnexpectedStage(ValidationStage),
}

fn stage_of(body: &ValidatorResultBody) -> Result<ValidationStage, MappingError> {
    match body.validation_status.as_deref() {
        None => Ok(ValidationStage::Queued),
        Some(name) => ValidationStage::from_wire(name)
            .ok_or_else(|| MappingError::UnknownStatus(name.to_string())),
    }
}

/// Maps one validator envelope. `render_base` prefixes the image URL of
/// renderable successes.
pub fn map_envelope(
    envelope: &ValidatorEnvelope,
    render_base: &str,
) -> Result<ValidationResult, MappingError> {
    let file_id = envelope.file_id.clone();
    let file_name = envelope.file_name.clone();
    let body = envelope
        .result
        .as_ref()
        .ok_or_else(|| MappingError::MissingResult(file_id.clone()))?;

    match envelope.status {
        EnvelopeStatus::Pending => {
            let stage = stage_of(body)?;
            if stage.is_terminal() {
                return Err(MappingError::UnexpectedStage(stage));
            }
            Ok(ValidationResult::pending(file_id, file_name, stage))
        }
        EnvelopeStatus::Error => {
            warn!("Validator reported an error for file [{file_id}]");
            Ok(ValidationResult::error(file_id, file_name))
        }
        EnvelopeStatus::Complete => match stage_of(body)? {
            ValidationStage::Ok => {
                let image_url = file_name
                    .as_deref()
                    .filter(|name| is_render_eligible(name))
                    .map(|_| render_url(render_base, &file_id));
                Ok(ValidationResult::success(file_id, file_name, image_url))
            }
            ValidationStage::Failed => {
                let reasons = body
                    .error_messages
                    .iter()
                    .map(|m| m.error_message.clone())
                    .collect();
                Ok(ValidationResult::failure(file_id, file_name, reasons))
            }
            other => Err(MappingError::UnexpectedStage(other)),
        },
    }
}
