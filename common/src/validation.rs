use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of leading bytes inspected to sniff the file type.
pub const SNIFF_LENGTH: usize = 50;

const ZIP_MAGIC_NUMBER: &str = "PK\u{3}\u{4}";

static XML_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*<\?xml").expect("valid xml pattern"));
static HTML_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*<html").expect("valid html pattern"));

pub mod messages {
    pub const NO_FILE: &str = "Select an accounts file.";
    pub const INVALID_FILE_TYPE: &str = "The selected file must be a XHTML or ZIP.";

    pub fn file_too_large(max_size_mb: u64) -> String {
        format!("The selected file must be smaller than {max_size_mb}MB")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaData {
    pub size: u64,
    pub first_bytes: String,
}

impl FileMetaData {
    pub fn from_bytes(size: u64, bytes: &[u8]) -> Self {
        let head = &bytes[..bytes.len().min(SNIFF_LENGTH)];
        Self {
            size,
            first_bytes: String::from_utf8_lossy(head).into_owned(),
        }
    }
}

/// Body of the pre-flight request. `file` is `null` when nothing was selected.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubmittedFileValidationRequest {
    pub file: Option<FileMetaData>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FormValidationResult {
    pub errors: Vec<FieldError>,
}

impl FormValidationResult {
    pub fn add_error(&mut self, field: &str, text: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            text: text.into(),
        });
    }

    pub fn error_for_field(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.field == field)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn max_size_mb(max_size: u64) -> u64 {
    (max_size as f64 / 1024.0 / 1024.0).round() as u64
}

pub fn is_valid_file_type(first_bytes: &str) -> bool {
    first_bytes.starts_with(ZIP_MAGIC_NUMBER)
        || XML_PATTERN.is_match(first_bytes)
        || HTML_PATTERN.is_match(first_bytes)
}

pub fn validate_request(
    req: &SubmittedFileValidationRequest,
    field: &str,
    max_size: u64,
) -> FormValidationResult {
    let mut result = FormValidationResult::default();
    let Some(file) = &req.file else {
        result.add_error(field, messages::NO_FILE);
        return result;
    };
    if !is_valid_file_type(&file.first_bytes) {
        result.add_error(field, messages::INVALID_FILE_TYPE);
    }
    if file.size > max_size {
        result.add_error(field, messages::file_too_large(max_size_mb(max_size)));
    }
    result
}
