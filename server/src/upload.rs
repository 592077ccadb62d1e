use std::path::Path;

use actix_multipart::{Field, Multipart, MultipartError};
use bytes::BytesMut;
use common::validation::{
    max_size_mb, messages, validate_request, FileMetaData, FormValidationResult,
    SubmittedFileValidationRequest,
};
use futures_util::StreamExt as _;
use log::{debug, warn};

use crate::submission::UploadedFile;

#[derive(Debug)]
pub enum ReadOutcome {
    /// The form had no file, or an empty one.
    NoFile,
    TooLarge,
    File(UploadedFile),
}

/// Strips any directory part a client may send along with the name.
fn base_name(raw: &str) -> Option<String> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

async fn drain(field: &mut Field) -> Result<(), MultipartError> {
    while let Some(chunk) = field.next().await {
        chunk?;
    }
    Ok(())
}

/// Reads the field named `field_name`, refusing to buffer more than
/// `max_size` bytes. Other fields are skipped.
pub async fn read_upload(
    mut payload: Multipart,
    field_name: &str,
    max_size: u64,
) -> Result<ReadOutcome, MultipartError> {
    let mut outcome = ReadOutcome::NoFile;
    while let Some(field) = payload.next().await {
        let mut field = field?;
        if field.name() != Some(field_name) || !matches!(outcome, ReadOutcome::NoFile) {
            drain(&mut field).await?;
            continue;
        }
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .and_then(base_name);
        let content_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut buf = BytesMut::new();
        let mut exceeded = false;
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if buf.len() as u64 + chunk.len() as u64 > max_size {
                exceeded = true;
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        if exceeded {
            warn!("Upload exceeded the {max_size} byte limit");
            return Ok(ReadOutcome::TooLarge);
        }
        outcome = match name {
            Some(name) if !buf.is_empty() => {
                debug!("Received {name} ({} bytes)", buf.len());
                ReadOutcome::File(UploadedFile {
                    name,
                    content_type,
                    bytes: buf.freeze(),
                })
            }
            _ => ReadOutcome::NoFile,
        };
    }
    Ok(outcome)
}

/// Applies the pre-flight rules to what was actually uploaded.
pub fn validate_upload(outcome: &ReadOutcome, field_name: &str, max_size: u64) -> FormValidationResult {
    match outcome {
        ReadOutcome::TooLarge => {
            let mut result = FormValidationResult::default();
            result.add_error(field_name, messages::file_too_large(max_size_mb(max_size)));
            result
        }
        ReadOutcome::NoFile => validate_request(
            &SubmittedFileValidationRequest { file: None },
            field_name,
            max_size,
        ),
        ReadOutcome::File(file) => validate_request(
            &SubmittedFileValidationRequest {
                file: Some(FileMetaData::from_bytes(file.bytes.len() as u64, &file.bytes)),
            },
            field_name,
            max_size,
        ),
    }
}
