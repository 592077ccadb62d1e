use std::{io, path::Path};

use anyhow::{anyhow, Result};
use async_stream::stream;
use bytes::Bytes;
use common::{
    payloads::{ErrorablePayload, FieldErrorsResponse, UploadResponse},
    validation::{FieldError, FileMetaData, SubmittedFileValidationRequest},
};
use futures_util::Stream;
use log::{debug, warn};
use reqwest::{
    multipart::{Form, Part},
    Body, Client, StatusCode,
};
use url::Url;

/// Share of the progress bar owned by the upload itself.
pub const UPLOAD_SHARE: f64 = 25.0;

const CHUNK_SIZE: usize = 64 * 1024;

/// Collapses byte progress into one of 5, 12 or 25 percent, so fast uploads
/// don't flicker. `None` when the total is unknown.
pub fn bucket_upload_progress(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let scaled = (loaded.min(total) as f64 / total as f64 * UPLOAD_SHARE).round();
    Some(if scaled < 12.5 {
        5
    } else if scaled < 24.9 {
        12
    } else {
        25
    })
}

/// Splits `bytes` into chunks, calling `on_progress` whenever the bucket
/// changes after a chunk has been handed on.
pub fn progress_chunks(
    bytes: Bytes,
    chunk_size: usize,
    mut on_progress: impl FnMut(u8) + Send + Sync + 'static,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    let chunk_size = chunk_size.max(1);
    let total = bytes.len() as u64;
    stream! {
        let mut sent = 0;
        let mut last = None;
        while sent < bytes.len() {
            let end = (sent + chunk_size).min(bytes.len());
            yield Ok::<_, io::Error>(bytes.slice(sent..end));
            sent = end;
            let bucket = bucket_upload_progress(sent as u64, total);
            if bucket != last {
                if let Some(b) = bucket {
                    on_progress(b);
                }
                last = bucket;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

fn guess_mime(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("zip") => "application/zip",
        Some("xhtml") => "application/xhtml+xml",
        Some("html" | "htm") => "text/html",
        Some("xml" | "xbrl") => "application/xml",
        _ => "application/octet-stream",
    }
}

impl LocalFile {
    pub async fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
            .to_string();
        let bytes = Bytes::from(tokio::fs::read(path).await?);
        Ok(Self {
            mime_type: guess_mime(&name).to_string(),
            name,
            bytes,
        })
    }

    pub fn metadata(&self) -> FileMetaData {
        FileMetaData::from_bytes(self.bytes.len() as u64, &self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// The server took the file; progress is tracked by this id.
    Accepted(String),
    /// The form needs fixing before it can be sent again.
    Rejected(Vec<FieldError>),
    Failed(String),
}

/// Reads the server's answer to an upload.
pub fn classify(status: StatusCode, body: &str) -> UploadOutcome {
    match status {
        StatusCode::OK => match serde_json::from_str::<UploadResponse>(body) {
            Ok(resp) => UploadOutcome::Accepted(resp.file_id),
            Err(e) => UploadOutcome::Failed(format!("undecodable upload response: {e}")),
        },
        StatusCode::BAD_REQUEST => {
            if let Ok(resp) = serde_json::from_str::<FieldErrorsResponse>(body) {
                return UploadOutcome::Rejected(resp.errors);
            }
            match serde_json::from_str::<ErrorablePayload<()>>(body) {
                Ok(ErrorablePayload::Err(text)) => UploadOutcome::Rejected(vec![FieldError {
                    field: "request".to_string(),
                    text,
                }]),
                _ => UploadOutcome::Failed(format!("bad request: {body}")),
            }
        }
        other => UploadOutcome::Failed(format!("bad status code {other}")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub package_type: Option<String>,
    pub company_number: Option<String>,
}

pub struct Transport {
    client: Client,
    base_url: String,
    field_name: String,
}

impl Transport {
    pub fn new(client: Client, base_url: &str, field_name: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            field_name: field_name.to_string(),
        }
    }

    pub fn submit_url(&self, options: &SubmitOptions) -> Result<Url> {
        let params = [
            ("packageType", options.package_type.as_deref()),
            ("companyNumber", options.company_number.as_deref()),
        ];
        let params: Vec<(&str, &str)> = params
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        let mut url = Url::parse(&format!("{}/submit", self.base_url))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// Asks the server whether the file would be accepted, without sending it.
    /// Any answer other than 400 counts as accepted.
    pub async fn preflight(&self, file: Option<&LocalFile>) -> Result<Vec<FieldError>> {
        let request = SubmittedFileValidationRequest {
            file: file.map(LocalFile::metadata),
        };
        let res = self
            .client
            .post(format!("{}/submit/validate", self.base_url))
            .json(&request)
            .send()
            .await?;
        if res.status() != StatusCode::BAD_REQUEST {
            return Ok(Vec::new());
        }
        let body: FieldErrorsResponse = res.json().await?;
        Ok(body.errors)
    }

    /// Sends the form. With no file, an empty file part goes up and the server
    /// reports what is missing.
    pub async fn upload(
        &self,
        file: Option<LocalFile>,
        options: &SubmitOptions,
        on_progress: impl FnMut(u8) + Send + Sync + 'static,
    ) -> UploadOutcome {
        let url = match self.submit_url(options) {
            Ok(url) => url,
            Err(e) => return UploadOutcome::Failed(e.to_string()),
        };
        let part = match file {
            Some(file) => {
                debug!("Uploading {} ({} bytes)", file.name, file.bytes.len());
                let len = file.bytes.len() as u64;
                let body = Body::wrap_stream(progress_chunks(file.bytes, CHUNK_SIZE, on_progress));
                match Part::stream_with_length(body, len)
                    .file_name(file.name)
                    .mime_str(&file.mime_type)
                {
                    Ok(part) => part,
                    Err(e) => return UploadOutcome::Failed(e.to_string()),
                }
            }
            None => Part::bytes(Vec::new()).file_name(""),
        };
        let form = Form::new().part(self.field_name.clone(), part);

        let res = match self.client.post(url).multipart(form).send().await {
            Ok(res) => res,
            Err(e) => {
                warn!("Upload request failed: {e}");
                return UploadOutcome::Failed(e.to_string());
            }
        };
        let status = res.status();
        match res.text().await {
            Ok(body) => classify(status, &body),
            Err(e) => UploadOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    #[test]
    fn buckets() {
        assert_eq!(bucket_upload_progress(0, 0), None);
        assert_eq!(bucket_upload_progress(0, 100), Some(5));
        assert_eq!(bucket_upload_progress(40, 100), Some(5));
        assert_eq!(bucket_upload_progress(50, 100), Some(12));
        assert_eq!(bucket_upload_progress(95, 100), Some(12));
        assert_eq!(bucket_upload_progress(98, 100), Some(25));
        assert_eq!(bucket_upload_progress(100, 100), Some(25));
        assert_eq!(bucket_upload_progress(150, 100), Some(25));
    }

    #[tokio::test]
    async fn chunks_report_each_bucket_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let data = Bytes::from(vec![0u8; 100]);
        let chunks: Vec<Bytes> = progress_chunks(data, 10, move |p| sink.lock().unwrap().push(p))
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 100);
        assert_eq!(*seen.lock().unwrap(), vec![5, 12, 25]);
    }

    #[test]
    fn classification() {
        let ok = json!({ "fileId": "abc", "result": null }).to_string();
        assert_eq!(classify(StatusCode::OK, &ok), UploadOutcome::Accepted("abc".to_string()));

        let rejected = json!({ "errors": [{ "field": "file", "text": "Select an accounts file." }] });
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, &rejected.to_string()),
            UploadOutcome::Rejected(vec![FieldError {
                field: "file".to_string(),
                text: "Select an accounts file.".to_string(),
            }])
        );

        let bad_param = json!({ "status": "err", "payload": "unknown package type" });
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, &bad_param.to_string()),
            UploadOutcome::Rejected(errors) if errors[0].text == "unknown package type"
        ));

        assert!(matches!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, ""),
            UploadOutcome::Failed(_)
        ));
        assert!(matches!(classify(StatusCode::OK, "<html>"), UploadOutcome::Failed(_)));
        assert!(matches!(classify(StatusCode::BAD_GATEWAY, "{}"), UploadOutcome::Failed(_)));
    }

    #[test]
    fn submit_url_carries_parameters() {
        let transport = Transport::new(Client::new(), "http://localhost:3000/xbrl_validate/", "file");
        let url = transport
            .submit_url(&SubmitOptions {
                package_type: Some("welsh".to_string()),
                company_number: None,
            })
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/xbrl_validate/submit?packageType=welsh");
        let bare = transport.submit_url(&SubmitOptions::default()).unwrap();
        assert_eq!(bare.as_str(), "http://localhost:3000/xbrl_validate/submit");
    }

    #[test]
    fn mime_guesses() {
        assert_eq!(guess_mime("accounts.ZIP"), "application/zip");
        assert_eq!(guess_mime("accounts.xhtml"), "application/xhtml+xml");
        assert_eq!(guess_mime("accounts"), "application/octet-stream");
    }
}
