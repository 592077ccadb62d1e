use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::mapper::ValidatorEnvelope;
use log::debug;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::params::{CompanyNumber, PackageType};

pub const PDF_MIME_TYPE: &str = "application/pdf";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("file storage did not return a file id")]
    MissingFileId,
    #[error("expected {} from the renderer, got {0:?}", PDF_MIME_TYPE)]
    UnexpectedContentType(Option<String>),
}

impl BackendError {
    /// HTTP status the backend answered with, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub body: Bytes,
}

impl FileUpload {
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub file_name: String,
    #[serde(rename = "id")]
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_number: Option<CompanyNumber>,
}

#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub file_name: String,
    pub mime_type: String,
    pub body: Bytes,
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Stores the file and returns its identifier.
    async fn upload(&self, file: &FileUpload) -> Result<String, BackendError>;
}

#[async_trait]
pub trait ValidatorApi: Send + Sync {
    async fn submit(&self, request: &ValidationRequest) -> Result<ValidatorEnvelope, BackendError>;
    async fn check(&self, file_id: &str) -> Result<ValidatorEnvelope, BackendError>;
}

#[async_trait]
pub trait RenderApi: Send + Sync {
    async fn render(&self, file_id: &str) -> Result<RenderedFile, BackendError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoragePayload<'a> {
    data: String,
    file_name: &'a str,
    mime_type: &'a str,
    size: usize,
    extension: &'a str,
}

#[derive(Deserialize)]
struct StorageResponse {
    id: Option<String>,
}

/// One client for all three APIs, which share a base URL and key.
#[derive(Clone)]
pub struct HttpBackends {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBackends {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent(concat!("bullseye-server/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request, turning non-2xx answers into errors.
    async fn send(&self, url: &str, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let res = request
            .header(header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(res)
    }

    async fn process_response<Resp: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Resp, BackendError> {
        let res = self.send(url, request).await?;
        let body = res.bytes().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| BackendError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl FileStorage for HttpBackends {
    async fn upload(&self, file: &FileUpload) -> Result<String, BackendError> {
        let url = self.url("/file-transfer/files");
        let payload = StoragePayload {
            data: STANDARD.encode(&file.body),
            file_name: &file.file_name,
            mime_type: &file.mime_type,
            size: file.body.len(),
            extension: file.extension(),
        };
        debug!("Uploading {} ({} bytes) to file storage", file.file_name, file.body.len());
        let response: StorageResponse = self
            .process_response(&url, self.client.post(&url).json(&payload))
            .await?;
        response
            .id
            .filter(|id| !id.is_empty())
            .ok_or(BackendError::MissingFileId)
    }
}

#[async_trait]
impl ValidatorApi for HttpBackends {
    async fn submit(&self, request: &ValidationRequest) -> Result<ValidatorEnvelope, BackendError> {
        let url = self.url("/account-validator/validate");
        self.process_response(&url, self.client.post(&url).json(request))
            .await
    }

    async fn check(&self, file_id: &str) -> Result<ValidatorEnvelope, BackendError> {
        let url = self.url(&format!("/account-validator/validate/check/{file_id}"));
        self.process_response(&url, self.client.get(&url)).await
    }
}

#[async_trait]
impl RenderApi for HttpBackends {
    async fn render(&self, file_id: &str) -> Result<RenderedFile, BackendError> {
        let url = self.url(&format!("/account-validator/validate/render/{file_id}"));
        let res = self.send(&url, self.client.get(&url)).await?;
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if content_type.as_deref() != Some(PDF_MIME_TYPE) {
            return Err(BackendError::UnexpectedContentType(content_type));
        }
        let body = res.bytes().await.map_err(|source| BackendError::Transport {
            url: url.clone(),
            source,
        })?;
        Ok(RenderedFile {
            file_name: format!("{file_id}.pdf"),
            mime_type: PDF_MIME_TYPE.to_string(),
            body,
        })
    }
}
