use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use common::{
    data::ValidationResult,
    mapper::{map_envelope, MappingError},
};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::{
    backends::{BackendError, FileStorage, FileUpload, ValidationRequest, ValidatorApi},
    params::SubmitParams,
    retry::RetryPolicy,
};

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("file storage rejected {file_name}: {source}")]
    Storage {
        file_name: String,
        #[source]
        source: BackendError,
    },
    #[error("validator call for file {file_id} failed: {source}")]
    Validator {
        file_id: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("validation of file {0} did not finish in time")]
    TimedOut(String),
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    fn into_upload(self) -> FileUpload {
        FileUpload {
            file_name: self.name,
            mime_type: self
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            body: self.bytes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Return an error instead of the last pending state on timeout.
    pub err_on_timeout: bool,
}

pub struct Submitter {
    storage: Arc<dyn FileStorage>,
    validator: Arc<dyn ValidatorApi>,
    retry: RetryPolicy,
    render_base: String,
}

impl Submitter {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        validator: Arc<dyn ValidatorApi>,
        retry: RetryPolicy,
        render_base: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            validator,
            retry,
            render_base: render_base.into(),
        }
    }

    /// Stores the file, then asks for it to be validated. Storage must succeed
    /// before the validator is contacted.
    pub async fn submit(
        &self,
        file: UploadedFile,
        params: &SubmitParams,
    ) -> Result<ValidationResult, SubmitError> {
        let upload = file.into_upload();
        let file_id = self
            .retry
            .run("file storage upload", || self.storage.upload(&upload))
            .await
            .map_err(|source| SubmitError::Storage {
                file_name: upload.file_name.clone(),
                source,
            })?;
        info!("Stored {} as file [{file_id}]", upload.file_name);

        let request = ValidationRequest {
            file_name: upload.file_name.clone(),
            file_id: file_id.clone(),
            package_type: params.package_type,
            company_number: params.company_number.clone(),
        };
        let mut envelope = self
            .retry
            .run("validation submit", || self.validator.submit(&request))
            .await
            .map_err(|source| SubmitError::Validator {
                file_id: file_id.clone(),
                source,
            })?;
        debug!("Validator accepted file [{file_id}]");
        if envelope.file_name.is_none() {
            envelope.file_name = Some(upload.file_name);
        }
        Ok(map_envelope(&envelope, &self.render_base)?)
    }

    pub async fn check(&self, file_id: &str) -> Result<ValidationResult, SubmitError> {
        let envelope = self
            .retry
            .run("validation status check", || self.validator.check(file_id))
            .await
            .map_err(|source| SubmitError::Validator {
                file_id: file_id.to_string(),
                source,
            })?;
        Ok(map_envelope(&envelope, &self.render_base)?)
    }

    /// Submits and then polls until the validator reaches a final state.
    pub async fn submit_and_wait(
        &self,
        file: UploadedFile,
        params: &SubmitParams,
        wait: WaitOptions,
    ) -> Result<ValidationResult, SubmitError> {
        let deadline = Instant::now() + wait.timeout;
        let mut result = self.submit(file, params).await?;
        while matches!(result, ValidationResult::Pending { .. }) {
            if Instant::now() + wait.poll_interval > deadline {
                warn!("Gave up waiting for file [{}]", result.file_id());
                if wait.err_on_timeout {
                    return Err(SubmitError::TimedOut(result.file_id().to_string()));
                }
                return Ok(result);
            }
            sleep(wait.poll_interval).await;
            result = self.check(result.file_id()).await?;
        }
        Ok(result)
    }
}
