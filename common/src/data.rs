use std::fmt;

use serde::{Deserialize, Serialize};

/// Extension of archive submissions. Archives hold several documents and are
/// never rendered.
pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationStage {
    /// Accepted by the validator but no milestone reported yet.
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "UPLOADED_TO_FTS")]
    UploadedToStorage,
    #[serde(rename = "DOWNLOADED_FROM_FTS")]
    DownloadedFromStorage,
    #[serde(rename = "SENT_TO_VIRUS_SCANNER")]
    VirusScanned,
    #[serde(rename = "SENT_TO_TNDP")]
    SentToEngine,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "ERROR")]
    Error,
}

impl ValidationStage {
    pub const ALL: [ValidationStage; 8] = [
        Self::Queued,
        Self::UploadedToStorage,
        Self::DownloadedFromStorage,
        Self::VirusScanned,
        Self::SentToEngine,
        Self::Ok,
        Self::Failed,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::UploadedToStorage => "UPLOADED_TO_FTS",
            Self::DownloadedFromStorage => "DOWNLOADED_FROM_FTS",
            Self::VirusScanned => "SENT_TO_VIRUS_SCANNER",
            Self::SentToEngine => "SENT_TO_TNDP",
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
        }
    }

    /// Looks up a stage by the name the validator reports it under.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }

    pub fn percent(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::UploadedToStorage => 25,
            Self::DownloadedFromStorage => 35,
            Self::VirusScanned => 55,
            Self::SentToEngine => 75,
            Self::Ok | Self::Failed | Self::Error => 100,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Error)
    }
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The client-facing view of a submission. Serialized with a `status` tag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ValidationResult {
    Pending {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        percent: u8,
    },
    Success {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    Failure {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        percent: u8,
        reasons: Vec<String>,
    },
    Error {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        percent: u8,
    },
}

impl ValidationResult {
    pub fn pending(file_id: String, file_name: Option<String>, stage: ValidationStage) -> Self {
        Self::Pending {
            file_id,
            file_name,
            percent: stage.percent(),
        }
    }

    pub fn success(file_id: String, file_name: Option<String>, image_url: Option<String>) -> Self {
        Self::Success {
            file_id,
            file_name,
            percent: 100,
            image_url,
        }
    }

    pub fn failure(file_id: String, file_name: Option<String>, reasons: Vec<String>) -> Self {
        Self::Failure {
            file_id,
            file_name,
            percent: 100,
            reasons,
        }
    }

    pub fn error(file_id: String, file_name: Option<String>) -> Self {
        Self::Error {
            file_id,
            file_name,
            percent: 100,
        }
    }

    pub fn file_id(&self) -> &str {
        match self {
            Self::Pending { file_id, .. }
            | Self::Success { file_id, .. }
            | Self::Failure { file_id, .. }
            | Self::Error { file_id, .. } => file_id,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Pending { file_name, .. }
            | Self::Success { file_name, .. }
            | Self::Failure { file_name, .. }
            | Self::Error { file_name, .. } => file_name.as_deref(),
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            Self::Pending { percent, .. }
            | Self::Success { percent, .. }
            | Self::Failure { percent, .. }
            | Self::Error { percent, .. } => *percent,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent() >= 100
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Error { .. } => "error",
        }
    }
}

fn extension(file_name: &str) -> Option<&str> {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// A file can be rendered when it has an extension and is not an archive.
pub fn is_render_eligible(file_name: &str) -> bool {
    match extension(file_name) {
        Some(ext) => !ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION),
        None => false,
    }
}

pub fn render_url(render_base: &str, file_id: &str) -> String {
    format!("{}/{}", render_base.trim_end_matches('/'), file_id)
}
