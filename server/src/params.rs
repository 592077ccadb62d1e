use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

static COMPANY_NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Z]{2}|\d{2})\d{6}$").expect("valid company number pattern")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("unknown package type {0:?}")]
    UnknownPackageType(String),
    #[error("{0:?} is not a valid company number")]
    InvalidCompanyNumber(String),
    #[error("query package type {query:?} does not match session package type {session:?}")]
    PackageTypeMismatch {
        query: String,
        session: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PackageType {
    Uksef,
    Welsh,
    LimitedPartnership,
    GroupPackage400,
    GroupPackage401,
    Overseas,
    Cic,
    AuditExemptSubsidiary,
    FilingExemptSubsidiary,
}

impl PackageType {
    pub const ALL: [PackageType; 9] = [
        Self::Uksef,
        Self::Welsh,
        Self::LimitedPartnership,
        Self::GroupPackage400,
        Self::GroupPackage401,
        Self::Overseas,
        Self::Cic,
        Self::AuditExemptSubsidiary,
        Self::FilingExemptSubsidiary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uksef => "uksef",
            Self::Welsh => "welsh",
            Self::LimitedPartnership => "limited-partnership",
            Self::GroupPackage400 => "group-package-400",
            Self::GroupPackage401 => "group-package-401",
            Self::Overseas => "overseas",
            Self::Cic => "cic",
            Self::AuditExemptSubsidiary => "audit-exempt-subsidiary",
            Self::FilingExemptSubsidiary => "filing-exempt-subsidiary",
        }
    }
}

impl FromStr for PackageType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| ParamError::UnknownPackageType(s.to_string()))
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PackageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompanyNumber(String);

impl CompanyNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CompanyNumber {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        if COMPANY_NUMBER_PATTERN.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(ParamError::InvalidCompanyNumber(s.to_string()))
        }
    }
}

/// Package type an upstream session layer attached to the request, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPackageType(pub String);

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuery {
    pub package_type: Option<String>,
    pub company_number: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    pub package_type: Option<PackageType>,
    pub company_number: Option<CompanyNumber>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SubmitParams {
    pub fn from_query(
        query: &SubmitQuery,
        session: Option<&SessionPackageType>,
    ) -> Result<Self, ParamError> {
        let package_type: Option<PackageType> = match present(&query.package_type) {
            Some(raw) => {
                let matches_session = session
                    .map(|s| s.0.trim().eq_ignore_ascii_case(raw))
                    .unwrap_or(true);
                if !matches_session {
                    return Err(ParamError::PackageTypeMismatch {
                        query: raw.to_string(),
                        session: session.map(|s| s.0.clone()),
                    });
                }
                Some(raw.parse()?)
            }
            None => None,
        };
        let company_number = present(&query.company_number)
            .map(str::parse::<CompanyNumber>)
            .transpose()?;
        Ok(Self {
            package_type,
            company_number,
        })
    }
}
