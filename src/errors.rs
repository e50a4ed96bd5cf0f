use crate::models::{ContractStatus, LifecycleEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One field-level violation found by the contract validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ValidationIssue {
    Required { field: String },
    InvalidEnum { field: String, value: String },
    DuplicateColumn { column: String },
    InvalidVersion { value: String },
}

impl ValidationIssue {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    /// Field the violation is attached to, for form highlighting.
    pub fn field(&self) -> &str {
        match self {
            Self::Required { field } | Self::InvalidEnum { field, .. } => field.as_str(),
            Self::DuplicateColumn { .. } => "selectedColumns",
            Self::InvalidVersion { .. } => "version",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required { field } => write!(f, "{} is required", field),
            Self::InvalidEnum { field, value } => write!(f, "{} has invalid value '{}'", field, value),
            Self::DuplicateColumn { column } => write!(f, "column '{}' is selected more than once", column),
            Self::InvalidVersion { value } => write!(f, "version '{}' is not of the form <major>.<minor>", value),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
    #[error("VALIDATION: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("ILLEGAL_TRANSITION: cannot {event} a contract in state {current}")]
    IllegalTransition {
        current: ContractStatus,
        event: LifecycleEvent,
    },
    #[error("PERMISSION_DENIED: {actor} may not {event} this contract: {reason}")]
    Permission {
        actor: String,
        event: LifecycleEvent,
        reason: String,
    },
    #[error("CONTRACT_LOCKED: contract {id} is {status} and can only be edited in draft")]
    ContractLocked { id: String, status: ContractStatus },
    #[error("CONFLICT: contract {id} changed concurrently (expected revision {expected}, found {actual})")]
    Conflict { id: String, expected: u64, actual: u64 },
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable code matching the prefix of the rendered message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Validation(_) => "VALIDATION",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::Permission { .. } => "PERMISSION_DENIED",
            Self::ContractLocked { .. } => "CONTRACT_LOCKED",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation(issues) => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
