use std::fmt;

use shared::{domain::RideState, error::ApiException};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideAction {
    Request,
    MatchFound,
    DriverArrived,
    RideCompleted,
    Cancel,
    Reset,
    RateDriver,
}

impl RideAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::MatchFound => "matchFound",
            Self::DriverArrived => "driverArrived",
            Self::RideCompleted => "rideCompleted",
            Self::Cancel => "cancel",
            Self::Reset => "reset",
            Self::RateDriver => "rateDriver",
        }
    }
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RideError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("cannot {action} while ride is {from}")]
    InvalidTransition { action: RideAction, from: RideState },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("persisted ride is stale ({age_minutes} minutes old)")]
    StaleState { age_minutes: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    Network,
    StaleState,
}

impl RideError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Network { .. } => ErrorKind::Network,
            Self::StaleState { .. } => ErrorKind::StaleState,
        }
    }

    /// The `(kind, message)` pair handed to presenters.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for RideError {
    fn from(value: reqwest::Error) -> Self {
        let message = if value.is_timeout() {
            format!("request timed out: {value}")
        } else if value.is_connect() {
            format!("failed to connect: {value}")
        } else {
            value.to_string()
        };
        Self::Network { message }
    }
}

impl From<ApiException> for RideError {
    fn from(value: ApiException) -> Self {
        Self::Network {
            message: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
