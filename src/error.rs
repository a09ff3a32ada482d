//! Unified application error model and mapping to HTTP status codes.
//!
//! Mirrors the `AppError` shape clarium used across its HTTP/WS/pgwire frontends:
//! a tagged enum carrying a machine-readable `code` and a human `message`, with
//! a single place (`http_status`) translating kinds to wire-level status codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Error kinds from §7 of the specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Expression failed to parse (goal algebra grammar).
    ParseError { code: String, message: String },
    /// Request schema or date-range validation failed.
    ValidationError { code: String, message: String },
    /// A single check threw during evaluation; the check is omitted, evaluation continues.
    CheckError { code: String, message: String },
    /// Unexpected failure while computing metric statistics.
    EvaluationError { code: String, message: String },
    /// The data collaborator failed to produce aggregated goal rows.
    UpstreamError { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::ParseError { code, .. }
            | AppError::ValidationError { code, .. }
            | AppError::CheckError { code, .. }
            | AppError::EvaluationError { code, .. }
            | AppError::UpstreamError { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::ParseError { message, .. }
            | AppError::ValidationError { message, .. }
            | AppError::CheckError { message, .. }
            | AppError::EvaluationError { message, .. }
            | AppError::UpstreamError { message, .. } => message.as_str(),
        }
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        AppError::ParseError { code: "parse_error".into(), message: msg.into() }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        AppError::ValidationError { code: "validation_error".into(), message: msg.into() }
    }

    pub fn check<S: Into<String>>(msg: S) -> Self {
        AppError::CheckError { code: "check_error".into(), message: msg.into() }
    }

    pub fn evaluation<S: Into<String>>(msg: S) -> Self {
        AppError::EvaluationError { code: "evaluation_error".into(), message: msg.into() }
    }

    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        AppError::UpstreamError { code: "upstream_error".into(), message: msg.into() }
    }

    /// Map to HTTP status code (§6, §7).
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::ParseError { .. } => 422,
            AppError::ValidationError { .. } => 422,
            AppError::CheckError { .. } => 422,
            AppError::EvaluationError { .. } => 500,
            AppError::UpstreamError { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::parse("bad expr").http_status(), 422);
        assert_eq!(AppError::validation("bad date").http_status(), 422);
        assert_eq!(AppError::check("srm blew up").http_status(), 422);
        assert_eq!(AppError::evaluation("nan propagation bug").http_status(), 500);
        assert_eq!(AppError::upstream("dao timed out").http_status(), 500);
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = AppError::parse("unexpected token");
        assert_eq!(format!("{e}"), "parse_error: unexpected token");
    }
}
