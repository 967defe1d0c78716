use std::path::PathBuf;

use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use thiserror::Error;

/// Startup configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal errors raised while loading a model artifact.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read model artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("model artifact '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("model artifact '{name}' does not match the {contract} contract: {reason}")]
    Schema {
        name: String,
        contract: &'static str,
        reason: String,
    },
    #[error("cannot load ONNX graph '{path}': {reason}")]
    Onnx { path: PathBuf, reason: String },
}

/// Per-request inference failures. Never shown verbatim to clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("model produced a non-finite output")]
    NonFinite,
    #[error("model produced no output")]
    EmptyOutput,
    #[error("model produced label {0} which is not a known class")]
    UnknownLabel(i64),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ValidationReason {
    Missing,
    WrongType { expected: &'static str },
    OutOfRange {
        value: f64,
        min: f64,
        max: f64,
        min_exclusive: bool,
    },
    UnknownCategory { value: String, allowed: Vec<String> },
}

/// A client input error tied to a single request field.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{field}: {}", describe(.reason))]
pub struct ValidationError {
    pub field: String,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: ValidationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ValidationReason::Missing)
    }

    /// Prefixes the field path, e.g. `rainfall_mm` becomes `[3].rainfall_mm`.
    pub fn at_index(mut self, index: usize) -> Self {
        self.field = format!("[{index}].{}", self.field);
        self
    }
}

fn describe(reason: &ValidationReason) -> String {
    match reason {
        ValidationReason::Missing => "field is required".to_string(),
        ValidationReason::WrongType { expected } => format!("expected a {expected}"),
        ValidationReason::OutOfRange {
            value,
            min,
            max,
            min_exclusive,
        } => {
            let open = if *min_exclusive { '(' } else { '[' };
            format!("value {value} is outside the allowed range {open}{min}, {max}]")
        }
        ValidationReason::UnknownCategory { value, allowed } => {
            format!("unknown category '{value}', expected one of: {}", allowed.join(", "))
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("batch is empty")]
    EmptyBatch,
    #[error("batch of {size} items exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("blocking pool unavailable")]
    Blocking,
    #[error("endpoint not found")]
    NotFound,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
    #[serde(flatten)]
    reason: Option<&'a ValidationReason>,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_failed",
            ApiError::InvalidPayload(_) => "invalid_payload",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::EmptyBatch | ApiError::BatchTooLarge { .. } => "invalid_batch",
            ApiError::Inference(_) | ApiError::Blocking => "inference_failed",
            ApiError::NotFound => "not_found",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::InvalidPayload(_)
            | ApiError::EmptyBatch
            | ApiError::BatchTooLarge { .. } => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Inference(_) | ApiError::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Validation(e) => ErrorBody {
                error: self.code(),
                message: e.to_string(),
                field: Some(e.field.as_str()),
                reason: Some(&e.reason),
            },
            ApiError::Inference(_) | ApiError::Blocking => {
                error!("Prediction failed: {}", self);
                ErrorBody {
                    error: self.code(),
                    message: "prediction could not be computed".to_string(),
                    field: None,
                    reason: None,
                }
            }
            _ => ErrorBody {
                error: self.code(),
                message: self.to_string(),
                field: None,
                reason: None,
            },
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<JsonPayloadError> for ApiError {
    fn from(err: JsonPayloadError) -> Self {
        match err {
            JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                ApiError::PayloadTooLarge
            }
            JsonPayloadError::ContentType => {
                ApiError::InvalidPayload("expected Content-Type: application/json".to_string())
            }
            JsonPayloadError::Deserialize(e) => ApiError::InvalidPayload(e.to_string()),
            other => ApiError::InvalidPayload(other.to_string()),
        }
    }
}
