//! Typed error handling for the HTTP surface
//!
//! Every failure a client can observe is an [`ApiError`]. Each variant carries a
//! stable `errno` (for programmatic handling) and an HTTP status code, and is
//! rendered as:
//!
//! ```json
//! { "success": false, "errno": 41, "error": "Attribute not found: email" }
//! ```
//!
//! Internal failures additionally carry an `error_id` which is logged together
//! with the underlying cause so operators can correlate reports.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelrest::prelude::*;
//!
//! fn check(limit: &str) -> ApiResult<usize> {
//!     limit
//!         .parse()
//!         .map_err(|_| ApiError::param_wrong("`limit` must be a number > 0"))
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Result alias used by handlers, planners and renderers
pub type ApiResult<T> = Result<T, ApiError>;

const INTERNAL_MESSAGE: &str = "Sorry, We're experience some technical issues and can't process \
     your request right now. Please try again later.";

/// The error type returned by every API operation
#[derive(Debug)]
pub enum ApiError {
    /// Unexpected failure (storage, hashing, token signing...)
    Internal { error_id: Uuid, cause: String },

    /// Malformed request (undecodable URL or query string)
    BadRequest(String),

    /// Request body is not valid JSON or not a JSON object
    InvalidJson(String),

    /// Required attributes are missing on create
    MissingParameters(String),

    /// Filter expression can't be applied
    FilterInvalid(Option<String>),

    /// Anonymous caller hit a protected operation
    Unauthorized,

    /// Authenticated caller lacks permission
    Forbidden,

    /// Login rejected by the authenticator
    WrongLogin,

    /// Bearer token is malformed, expired or revoked
    InvalidAuthToken,

    /// Route or resource does not exist
    ResourceNotFound(String),

    /// Record does not exist (or the path is outside the API prefix)
    ModelNotFound(String),

    /// Model accepts no writes
    ModelReadOnly { model: String },

    /// Attribute is not defined (or not visible) on the model
    AttributeNotFound { attribute: Option<String> },

    /// Attribute can't be written in this operation
    AttributeReadOnly { attribute: Option<String> },

    /// Attribute value or usage is wrong
    AttributeWrong {
        attribute: Option<String>,
        message: Option<String>,
    },

    /// Query parameter has a wrong value
    ParamWrong { param: Option<String> },
}

impl ApiError {
    /// Wrap an unexpected failure, assigning it a fresh error id
    pub fn internal(cause: impl fmt::Display) -> Self {
        ApiError::Internal {
            error_id: Uuid::new_v4(),
            cause: cause.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json() -> Self {
        ApiError::InvalidJson("Invalid json data".to_string())
    }

    pub fn not_an_object() -> Self {
        ApiError::InvalidJson("JSON data is not an object".to_string())
    }

    pub fn filter_invalid(message: impl Into<String>) -> Self {
        ApiError::FilterInvalid(Some(message.into()))
    }

    pub fn resource_not_found() -> Self {
        ApiError::ResourceNotFound("Resource not found".to_string())
    }

    pub fn model_not_found() -> Self {
        ApiError::ModelNotFound("Model not found".to_string())
    }

    pub fn attribute_not_found(attribute: impl Into<String>) -> Self {
        ApiError::AttributeNotFound {
            attribute: Some(attribute.into()),
        }
    }

    pub fn attribute_read_only(attribute: impl Into<String>) -> Self {
        ApiError::AttributeReadOnly {
            attribute: Some(attribute.into()),
        }
    }

    pub fn attribute_wrong(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::AttributeWrong {
            attribute: Some(attribute.into()),
            message: Some(message.into()),
        }
    }

    pub fn param_wrong(param: impl Into<String>) -> Self {
        ApiError::ParamWrong {
            param: Some(param.into()),
        }
    }

    /// Numeric error identifier exposed as `errno`
    pub fn errno(&self) -> u16 {
        match self {
            ApiError::Internal { .. } => 500,
            ApiError::BadRequest(_) => 11,
            ApiError::InvalidJson(_) => 12,
            ApiError::MissingParameters(_) => 13,
            ApiError::FilterInvalid(_) => 14,
            ApiError::Unauthorized | ApiError::Forbidden => 21,
            ApiError::WrongLogin => 22,
            ApiError::InvalidAuthToken => 23,
            ApiError::ResourceNotFound(_) => 31,
            ApiError::ModelNotFound(_) => 32,
            ApiError::ModelReadOnly { .. } => 33,
            ApiError::AttributeNotFound { .. } => 41,
            ApiError::AttributeReadOnly { .. } | ApiError::AttributeWrong { .. } => 42,
            ApiError::ParamWrong { .. } => 51,
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized | ApiError::WrongLogin | ApiError::InvalidAuthToken => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::ResourceNotFound(_)
            | ApiError::ModelNotFound(_)
            | ApiError::AttributeNotFound { .. }
            | ApiError::AttributeReadOnly { .. } => StatusCode::NOT_FOUND,
            ApiError::ModelReadOnly { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_)
            | ApiError::InvalidJson(_)
            | ApiError::MissingParameters(_)
            | ApiError::FilterInvalid(_)
            | ApiError::AttributeWrong { .. }
            | ApiError::ParamWrong { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Convert to the JSON error body
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            errno: self.errno(),
            error: self.to_string(),
            error_id: match self {
                ApiError::Internal { error_id, .. } => Some(error_id.to_string()),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal { .. } => write!(f, "{}", INTERNAL_MESSAGE),
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::MissingParameters(msg)
            | ApiError::ResourceNotFound(msg)
            | ApiError::ModelNotFound(msg) => write!(f, "{}", msg),
            ApiError::FilterInvalid(None) => write!(f, "Invalid filter"),
            ApiError::FilterInvalid(Some(msg)) => write!(f, "Invalid filter: {}", msg),
            ApiError::Unauthorized | ApiError::Forbidden => write!(f, "User unauthorized"),
            ApiError::WrongLogin => write!(f, "Wrong login and/or password"),
            ApiError::InvalidAuthToken => write!(f, "Invalid authentication token"),
            ApiError::ModelReadOnly { model } => write!(f, "{} is read-only", model),
            ApiError::AttributeNotFound { attribute } => {
                write!(f, "Attribute not found")?;
                if let Some(attribute) = attribute {
                    write!(f, ": {}", attribute)?;
                }
                Ok(())
            }
            ApiError::AttributeReadOnly { attribute } => {
                write!(f, "Attribute read only")?;
                if let Some(attribute) = attribute {
                    write!(f, ": {}", attribute)?;
                }
                Ok(())
            }
            ApiError::AttributeWrong { attribute, message } => {
                write!(f, "Wrong attribute")?;
                if let Some(attribute) = attribute {
                    write!(f, ": {}", attribute)?;
                }
                if let Some(message) = message {
                    write!(f, " - {}", message)?;
                }
                Ok(())
            }
            ApiError::ParamWrong { param } => {
                write!(f, "Wrong query parameter")?;
                if let Some(param) = param {
                    write!(f, ": {}", param)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Hooks and stores may bubble typed API errors through anyhow
        match err.downcast::<ApiError>() {
            Ok(api_error) => api_error,
            Err(err) => ApiError::internal(format!("{:#}", err)),
        }
    }
}

/// JSON body sent for every error
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub errno: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal { error_id, cause } = &self {
            tracing::error!(error_id = %error_id, cause = %cause, "internal server error");
        }
        let status = self.status_code();
        (status, Json(self.to_response())).into_response()
    }
}
