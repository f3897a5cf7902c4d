use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::services::kv_store::StoreError;
use crate::services::secret_store::SecretError;
use crate::services::vendor_session::VendorFlowError;
use crate::services::webhook_service::DispatchError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    #[serde(rename = "AUTH_1001")]
    InvalidSharedSecret,
    #[serde(rename = "AUTH_1002")]
    TokenExpired,
    #[serde(rename = "AUTH_1003")]
    TokenInvalid,
    #[serde(rename = "AUTH_1004")]
    TokenMissing,
    #[serde(rename = "AUTH_1005")]
    NonceInvalid,

    // Authorization errors (2xxx)
    #[serde(rename = "AUTHZ_2001")]
    InsufficientPermissions,
    #[serde(rename = "AUTHZ_2002")]
    VendorRequired,

    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,
    #[serde(rename = "VAL_3002")]
    MissingRequiredField,
    #[serde(rename = "VAL_3003")]
    InvalidFormat,
    #[serde(rename = "VAL_3004")]
    InvalidPhoneNumber,
    #[serde(rename = "VAL_3005")]
    InvalidInstanceName,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    NotFound,

    // Storage errors (7xxx)
    #[serde(rename = "STO_7001")]
    StorageUnavailable,
    #[serde(rename = "STO_7002")]
    EncryptionFailed,

    // External service errors (8xxx)
    #[serde(rename = "EXT_8001")]
    N8nUnreachable,
    #[serde(rename = "EXT_8002")]
    N8nResponseError,

    // Internal errors (9xxx)
    #[serde(rename = "INT_9999")]
    InternalServerError,
    #[serde(rename = "INT_9998")]
    ConfigurationError,
}

impl ErrorCode {
    /// Get numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::InvalidSharedSecret => 1001,
            ErrorCode::TokenExpired => 1002,
            ErrorCode::TokenInvalid => 1003,
            ErrorCode::TokenMissing => 1004,
            ErrorCode::NonceInvalid => 1005,

            ErrorCode::InsufficientPermissions => 2001,
            ErrorCode::VendorRequired => 2002,

            ErrorCode::InvalidInput => 3001,
            ErrorCode::MissingRequiredField => 3002,
            ErrorCode::InvalidFormat => 3003,
            ErrorCode::InvalidPhoneNumber => 3004,
            ErrorCode::InvalidInstanceName => 3005,

            ErrorCode::NotFound => 4001,

            ErrorCode::StorageUnavailable => 7001,
            ErrorCode::EncryptionFailed => 7002,

            ErrorCode::N8nUnreachable => 8001,
            ErrorCode::N8nResponseError => 8002,

            ErrorCode::InternalServerError => 9999,
            ErrorCode::ConfigurationError => 9998,
        }
    }

    /// Get user-friendly message
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidSharedSecret => "Unauthorized access. Invalid or missing secret",
            ErrorCode::TokenExpired => "Your session has expired. Please log in again",
            ErrorCode::TokenInvalid => "Invalid authentication token",
            ErrorCode::TokenMissing => "Authentication required. Please log in",
            ErrorCode::NonceInvalid => "Nonce verification failed",

            ErrorCode::InsufficientPermissions => {
                "You don't have permission to perform this action"
            }
            ErrorCode::VendorRequired => "Only vendors are allowed to access this endpoint",

            ErrorCode::InvalidInput => "Invalid input provided",
            ErrorCode::MissingRequiredField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format provided",
            ErrorCode::InvalidPhoneNumber => "Invalid phone number format",
            ErrorCode::InvalidInstanceName => "Invalid instance name format",

            ErrorCode::NotFound => "The requested resource was not found",

            ErrorCode::StorageUnavailable => "Storage backend is currently unavailable",
            ErrorCode::EncryptionFailed => "Failed to protect secret value",

            ErrorCode::N8nUnreachable => "The n8n automation endpoint could not be reached",
            ErrorCode::N8nResponseError => "Error processing the event in n8n",

            ErrorCode::InternalServerError => "An internal server error occurred",
            ErrorCode::ConfigurationError => "Server configuration error",
        }
    }
}

/// Structured error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub code_number: u16,
    pub message: String,
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("{1}")]
    WithCode(ErrorCode, String),

    #[error("{1}")]
    WithCodeAndDetails(ErrorCode, String, String),

    #[error("Validation failed: {field}")]
    ValidationWithField {
        code: ErrorCode,
        field: String,
        message: String,
    },
}

impl ApiError {
    /// Create error with specific error code
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::WithCode(code, message.into())
    }

    /// Create error with code and additional details
    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        ApiError::WithCodeAndDetails(code, message.into(), details.into())
    }

    /// Create validation error for specific field
    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::ValidationWithField {
            code: ErrorCode::InvalidInput,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Helper: malformed phone number
    pub fn invalid_phone(field: &str) -> Self {
        ApiError::ValidationWithField {
            code: ErrorCode::InvalidPhoneNumber,
            field: field.to_string(),
            message: ErrorCode::InvalidPhoneNumber.message().to_string(),
        }
    }

    /// Helper: Resource not found
    pub fn not_found(resource: &str) -> Self {
        ApiError::with_code(ErrorCode::NotFound, format!("{} not found", resource))
    }

    /// Get error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthorized(_) => ErrorCode::TokenMissing,
            ApiError::Forbidden(_) => ErrorCode::InsufficientPermissions,
            ApiError::BadRequest(_) => ErrorCode::InvalidInput,
            ApiError::Validation(_) => ErrorCode::InvalidInput,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Configuration(_) => ErrorCode::ConfigurationError,
            ApiError::ExternalService(_) => ErrorCode::N8nResponseError,
            ApiError::Storage(_) => ErrorCode::StorageUnavailable,
            ApiError::Secret(_) => ErrorCode::EncryptionFailed,
            ApiError::Internal(_) => ErrorCode::InternalServerError,
            ApiError::WithCode(code, _) => *code,
            ApiError::WithCodeAndDetails(code, _, _) => *code,
            ApiError::ValidationWithField { code, .. } => *code,
        }
    }

    fn error_details(&self) -> Option<String> {
        match self {
            ApiError::WithCodeAndDetails(_, _, details) => Some(details.clone()),
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Validation(msg)
            | ApiError::NotFound(msg)
            | ApiError::ExternalService(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    fn error_field(&self) -> Option<String> {
        match self {
            ApiError::ValidationWithField { field, .. } => Some(field.clone()),
            _ => None,
        }
    }

    /// Get status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_)
            | ApiError::WithCode(ErrorCode::InvalidSharedSecret, _)
            | ApiError::WithCode(ErrorCode::TokenExpired, _)
            | ApiError::WithCode(ErrorCode::TokenInvalid, _)
            | ApiError::WithCode(ErrorCode::TokenMissing, _)
            | ApiError::WithCode(ErrorCode::VendorRequired, _) => StatusCode::UNAUTHORIZED,

            ApiError::Forbidden(_)
            | ApiError::WithCode(ErrorCode::NonceInvalid, _)
            | ApiError::WithCode(ErrorCode::InsufficientPermissions, _) => StatusCode::FORBIDDEN,

            ApiError::BadRequest(_)
            | ApiError::Validation(_)
            | ApiError::ValidationWithField { .. }
            | ApiError::WithCode(ErrorCode::InvalidInput, _)
            | ApiError::WithCode(ErrorCode::InvalidFormat, _)
            | ApiError::WithCode(ErrorCode::MissingRequiredField, _)
            | ApiError::WithCode(ErrorCode::InvalidPhoneNumber, _)
            | ApiError::WithCode(ErrorCode::InvalidInstanceName, _)
            | ApiError::WithCodeAndDetails(ErrorCode::InvalidInput, _, _) => {
                StatusCode::BAD_REQUEST
            }

            ApiError::NotFound(_) | ApiError::WithCode(ErrorCode::NotFound, _) => {
                StatusCode::NOT_FOUND
            }

            ApiError::ExternalService(_)
            | ApiError::WithCode(ErrorCode::N8nUnreachable, _)
            | ApiError::WithCode(ErrorCode::N8nResponseError, _)
            | ApiError::WithCodeAndDetails(ErrorCode::N8nUnreachable, _, _)
            | ApiError::WithCodeAndDetails(ErrorCode::N8nResponseError, _, _) => {
                StatusCode::BAD_GATEWAY
            }

            ApiError::Storage(_)
            | ApiError::Secret(_)
            | ApiError::Configuration(_)
            | ApiError::Internal(_)
            | ApiError::WithCode(_, _)
            | ApiError::WithCodeAndDetails(_, _, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log error with appropriate level
    fn log_error(&self, request_id: &str) {
        match self.status_code() {
            status if status.is_server_error() => {
                error!(
                    request_id = %request_id,
                    error = %self,
                    "Server error occurred"
                );
            }
            status if status.is_client_error() => {
                warn!(
                    request_id = %request_id,
                    error = %self,
                    "Client error occurred"
                );
            }
            _ => {}
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Config(msg) => ApiError::Configuration(msg),
            DispatchError::Transport(msg) => ApiError::with_details(
                ErrorCode::N8nUnreachable,
                ErrorCode::N8nUnreachable.message(),
                msg,
            ),
            DispatchError::Response { status, body } => ApiError::with_details(
                ErrorCode::N8nResponseError,
                format!("n8n returned HTTP {}", status),
                body,
            ),
        }
    }
}

impl From<VendorFlowError> for ApiError {
    fn from(err: VendorFlowError) -> Self {
        match err {
            VendorFlowError::InvalidPhone(_) => ApiError::invalid_phone("phone"),
            VendorFlowError::EmptyField(field) => ApiError::ValidationWithField {
                code: ErrorCode::MissingRequiredField,
                field: field.to_string(),
                message: format!("{} cannot be empty", field),
            },
            VendorFlowError::Dispatch(e) => e.into(),
            VendorFlowError::Store(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let code = self.error_code();

        self.log_error(&request_id);

        let error_response = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code,
                code_number: code.code(),
                message: match &self {
                    ApiError::WithCode(_, msg) | ApiError::WithCodeAndDetails(_, msg, _) => {
                        msg.clone()
                    }
                    ApiError::ValidationWithField { message, .. } => message.clone(),
                    _ => code.message().to_string(),
                },
                details: self.error_details(),
                field: self.error_field(),
            },
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Handle Axum JSON rejections and convert to structured API errors
pub fn handle_rejection(err: JsonRejection) -> ApiError {
    match err {
        JsonRejection::JsonDataError(e) => ApiError::with_details(
            ErrorCode::InvalidInput,
            "Invalid input provided",
            e.body_text(),
        ),
        JsonRejection::JsonSyntaxError(_) => {
            ApiError::with_code(ErrorCode::InvalidFormat, "Invalid JSON format")
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::with_code(ErrorCode::InvalidFormat, "JSON content type required")
        }
        _ => ApiError::with_details(
            ErrorCode::InvalidInput,
            "Invalid input provided",
            err.body_text(),
        ),
    }
}
