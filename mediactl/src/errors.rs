use crate::probe::ImageReadError;
use crate::storage::StorageError;
use crate::validation::FieldErrors;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// One or more form fields failed validation
    #[error("The given data was invalid.")]
    Validation { errors: FieldErrors },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Request body exceeds the configured upload limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Disk existence check, write or read failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An image could not be decoded or transformed
    #[error(transparent)]
    ImageRead(#[from] ImageReadError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::AlreadyExists { .. } => StatusCode::CONFLICT,
                StorageError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
                StorageError::Io(_) | StorageError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::ImageRead(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { .. } => "The given data was invalid.".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::PayloadTooLarge { message } => message.clone(),
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound { key } => format!("File {key} not found"),
                StorageError::AlreadyExists { key } => format!("File {key} already exists"),
                StorageError::InvalidKey { key } => format!("Invalid file key: {key}"),
                StorageError::Io(_) | StorageError::Other(_) => "Storage error occurred".to_string(),
            },
            Error::ImageRead(_) => "The uploaded image could not be read".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Storage(StorageError::Io(_) | StorageError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Storage(_) => {
                tracing::warn!("Storage error: {}", self);
            }
            Error::ImageRead(_) => {
                tracing::warn!("Image read error: {}", self);
            }
            Error::Validation { .. } | Error::BadRequest { .. } | Error::NotFound { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match &self {
            // Field errors go back as structured JSON so the form can show them per field
            Error::Validation { errors } => {
                let body = serde_json::json!({
                    "message": self.user_message(),
                    "errors": errors,
                });
                (status, axum::response::Json(body)).into_response()
            }
            _ => {
                let user_message = self.user_message();
                (status, user_message).into_response()
            }
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::fields;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::Validation { errors: FieldErrors::new() }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::from(StorageError::AlreadyExists { key: "a".to_string() }).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::from(StorageError::NotFound { key: "a".to_string() }).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::from(StorageError::Io(std::io::Error::other("disk full"))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = Error::from(StorageError::Io(std::io::Error::other("/var/lib/secret/path")));
        assert!(!err.user_message().contains("/var/lib"));

        let err = Error::Other(anyhow::anyhow!("connection string postgres://user:pw@db"));
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[tokio::test]
    async fn test_validation_response_body() {
        let mut errors = FieldErrors::new();
        errors.add(fields::LINK_TEXT, "The link text field is required.");

        let response = Error::Validation { errors }.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "The given data was invalid.");
        assert_eq!(json["errors"]["link_text"][0], "The link text field is required.");
    }
}
