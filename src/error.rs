use std::collections::BTreeMap;

use poem::{IntoResponse, Response, error::ResponseError, http::StatusCode, web::Json};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use validator::ValidationErrors;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Field name to the messages shown next to it on the form.
pub type FormErrors = BTreeMap<String, Vec<String>>;

/// Form error key for problems not tied to one field, such as an unreadable body.
pub const NON_FIELD_ERRORS: &str = "__all__";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid form data")]
    Validation(FormErrors),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-field validation error.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FormErrors::new();
        errors.insert(field.to_owned(), vec![message.into()]);
        AppError::Validation(errors)
    }

    /// Unique index hits become a form error on `field`; anything else stays a database error.
    pub fn from_write(err: DbErr, field: &str, message: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => AppError::invalid(field, message),
            _ => AppError::Database(err),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = FormErrors::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        AppError::Validation(fields)
    }
}

#[derive(Serialize)]
struct ErrorPage<'a> {
    status: u16,
    page: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FormErrors>,
}

/// Body of the dedicated not-found page, shared by unknown routes and missing rows.
pub fn not_found_page(message: impl Into<String>) -> Response {
    Json(ErrorPage {
        status: StatusCode::NOT_FOUND.as_u16(),
        page: "not_found",
        message: message.into(),
        errors: None,
    })
    .with_status(StatusCode::NOT_FOUND)
    .into_response()
}

impl ResponseError for AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn as_response(&self) -> Response {
        match self {
            AppError::NotFound(_) => not_found_page(self.to_string()),
            AppError::Validation(errors) => Json(ErrorPage {
                status: self.status().as_u16(),
                page: "form",
                message: self.to_string(),
                errors: Some(errors),
            })
            .with_status(self.status())
            .into_response(),
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                Json(ErrorPage {
                    status: self.status().as_u16(),
                    page: "server_error",
                    message: "internal server error".to_owned(),
                    errors: None,
                })
                .with_status(self.status())
                .into_response()
            }
            AppError::Unauthorized => Json(ErrorPage {
                status: self.status().as_u16(),
                page: "login",
                message: self.to_string(),
                errors: None,
            })
            .with_status(self.status())
            .into_response(),
        }
    }
}
