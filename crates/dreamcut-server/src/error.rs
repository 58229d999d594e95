use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use validator::{ValidationErrors, ValidationErrorsKind};

use dreamcut_core::error::StepError;

use crate::store::StoreError;

/// Application error type that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Request body failed field validation.
    Validation(ValidationErrors),
    BadRequest(String),
    NotFound(String),
    /// `debug` is only rendered outside production.
    Internal {
        message: String,
        debug: Option<String>,
    },
}

impl AppError {
    pub fn internal(err: impl std::fmt::Debug + std::fmt::Display, expose_debug: bool) -> Self {
        AppError::Internal {
            message: err.to_string(),
            debug: expose_debug.then(|| format!("{err:?}")),
        }
    }

    /// Map a failed pipeline run; validation failures stay client errors.
    pub fn from_step(err: StepError, expose_debug: bool) -> Self {
        match err {
            StepError::Validation(msg) => AppError::BadRequest(msg),
            other => AppError::internal(other, expose_debug),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(errors)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::BadRequest(format!("{what} already exists")),
            other => AppError::Internal {
                message: other.to_string(),
                debug: None,
            },
        }
    }
}

/// Field-level detail keyed by path: `{"assets[0].url": ["url"], "query": [...]}`.
pub fn validation_details(errors: &ValidationErrors) -> Value {
    let mut out = serde_json::Map::new();
    collect_details("", errors, &mut out);
    Value::Object(out)
}

fn collect_details(prefix: &str, errors: &ValidationErrors, out: &mut serde_json::Map<String, Value>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                let messages: Vec<Value> = errs
                    .iter()
                    .map(|e| match &e.message {
                        Some(msg) => json!(msg),
                        None => json!(e.code),
                    })
                    .collect();
                out.insert(path, Value::Array(messages));
            }
            ValidationErrorsKind::Struct(inner) => collect_details(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    collect_details(&format!("{path}[{i}]"), inner, out);
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "success": false,
                    "error": "Invalid request",
                    "details": validation_details(errors),
                }),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "error": msg }),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": msg }),
            ),
            AppError::Internal { message, debug } => {
                tracing::error!(error = %message, "request failed");
                let mut body = json!({ "success": false, "error": message });
                if let Some(debug) = debug {
                    body["debug"] = json!(debug);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        };

        (status, axum::Json(body)).into_response()
    }
}
