//! # Manejo de errores
//!
//! Todos los errores de la aplicación se convierten en la frontera HTTP en el
//! sobre JSON `{ "success": false, "error": ..., "message": ... }`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::error::Error;
use thiserror::Error;

/// Tipos de error de la aplicación
#[derive(Error, Debug)]
pub enum AppError {
    /// Error de base de datos con la operación que lo produjo
    #[error("Database error in operation '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// Error de validación con campo específico
    #[error("Validation error in field '{field}': {message}")]
    ValidationWithField {
        field: String,
        message: String,
    },

    /// Error de validación general
    #[error("Validation error: {0}")]
    Validation(String),

    /// Falta la identidad del llamante o no es válida
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// El rol del llamante no permite la operación
    #[error("Forbidden for role '{role}' in operation '{operation}'")]
    Forbidden {
        operation: String,
        role: String,
    },

    /// Error de recurso no encontrado
    #[error("Not found: {resource_type} with ID '{id}'")]
    NotFoundWithId {
        resource_type: String,
        id: String,
    },

    /// Error de no encontrado simple
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ninguna combinación de mesas libres alcanza la capacidad pedida
    #[error("No suitable tables available for {capacity} guests on {date} at {start_time}")]
    NoSuitableTables {
        capacity: i32,
        date: String,
        start_time: String,
    },

    /// La franja pedida ya está ocupada, o la reserva no admite la transición
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Otro escritor ha tomado la mesa entre la lectura y la escritura
    #[error("Table '{table_id}' was taken concurrently")]
    TableConflict {
        table_id: String,
    },

    /// Error interno con código de rastreo
    #[error("Internal error (trace: {trace_id}): {message}")]
    InternalWithTrace {
        trace_id: String,
        message: String,
    },

    /// Error interno simple
    #[error("Internal error: {0}")]
    Internal(String),
}

// Métodos helper para crear errores con contexto
impl AppError {
    /// Crea un error de base de datos con contexto de operación
    pub fn database(operation: &str, source: mongodb::error::Error) -> Self {
        if source.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
            tracing::debug!(operation = %operation, error = %source, "Transient transaction error");
            return Self::TableConflict {
                table_id: format!("unknown ({})", operation),
            };
        }
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }

    /// Crea un error de validación con campo específico
    pub fn validation_field(field: &str, message: &str) -> Self {
        Self::ValidationWithField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn forbidden(operation: &str, role: &str) -> Self {
        Self::Forbidden {
            operation: operation.to_string(),
            role: role.to_string(),
        }
    }

    /// Crea un error de no encontrado con ID
    pub fn not_found_id(resource_type: &str, id: &str) -> Self {
        Self::NotFoundWithId {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Crea un error interno con trace ID
    pub fn internal_trace(message: &str, trace_id: Option<String>) -> Self {
        Self::InternalWithTrace {
            trace_id: trace_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: message.to_string(),
        }
    }

    /// Conflictos de escritura que justifican repetir la asignación
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::TableConflict { .. })
    }

    fn category(&self) -> &'static str {
        match self {
            Self::Database { .. } => "Database error",
            Self::ValidationWithField { .. } | Self::Validation(_) => "Validation error",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFoundWithId { .. } | Self::NotFound(_) => "Not found",
            Self::NoSuitableTables { .. } => "No suitable tables",
            Self::Conflict(_) | Self::TableConflict { .. } => "Conflict",
            Self::InternalWithTrace { .. } | Self::Internal(_) => "Internal error",
        }
    }

    /// Mensaje visible para el cliente. Los errores internos no exponen detalles.
    fn public_message(&self) -> String {
        match self {
            Self::Database { .. } | Self::Internal(_) => "Internal server error".to_string(),
            Self::InternalWithTrace { trace_id, .. } => {
                format!("Internal server error (trace: {})", trace_id)
            }
            Self::ValidationWithField { field, message } => {
                format!("Field '{}': {}", field, message)
            }
            Self::Validation(message) | Self::NotFound(message) | Self::Conflict(message) => {
                message.clone()
            }
            Self::Unauthorized(reason) => reason.clone(),
            Self::Forbidden { operation, role } => {
                format!("Role '{}' may not perform '{}'", role, operation)
            }
            Self::NotFoundWithId { resource_type, id } => {
                format!("{} with ID '{}' not found", resource_type, id)
            }
            Self::NoSuitableTables { capacity, date, start_time } => format!(
                "No suitable tables available for {} guests on {} at {}",
                capacity, date, start_time
            ),
            Self::TableConflict { .. } => {
                "The table is already reserved for this time slot".to_string()
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationWithField { .. }
            | Self::Validation(_)
            | Self::NoSuitableTables { .. }
            | Self::Conflict(_)
            | Self::TableConflict { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFoundWithId { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database { .. } | Self::InternalWithTrace { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Log detallado del error antes de responder
        match self {
            Self::Database { operation, source } => {
                tracing::error!(
                    operation = %operation,
                    error = %source,
                    error_chain = ?source.source(),
                    "Database error occurred"
                );
            }
            Self::ValidationWithField { field, message } => {
                tracing::warn!(field = %field, message = %message, "Validation error");
            }
            Self::Forbidden { operation, role } => {
                tracing::warn!(operation = %operation, role = %role, "Forbidden access attempt");
            }
            Self::NotFoundWithId { resource_type, id } => {
                tracing::info!(resource_type = %resource_type, id = %id, "Resource not found");
            }
            Self::NoSuitableTables { capacity, date, start_time } => {
                tracing::info!(
                    capacity = capacity,
                    date = %date,
                    start_time = %start_time,
                    "Allocation failed"
                );
            }
            Self::InternalWithTrace { trace_id, message } => {
                tracing::error!(trace_id = %trace_id, message = %message, "Internal error with trace");
            }
            Self::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
            }
            error => {
                tracing::warn!(error = %error, "Request rejected");
            }
        }

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            error: self.category().to_string(),
            message: self.public_message(),
        })
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

pub type AppResult<T> = Result<T, AppError>;

// Conversión automática desde mongodb::error::Error
impl From<mongodb::error::Error> for AppError {
    fn from(error: mongodb::error::Error) -> Self {
        Self::database("database_operation", error)
    }
}

// Conversión desde errores de ObjectId
impl From<mongodb::bson::oid::Error> for AppError {
    fn from(e: mongodb::bson::oid::Error) -> Self {
        Self::validation_field("ObjectId", &e.to_string())
    }
}

pub trait ResultExt<T> {
    fn map_err_db_operation(self, operation: &str) -> AppResult<T>;
}

impl<T> ResultExt<T> for Result<T, mongodb::error::Error> {
    fn map_err_db_operation(self, operation: &str) -> AppResult<T> {
        self.map_err(|e| AppError::database(operation, e))
    }
}
