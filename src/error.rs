//! Error handling for the ETL loader
//!
//! Every failure the loader can report maps onto one [`ErrorCode`]. Errors are
//! split into two classes:
//!
//! - **fatal**: bad configuration or a broken provenance store. The run stops.
//! - **row-scoped**: bad data in one legacy row. The row is rolled back, its
//!   failure is recorded in the ETL log and loading continues.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distinguishable error kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidMapping,
    InvalidNode,
    InvalidReference,
    NullReference,
    MissingRowValue,
    IMObjectNotFound,
    RefResolvesMultipleObjects,
    ReferencedObjectNotMapped,
    LookupNotFound,
    ArchetypeNotFound,
    ValidationFailed,
    ServiceFailed,
    StoreFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors reported by the archetype (domain object) service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Archetype '{0}' not found")]
    ArchetypeNotFound(String),

    #[error("Failed to validate {archetype}: {}", errors.join("; "))]
    Validation {
        archetype: String,
        errors: Vec<String>,
    },

    #[error("Service error: {0}")]
    Service(String),
}

/// Errors reported by the ETL log store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaoError {
    #[error("ETL log store error: {0}")]
    Store(String),
}

/// Main error type for the loader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EtlError {
    #[error("Invalid mapping for target '{target}': {reason}")]
    InvalidMapping { target: String, reason: String },

    #[error("Invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("Invalid reference '{0}'")]
    InvalidReference(String),

    #[error("Null reference for target '{target}' in row {row_id}")]
    NullReference { row_id: String, target: String },

    #[error("Row {row_id} has no value for column '{column}'")]
    MissingRowValue { row_id: String, column: String },

    #[error("No object found for reference {0}")]
    IMObjectNotFound(String),

    #[error("Reference {0} resolves to multiple objects")]
    RefResolvesMultipleObjects(String),

    #[error("Reference {reference} refers to an object that failed to load: {message}")]
    ReferencedObjectNotMapped { reference: String, message: String },

    #[error("No lookup of type {lookup_type} with code '{code}'")]
    LookupNotFound { lookup_type: String, code: String },

    #[error("Archetype '{0}' not found")]
    ArchetypeNotFound(String),

    #[error(transparent)]
    Service(ServiceError),

    #[error(transparent)]
    Dao(#[from] DaoError),
}

impl From<ServiceError> for EtlError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::ArchetypeNotFound(archetype) => EtlError::ArchetypeNotFound(archetype),
            other => EtlError::Service(other),
        }
    }
}

impl EtlError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EtlError::InvalidMapping { .. } => ErrorCode::InvalidMapping,
            EtlError::InvalidNode { .. } => ErrorCode::InvalidNode,
            EtlError::InvalidReference(_) => ErrorCode::InvalidReference,
            EtlError::NullReference { .. } => ErrorCode::NullReference,
            EtlError::MissingRowValue { .. } => ErrorCode::MissingRowValue,
            EtlError::IMObjectNotFound(_) => ErrorCode::IMObjectNotFound,
            EtlError::RefResolvesMultipleObjects(_) => ErrorCode::RefResolvesMultipleObjects,
            EtlError::ReferencedObjectNotMapped { .. } => ErrorCode::ReferencedObjectNotMapped,
            EtlError::LookupNotFound { .. } => ErrorCode::LookupNotFound,
            EtlError::ArchetypeNotFound(_) => ErrorCode::ArchetypeNotFound,
            EtlError::Service(ServiceError::Validation { .. }) => ErrorCode::ValidationFailed,
            EtlError::Service(_) => ErrorCode::ServiceFailed,
            EtlError::Dao(_) => ErrorCode::StoreFailed,
        }
    }

    /// Configuration errors and store failures stop the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EtlError::InvalidMapping { .. } | EtlError::InvalidNode { .. } | EtlError::Dao(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_conversion() {
        let err: EtlError = ServiceError::ArchetypeNotFound("party.person".into()).into();
        assert_eq!(err.code(), ErrorCode::ArchetypeNotFound);
        assert!(!err.is_fatal());

        let err: EtlError = ServiceError::Validation {
            archetype: "party.person".into(),
            errors: vec!["lastName is required".into()],
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert_eq!(
            err.to_string(),
            "Failed to validate party.person: lastName is required"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let config = EtlError::InvalidMapping {
            target: "<a>b".into(),
            reason: "bad".into(),
        };
        assert!(config.is_fatal());
        assert!(EtlError::Dao(DaoError::Store("down".into())).is_fatal());
        assert!(!EtlError::IMObjectNotFound("<party.person>1".into()).is_fatal());
    }
}
