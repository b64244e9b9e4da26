//! Error types for livedoc.

use std::fmt;

/// Result type alias for livedoc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema, transaction and backing store operations.
///
/// Errors are `Clone` so that one pending fetch can hand the same failure
/// to every caller awaiting it.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Unknown classifier id.
    ClassNotFound {
        class: String,
    },
    /// Attribute not declared on a class or any of its ancestors.
    AttributeNotFound {
        class: String,
        attribute: String,
    },
    /// No classifier in the extends chain declares a domain.
    DomainNotFound {
        class: String,
    },
    /// A transaction referenced a document that does not exist.
    DocumentNotFound {
        id: String,
    },
    /// An update used an operator that is not supported.
    UnknownOperator {
        operator: String,
    },
    /// Malformed update or transaction payload.
    InvalidOperation {
        message: String,
    },
    /// Malformed or unsupported query predicate.
    InvalidQuery {
        message: String,
    },
    /// The backing store failed or the connection is gone.
    Store {
        message: String,
    },
    /// The engine was closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassNotFound { class } => write!(f, "class not found: {}", class),
            Error::AttributeNotFound { class, attribute } => {
                write!(f, "attribute {} not found in class {}", attribute, class)
            }
            Error::DomainNotFound { class } => write!(f, "domain not found: {}", class),
            Error::DocumentNotFound { id } => write!(f, "document not found: {}", id),
            Error::UnknownOperator { operator } => write!(f, "unknown operator: {}", operator),
            Error::InvalidOperation { message } => write!(f, "invalid operation: {}", message),
            Error::InvalidQuery { message } => write!(f, "invalid query: {}", message),
            Error::Store { message } => write!(f, "backing store error: {}", message),
            Error::Closed => write!(f, "engine is closed"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates a class not found error.
    pub fn class_not_found(class: impl Into<String>) -> Self {
        Error::ClassNotFound {
            class: class.into(),
        }
    }

    /// Creates an attribute not found error.
    pub fn attribute_not_found(class: impl Into<String>, attribute: impl Into<String>) -> Self {
        Error::AttributeNotFound {
            class: class.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates a domain not found error.
    pub fn domain_not_found(class: impl Into<String>) -> Self {
        Error::DomainNotFound {
            class: class.into(),
        }
    }

    /// Creates a document not found error.
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Error::DocumentNotFound { id: id.into() }
    }

    /// Creates an unknown operator error.
    pub fn unknown_operator(operator: impl Into<String>) -> Self {
        Error::UnknownOperator {
            operator: operator.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a backing store error.
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    /// Returns true for schema errors, which are never retried.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Error::ClassNotFound { .. }
                | Error::AttributeNotFound { .. }
                | Error::DomainNotFound { .. }
        )
    }
}
