use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidId { kind: &'static str, reason: String },
    EmptyValue(&'static str),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId { kind, reason } => {
                write!(f, "invalid {kind} id: {reason}")
            }
            ModelError::EmptyValue(field) => {
                write!(f, "{field} cannot be empty")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
