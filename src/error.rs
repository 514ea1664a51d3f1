use thiserror::Error;

use crate::xml::XmlError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Usage: <source file> <target file>")]
    Usage,

    #[error("File {0} does not exist")]
    MissingSource(String),

    #[error("Cannot parse {path}: {source}")]
    Parse { path: String, source: XmlError },

    #[error("Cannot load stylesheet {name}: {reason}")]
    ResourceLoad { name: String, reason: String },

    #[error("Transformation failed: {0}")]
    Transform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Invalid transaction group: {0}")]
    InvalidGroup(String),
}

impl ImportError {
    /// Errors reported as plain console messages with a successful exit.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Usage | Self::MissingSource(_))
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
