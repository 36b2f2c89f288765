use thiserror::Error;

#[derive(Error, Debug)]
pub enum MimirError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Invalid confirmation: {0}")]
    ConfirmationInvalid(String),

    #[error("Vector error: {0}")]
    Vector(String),

    #[error("Lexical error: {0}")]
    Lexical(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Feature disabled: {0}")]
    Disabled(String),
}

impl MimirError {
    /// Stable machine-readable kind string carried on wire-level error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            MimirError::Io(_) => "EStorage",
            MimirError::Serialization(_) => "EValidation",
            MimirError::NotFound(_) => "ENotFound",
            MimirError::Conflict(_) => "EConflict",
            MimirError::Validation(_) => "EValidation",
            MimirError::ConfirmationRequired(_) => "EConfirmationRequired",
            MimirError::ConfirmationInvalid(_) => "EConfirmationInvalid",
            MimirError::Vector(_) => "EVector",
            MimirError::Lexical(_) => "ELexical",
            MimirError::Search(_) => "ESearch",
            MimirError::Storage(_) => "EStorage",
            MimirError::Cancelled(_) => "ECancelled",
            MimirError::Timeout(_) => "ETimeout",
            MimirError::Configuration(_) => "EConfig",
            MimirError::Disabled(_) => "EDisabled",
        }
    }
}

pub type Result<T> = std::result::Result<T, MimirError>;
