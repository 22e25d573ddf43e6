//! Error types for modpatch-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in modpatch-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not well-formed LSX
    #[error("malformed {document} document: {message}")]
    Xml { document: String, message: String },

    /// A required node is missing from a document
    #[error("{document} document has no '{node}' node")]
    MissingNode { document: String, node: String },

    /// A required attribute is missing from a node
    #[error("'{node}' node is missing required attribute '{attribute}'")]
    MissingAttribute { node: String, attribute: String },

    /// An attribute value could not be interpreted
    #[error("attribute '{attribute}' has invalid value '{value}': {message}")]
    InvalidValue {
        attribute: String,
        value: String,
        message: String,
    },

    /// The same progression UUID appears twice in one document
    #[error("duplicate progression UUID {0}")]
    DuplicateProgression(String),

    /// An expected document is absent from an unpacked tree
    #[error("'{file}' not found under '{root}'")]
    Lookup { file: String, root: PathBuf },

    /// A merge strategy was applied to a field of an incompatible shape
    #[error("cannot apply {strategy} merge to field '{field}'")]
    TypeMismatch {
        field: &'static str,
        strategy: &'static str,
    },

    /// The archive tool or the installed-mods list patch failed
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// Configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Whether this error aborts the whole run rather than one add-on or field
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ExternalTool { .. } | Error::Io(_) | Error::Config(_)
        )
    }

    pub(crate) fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
