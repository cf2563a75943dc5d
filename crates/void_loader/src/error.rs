//! Error types for the module loader

use std::path::PathBuf;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors raised while reading a dependency manifest
///
/// Positions are 1-based and come straight from the JSON reader. A position of
/// zero means the source carried none (an empty document, for instance).
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A required attribute is absent
    #[error("Manifest is missing required field '{field}' (line {line}, column {column})")]
    MissingRequiredField {
        field: String,
        line: usize,
        column: usize,
    },

    /// The manifest is not well formed
    #[error("Malformed manifest at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// The manifest file could not be read
    #[error("Failed to read manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    /// Classify a JSON reader error
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        let message = err.to_string();
        let (line, column) = (err.line(), err.column());

        // serde reports absent fields as "missing field `name` at line .."
        if let Some(rest) = message.strip_prefix("missing field `") {
            if let Some(end) = rest.find('`') {
                return ManifestError::MissingRequiredField {
                    field: rest[..end].to_string(),
                    line,
                    column,
                };
            }
        }

        ManifestError::Syntax { message, line, column }
    }

    /// Line of the offending input, if known
    pub fn line(&self) -> Option<usize> {
        match self {
            ManifestError::MissingRequiredField { line, .. }
            | ManifestError::Syntax { line, .. } => Some(*line).filter(|l| *l > 0),
            ManifestError::Io { .. } => None,
        }
    }
}

/// Errors that can occur while building, resolving or reloading a load context
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Manifest could not be turned into a dependency graph
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Caller passed an argument that violates a configuration rule
    #[error("Invalid argument '{argument}': {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },

    /// Operation against a context that has been unloaded
    #[error("Load context '{context}' has been unloaded")]
    UseAfterUnload { context: String },

    /// Weak observation still alive after the collection budget was spent
    #[error("Load context '{context}' still reachable after {attempts} reclamation attempts")]
    ReclaimNotVerified { context: String, attempts: u32 },

    /// Failed to open a dynamic library
    #[error("Failed to load library '{path}': {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Library does not contain the requested symbol
    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    /// Module discovery entry point reports an incompatible ABI
    #[error("Version mismatch: module API version {module_version}, expected {expected_version}")]
    VersionMismatch {
        module_version: u32,
        expected_version: u32,
    },

    /// Watcher or rebuild failure during hot-reload
    #[error("Hot-reload failed: {0}")]
    HotReloadFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// Create an invalid argument error
    pub fn invalid_argument(argument: &'static str, message: impl Into<String>) -> Self {
        LoaderError::InvalidArgument {
            argument,
            message: message.into(),
        }
    }

    /// Create a load failure
    pub fn load_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LoaderError::LoadFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        LoaderError::SymbolNotFound {
            library: library.into(),
            symbol: symbol.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_classified() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Probe {
            required: String,
        }

        let err = serde_json::from_str::<Probe>("{\n  \"other\": 1\n}").unwrap_err();
        match ManifestError::from_json(err) {
            ManifestError::MissingRequiredField { field, line, .. } => {
                assert_eq!(field, "required");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_syntax_error_keeps_position() {
        let err = serde_json::from_str::<serde_json::Value>("{\n  \"a\": ,\n}").unwrap_err();
        let err = ManifestError::from_json(err);
        assert!(matches!(err, ManifestError::Syntax { line: 2, .. }));
        assert_eq!(err.line(), Some(2));
    }
}
