//! Error types for the flatpak builder.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The manifest is structurally invalid.
    #[error("invalid manifest: {0}")]
    Validation(String),

    /// A manifest field holds a value of the wrong type.
    #[error("invalid type for {key:?}: expected {expected}, found {found}")]
    Type {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{command} failed with exit code {}:\n{output}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExternalTool {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an I/O error together with the path it concerns.
    pub fn fs(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for both structural and type validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Type { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Filesystem { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Exit code of a failed external tool, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::ExternalTool { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
