//! Loader errors

use std::io;

use thiserror::Error;

use crate::ir::DecodeError;
use crate::runtime::Exception;

/// Why a file could not be turned into units
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("{0}")]
    Open(#[from] io::Error),

    #[error("{0}")]
    Decode(#[from] DecodeError),
}

/// Errors raised by `load`/`require` and the loaders behind them.
#[derive(Debug, Error)]
pub enum RequireError {
    #[error("cannot load such file -- {name}")]
    NotFound { name: String },

    #[error("Filepath '{path}' is {reason}.")]
    InvalidExtension { path: String, reason: &'static str },

    #[error("can't load {path}")]
    Load {
        path: String,
        #[source]
        source: LoadFailure,
    },

    #[error("can't load {path}: {message}")]
    Compile { path: String, message: String },

    /// Native loader failure, carrying the platform loader's text
    #[error("{0}")]
    Runtime(String),

    /// An exception raised by code that ran during the load
    #[error("{0}")]
    Raised(Exception),

    #[error("can't convert {type_name} into String")]
    Type { type_name: &'static str },
}

impl RequireError {
    pub(crate) fn load(path: impl Into<String>, source: impl Into<LoadFailure>) -> Self {
        RequireError::Load {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Host exception class this error surfaces as
    pub fn class(&self) -> &str {
        match self {
            RequireError::NotFound { .. }
            | RequireError::InvalidExtension { .. }
            | RequireError::Load { .. }
            | RequireError::Compile { .. } => "LoadError",
            RequireError::Runtime(_) => "RuntimeError",
            RequireError::Type { .. } => "TypeError",
            RequireError::Raised(exc) => &exc.class,
        }
    }

    /// Convert into the exception raised on the host
    pub fn into_exception(self) -> Exception {
        match self {
            RequireError::Raised(exc) => exc,
            other => Exception::new(other.class().to_string(), other.to_string()),
        }
    }
}
