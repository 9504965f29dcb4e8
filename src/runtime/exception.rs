//! Host exceptions

use std::fmt;

/// An exception raised by code running on the host.
///
/// The backtrace grows as the exception unwinds: the innermost frame comes
/// first, each entry formatted as `file:line:in scope`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub class: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl Exception {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::new("ArgumentError", message)
    }

    /// Append a frame while unwinding
    pub fn push_frame(&mut self, frame: String) {
        self.backtrace.push(frame);
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.class)
    }
}

impl std::error::Error for Exception {}
