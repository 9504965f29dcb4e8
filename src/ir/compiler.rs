//! Compiler front-end interface
//!
//! The loader never parses source itself; it asks the runtime's compiler to
//! append units to a unit table.

use thiserror::Error;

use super::assembler::AsmError;
use crate::runtime::{Exception, Runtime};

/// Whether a compiled root unit is run right away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Append the units and stop
    DeclareOnly,
    /// Append the units, then invoke the root against the top-level receiver
    Execute,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Asm(#[from] AsmError),

    #[error("{0}")]
    Raised(Exception),
}

/// A front-end that turns source text into units.
pub trait Compiler: Send + Sync {
    /// Compile `source` into `rt`'s unit table.
    ///
    /// Produced units occupy one contiguous range starting at the returned
    /// index, which is the root unit. `filename` is recorded on every unit.
    fn compile(
        &self,
        rt: &mut Runtime,
        source: &str,
        filename: &str,
        mode: CompileMode,
    ) -> Result<usize, CompileError>;
}
