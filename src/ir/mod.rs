//! IR (Intermediate Representation) module
//!
//! Defines the unit instruction format, the `.nlb` bytecode container, and
//! the assembler/disassembler that act as the compiler front-end for `.nl`
//! source.
//!
//! # Compiler interface
//!
//! The loader only sees the [`Compiler`] trait. [`Assembler`] is the
//! front-end every runtime starts with; tests swap in their own through
//! `Runtime::with_compiler`.

pub mod assembler;
pub mod compiler;
pub mod dump;
pub mod format;

pub use assembler::{AsmError, Assembler, Disassembler};
pub use compiler::{CompileError, CompileMode, Compiler};
pub use dump::{dump_to_vec, dump_units, read_units, DecodeError, FORMAT_VERSION, MAGIC};
pub use format::*;
