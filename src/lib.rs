//! nlreq - module loading for a small register-machine host
//!
//! Resolves module names against a search path and loads them into a
//! [`Runtime`](runtime::Runtime), whichever form they come in:
//!
//! - **`.nlb`**: precompiled bytecode, read straight into the unit table
//! - **`.nl`**: source, compiled in a scratch runtime and then loaded as bytecode
//! - **`.so`/`.dll`/`.dyn`**: native extensions, initialized through `nl_ext_init`
//!
//! `require` loads a file at most once per runtime; `load` runs it every time.
//!
//! # Example
//!
//! ```rust
//! use nlreq::interp::{invoke, Proc};
//! use nlreq::ir::Assembler;
//! use nlreq::runtime::{Runtime, Value};
//!
//! let mut rt = Runtime::new();
//! let units = Assembler::new()
//!     .assemble("int r1, 42\nret r1\n", "answer.nl")
//!     .unwrap();
//! let root = rt.append_units(units);
//!
//! let receiver = rt.top_self();
//! let value = invoke(&mut rt, &Proc::top_level(root), &[], receiver).unwrap();
//! assert_eq!(value, Value::Int(42));
//! ```
//!
//! # Architecture
//!
//! ```text
//! require("name") / load("name")
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Resolver     │  search path × [.nlb, .nl, .so]
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   LoadLedger    │  require only: loaded / loading
//! └────────┬────────┘
//!          ▼
//!    ┌─────┼──────────────┐
//!    ▼     ▼              ▼
//! ┌──────┐ ┌────────────┐ ┌────────┐
//! │ .nlb │ │ .nl → .nlb │ │ native │
//! └──┬───┘ └─────┬──────┘ └────────┘
//!    └─────┬─────┘
//!          ▼
//! ┌─────────────────┐
//! │   Interpreter   │  root unit invoked at top level
//! └─────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod interp;
pub mod ir;
pub mod require;
pub mod runtime;

pub use config::{ConfigError, LoaderConfig, NlreqConfig};
pub use interp::{invoke, Proc, Scope};
pub use ir::{Assembler, CompileMode, CompiledUnit, Compiler, Disassembler, Instruction, Opcode};
pub use require::{load, require, ModuleState, RequireError, SearchPath};
pub use runtime::{Exception, Runtime, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
