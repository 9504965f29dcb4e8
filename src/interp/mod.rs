//! Interpreter module
//!
//! Executes compiled units against a [`Runtime`](crate::runtime::Runtime).

pub mod dispatch;
pub mod stack;

pub use dispatch::{invoke, Proc, Scope, MAX_CALL_DEPTH};
pub use stack::ensure_sufficient_stack;
