//! Runtime module
//!
//! The host instance every loader and executor call operates on. It owns
//! the unit table, globals, the function and builtin tables, the pending
//! exception slot, the GC arena, and the module-loading state (search path
//! and load ledger).
//!
//! Nothing here is process-wide: two runtimes never share state, which is
//! what lets source compilation run in a throwaway instance.

pub mod exception;
pub mod value;

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::ir::{read_units, Assembler, CompiledUnit, Compiler, DecodeError};
use crate::require::{self, ModuleState};

pub use exception::Exception;
pub use value::Value;

/// A function implemented in Rust and callable from units by name.
pub type BuiltinFn = fn(&mut Runtime, &[Value]) -> Result<Value, Exception>;

/// Where `print` output goes
#[derive(Debug)]
enum Output {
    Stdout,
    Captured(Vec<String>),
}

/// Host instance
pub struct Runtime {
    units: Vec<CompiledUnit>,
    globals: HashMap<String, Value>,
    functions: HashMap<String, usize>,
    builtins: HashMap<String, BuiltinFn>,
    /// Exception raised outside of an executing frame (e.g. while reading units)
    exception: Option<Exception>,
    /// Temporary roots; saved and restored around loader steps
    arena: Vec<Value>,
    halted: bool,
    depth: usize,
    output: Output,
    compiler: Arc<dyn Compiler>,
    modules: ModuleState,
}

impl Runtime {
    /// Create a runtime with the default loader configuration
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    /// Create a runtime with `load`/`require` installed and the search path
    /// seeded from the configured environment variable.
    pub fn with_config(config: LoaderConfig) -> Self {
        let mut rt = Self::bare(Arc::new(Assembler::new()), ModuleState::new(config));
        require::install(&mut rt);
        rt
    }

    fn bare(compiler: Arc<dyn Compiler>, modules: ModuleState) -> Self {
        let mut rt = Self {
            units: Vec::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            builtins: HashMap::new(),
            exception: None,
            arena: Vec::new(),
            halted: false,
            depth: 0,
            output: Output::Stdout,
            compiler,
            modules,
        };
        rt.define_builtin("print", builtin_print);
        rt
    }

    /// A fresh instance that shares only the compiler.
    ///
    /// Its unit table, globals and ledger start empty, and nothing done to it
    /// is visible from `self`.
    pub fn isolated(&self) -> Self {
        Self::bare(
            Arc::clone(&self.compiler),
            ModuleState::detached(self.modules.config().clone()),
        )
    }

    /// Replace the compiler front-end
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Collect `print` output instead of writing it to stdout
    pub fn capture_output(mut self) -> Self {
        self.output = Output::Captured(Vec::new());
        self
    }

    /// Captured `print` lines (empty when printing to stdout)
    pub fn output(&self) -> &[String] {
        match &self.output {
            Output::Captured(lines) => lines,
            Output::Stdout => &[],
        }
    }

    pub fn write_line(&mut self, line: String) {
        match &mut self.output {
            Output::Captured(lines) => lines.push(line),
            Output::Stdout => println!("{}", line),
        }
    }

    pub fn compiler(&self) -> Arc<dyn Compiler> {
        Arc::clone(&self.compiler)
    }

    pub fn modules(&self) -> &ModuleState {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleState {
        &mut self.modules
    }

    // =========================================================================
    // Unit table
    // =========================================================================

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[CompiledUnit] {
        &self.units
    }

    pub fn unit(&self, idx: usize) -> Option<&CompiledUnit> {
        self.units.get(idx)
    }

    pub fn unit_mut(&mut self, idx: usize) -> Option<&mut CompiledUnit> {
        self.units.get_mut(idx)
    }

    /// Units from `start` to the end of the table
    pub fn units_from_mut(&mut self, start: usize) -> &mut [CompiledUnit] {
        let start = start.min(self.units.len());
        &mut self.units[start..]
    }

    /// Append units, returning the index of the first one
    pub fn append_units(&mut self, units: impl IntoIterator<Item = CompiledUnit>) -> usize {
        let start = self.units.len();
        self.units.extend(units);
        start
    }

    /// Read a bytecode stream into the unit table.
    ///
    /// Returns the index of the root unit. Symbols of every unit are pushed
    /// to the arena while reading; callers bracket this with
    /// [`arena_save`](Self::arena_save)/[`arena_restore`](Self::arena_restore).
    /// A stream written for another format version also leaves a pending
    /// `ScriptError`.
    pub fn read_units<R: Read>(&mut self, reader: &mut R) -> Result<usize, DecodeError> {
        let units = match read_units(reader) {
            Ok(units) => units,
            Err(err) => {
                if let DecodeError::UnsupportedVersion { .. } = err {
                    self.raise(Exception::new("ScriptError", err.to_string()));
                }
                return Err(err);
            }
        };

        for unit in &units {
            self.arena
                .extend(unit.symbols.iter().map(|s| Value::Str(s.clone())));
        }
        Ok(self.append_units(units))
    }

    // =========================================================================
    // Globals, functions, builtins
    // =========================================================================

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Bind `name` to the unit at `unit`
    pub fn define_function(&mut self, name: impl Into<String>, unit: usize) {
        self.functions.insert(name.into(), unit);
    }

    pub fn function(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    /// Register a builtin on the root namespace
    pub fn define_builtin(&mut self, name: impl Into<String>, f: BuiltinFn) {
        self.builtins.insert(name.into(), f);
    }

    pub fn builtin(&self, name: &str) -> Option<BuiltinFn> {
        self.builtins.get(name).copied()
    }

    /// The receiver top-level code runs against
    pub fn top_self(&self) -> Value {
        Value::Main
    }

    // =========================================================================
    // Exceptions, arena, halting
    // =========================================================================

    /// Record a pending exception
    pub fn raise(&mut self, exception: Exception) {
        self.exception = Some(exception);
    }

    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn take_exception(&mut self) -> Option<Exception> {
        self.exception.take()
    }

    pub fn arena_save(&self) -> usize {
        self.arena.len()
    }

    pub fn arena_restore(&mut self, checkpoint: usize) {
        self.arena.truncate(checkpoint);
    }

    pub fn arena_push(&mut self, value: Value) {
        self.arena.push(value);
    }

    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Whether a `halt` has stopped the host
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn halt(&mut self) {
        self.halted = true;
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter_frame(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn leave_frame(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_print(rt: &mut Runtime, args: &[Value]) -> Result<Value, Exception> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    rt.write_line(line);
    Ok(Value::Nil)
}
