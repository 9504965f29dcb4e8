//! Module loading
//!
//! `load` and `require` resolve a module name against the runtime's search
//! path and hand the file to the loader for its extension:
//!
//! | Extension | Loader                                      |
//! |-----------|---------------------------------------------|
//! | `.nlb`    | [`compiled::load_compiled`]                 |
//! | `.nl`     | [`source::compile_and_load`]                |
//! | `.so`     | [`native::load_native`] (`.dll`, `.dyn`)    |
//!
//! `require` records each resolved path in the [`LoadLedger`] and loads it
//! at most once; `load` always runs the file.

pub mod compiled;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod native;
pub mod resolver;
pub mod search_path;
pub mod source;

use tracing::debug;

use crate::config::LoaderConfig;
use crate::runtime::{Exception, Runtime, Value};

pub use compiled::load_compiled;
pub use dispatch::{dispatch, ModuleKind};
pub use error::{LoadFailure, RequireError};
pub use ledger::{LoadLedger, LoadState, PathSet};
pub use native::{load_native, NativeEntry};
pub use resolver::{
    candidate_extensions, resolve, ResolvedPath, COMPILED_EXT, NATIVE_EXT, SOURCE_EXT,
};
pub use search_path::{SearchPath, PATH_SEPARATOR};
pub use source::{compile_and_load, TemporaryArtifact};

/// Per-runtime loader state
#[derive(Debug, Clone)]
pub struct ModuleState {
    search_path: SearchPath,
    ledger: LoadLedger,
    config: LoaderConfig,
}

impl ModuleState {
    /// Seed the search path from the configured environment variable,
    /// followed by the configured directories.
    pub fn new(config: LoaderConfig) -> Self {
        let mut search_path = SearchPath::from_env(&config.env_var);
        search_path.extend(config.search_paths.iter().cloned());
        debug!(env_var = %config.env_var, entries = search_path.len(), "search path initialized");

        Self {
            search_path,
            ledger: LoadLedger::new(),
            config,
        }
    }

    /// Empty search path and ledger
    pub fn detached(config: LoaderConfig) -> Self {
        Self {
            search_path: SearchPath::new(),
            ledger: LoadLedger::new(),
            config,
        }
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn search_path_mut(&mut self) -> &mut SearchPath {
        &mut self.search_path
    }

    pub fn ledger(&self) -> &LoadLedger {
        &self.ledger
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Paths `require` has finished loading, in order
    pub fn loaded_features(&self) -> &[String] {
        self.ledger.loaded()
    }

    /// Paths whose `require` is in progress (or failed and was kept)
    pub fn loading_features(&self) -> &[String] {
        self.ledger.loading()
    }
}

/// Resolve `name` and run it unconditionally.
pub fn load(rt: &mut Runtime, name: &str) -> Result<bool, RequireError> {
    let path = resolve(rt.modules().search_path(), name)?;
    dispatch(rt, &path)?;
    Ok(true)
}

/// Resolve `name` and run it unless it is already loaded or loading.
///
/// Returns `false` without running anything in that case, which also breaks
/// require cycles.
pub fn require(rt: &mut Runtime, name: &str) -> Result<bool, RequireError> {
    let path = resolve(rt.modules().search_path(), name)?;
    let key = path.key();

    if !rt.modules_mut().ledger.check_and_mark(&key) {
        debug!(path = %key, "already required");
        return Ok(false);
    }

    match dispatch(rt, &path) {
        Ok(()) => {
            rt.modules_mut().ledger.mark_loaded(&key);
            Ok(true)
        }
        Err(err) => {
            let modules = rt.modules_mut();
            if modules.config.retry_failed {
                modules.ledger.mark_failed(&key);
            }
            Err(err)
        }
    }
}

/// `load(filename)` builtin
pub fn f_load(rt: &mut Runtime, args: &[Value]) -> Result<Value, Exception> {
    let name = filename_argument(args)?;
    load(rt, &name)
        .map(Value::Bool)
        .map_err(RequireError::into_exception)
}

/// `require(filename)` builtin
pub fn f_require(rt: &mut Runtime, args: &[Value]) -> Result<Value, Exception> {
    let name = filename_argument(args)?;
    require(rt, &name)
        .map(Value::Bool)
        .map_err(RequireError::into_exception)
}

/// `add_load_path(dir)` builtin: append a directory to the search path
pub fn f_add_load_path(rt: &mut Runtime, args: &[Value]) -> Result<Value, Exception> {
    let dir = filename_argument(args)?;
    rt.modules_mut().search_path_mut().push(dir);
    Ok(Value::Nil)
}

/// Register the loader builtins on `rt`
pub fn install(rt: &mut Runtime) {
    rt.define_builtin("load", f_load);
    rt.define_builtin("require", f_require);
    rt.define_builtin("add_load_path", f_add_load_path);
}

fn filename_argument(args: &[Value]) -> Result<String, Exception> {
    match args {
        [Value::Str(name)] => Ok(name.clone()),
        [other] => Err(RequireError::Type {
            type_name: other.type_name(),
        }
        .into_exception()),
        _ => Err(Exception::argument_error(format!(
            "wrong number of arguments (given {}, expected 1)",
            args.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn runtime_in(dir: &Path) -> Runtime {
        let config = LoaderConfig {
            env_var: "NLREQ_UNIT_TEST_UNSET".to_string(),
            search_paths: vec![dir.to_string_lossy().into_owned()],
            temp_dir: Some(dir.to_path_buf()),
            ..LoaderConfig::default()
        };
        Runtime::with_config(config)
    }

    #[test]
    fn test_search_path_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        assert_eq!(rt.modules().search_path().len(), 1);
        assert!(rt.builtin("require").is_some());
        assert!(rt.builtin("load").is_some());
    }

    #[test]
    fn test_require_then_already_loaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.nl"), "nop\n").unwrap();

        let mut rt = runtime_in(dir.path());
        assert!(require(&mut rt, "a").unwrap());
        assert!(!require(&mut rt, "a").unwrap());
        assert_eq!(rt.modules().loaded_features().len(), 1);
        assert!(rt.modules().loading_features().is_empty());
    }

    #[test]
    fn test_load_ignores_ledger() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.nl"), "nop\n").unwrap();

        let mut rt = runtime_in(dir.path());
        assert!(load(&mut rt, "a").unwrap());
        assert!(load(&mut rt, "a").unwrap());
        assert!(rt.modules().loaded_features().is_empty());
    }

    #[test]
    fn test_argument_checks() {
        let mut rt = Runtime::new();
        let exc = f_require(&mut rt, &[Value::Int(1)]).unwrap_err();
        assert_eq!(exc.class, "TypeError");
        assert_eq!(exc.message, "can't convert Integer into String");

        let exc = f_load(&mut rt, &[]).unwrap_err();
        assert_eq!(exc.class, "ArgumentError");
        assert_eq!(exc.message, "wrong number of arguments (given 0, expected 1)");
    }

    #[test]
    fn test_not_found_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        let exc = f_require(&mut rt, &[Value::from("nothing")]).unwrap_err();
        assert_eq!(exc.class, "LoadError");
        assert_eq!(exc.message, "cannot load such file -- nothing");
    }

    #[test]
    fn test_add_load_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = Runtime::new();
        let before = rt.modules().search_path().len();
        let dir_name = dir.path().to_string_lossy().into_owned();
        f_add_load_path(&mut rt, &[Value::from(dir_name)]).unwrap();
        assert_eq!(rt.modules().search_path().len(), before + 1);
    }
}
