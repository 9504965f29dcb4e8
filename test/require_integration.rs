//! Require/Load Integration Tests
//!
//! Drives `load` and `require` end to end: resolution, the load ledger,
//! source compilation through temporary artifacts, and error surfacing.

use nlreq::config::LoaderConfig;
use nlreq::interp::{invoke, Proc};
use nlreq::ir::{dump_to_vec, Assembler, CompileError, CompileMode, Compiler};
use nlreq::require::{self, RequireError};
use nlreq::runtime::{Runtime, Value};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Module directory plus a private directory for temporary artifacts
struct Fixture {
    modules: TempDir,
    scratch: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            modules: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.modules.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    fn canonical(&self, name: &str) -> String {
        fs::canonicalize(self.modules.path().join(name))
            .unwrap()
            .display()
            .to_string()
    }

    fn config(&self) -> LoaderConfig {
        LoaderConfig {
            env_var: "NLREQ_INTEGRATION_UNSET".to_string(),
            search_paths: vec![self.modules.path().display().to_string()],
            temp_dir: Some(self.scratch.path().to_path_buf()),
            ..LoaderConfig::default()
        }
    }

    fn runtime(&self) -> Runtime {
        Runtime::with_config(self.config()).capture_output()
    }

    fn scratch_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.scratch.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

fn printer(text: &str) -> String {
    format!("str r1, \"{}\"\ncall r0, print, r1, 1\n", text)
}

/// Run `source` as a top-level script in `rt`
fn run_script(rt: &mut Runtime, source: &str) -> Result<Value, nlreq::Exception> {
    let units = Assembler::new().assemble(source, "script.nl").unwrap();
    let root = rt.append_units(units);
    if let Some(unit) = rt.unit_mut(root) {
        unit.finalize_for_invocation();
    }
    let receiver = rt.top_self();
    invoke(rt, &Proc::top_level(root), &[], receiver)
}

// ============================================================================
// Ledger semantics
// ============================================================================

#[test]
fn test_require_twice_returns_true_then_false() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a ran"));

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "a").unwrap());
    assert!(!require::require(&mut rt, "a").unwrap());
    assert_eq!(rt.output(), ["a ran".to_string()]);
    assert_eq!(rt.modules().loaded_features(), [fx.canonical("a.nl")]);
}

#[test]
fn test_load_twice_runs_twice() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a ran"));

    let mut rt = fx.runtime();
    assert!(require::load(&mut rt, "a").unwrap());
    assert!(require::load(&mut rt, "a").unwrap());
    assert_eq!(rt.output().len(), 2);
    assert!(rt.modules().loaded_features().is_empty());
}

#[test]
fn test_load_after_require_still_runs() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a ran"));

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "a").unwrap());
    assert!(require::load(&mut rt, "a").unwrap());
    assert_eq!(rt.output().len(), 2);
}

#[test]
fn test_self_require_cycle_terminates() {
    let fx = Fixture::new();
    fx.write(
        "a.nl",
        "str r1, \"a\"
         call r2, require, r1, 1
         gset $inner, r2
         str r3, \"done\"
         call r0, print, r3, 1
        ",
    );

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "a").unwrap());
    assert_eq!(rt.global("$inner"), Some(&Value::Bool(false)));
    assert_eq!(rt.output(), ["done".to_string()]);
}

#[test]
fn test_mutual_cycle_terminates() {
    let fx = Fixture::new();
    fx.write("a.nl", &format!("str r1, \"b\"\ncall r0, require, r1, 1\n{}", printer("a")));
    fx.write("b.nl", &format!("str r1, \"a\"\ncall r0, require, r1, 1\n{}", printer("b")));

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "a").unwrap());
    assert_eq!(rt.output(), ["b".to_string(), "a".to_string()]);
    assert_eq!(
        rt.modules().loaded_features(),
        [fx.canonical("b.nl"), fx.canonical("a.nl")]
    );
}

#[test]
fn test_same_file_under_two_names() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a"));
    fs::create_dir(fx.modules.path().join("sub")).unwrap();

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "a").unwrap());
    assert!(!require::require(&mut rt, "sub/../a").unwrap());
    assert!(!require::require(&mut rt, "a.nl").unwrap());
    assert_eq!(rt.output().len(), 1);
}

#[test]
fn test_absolute_name_is_its_own_ledger_key() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a"));
    let spelled = format!("{}/./a.nl", fx.modules.path().display());

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, &spelled).unwrap());
    assert!(require::require(&mut rt, "a").unwrap());
    assert_eq!(rt.output(), ["a".to_string(), "a".to_string()]);
    assert_eq!(
        rt.modules().loaded_features(),
        [spelled.clone(), fx.canonical("a.nl")]
    );
}

#[test]
fn test_nested_requires_record_completion_order() {
    let fx = Fixture::new();
    fx.write("lib2.nl", &printer("lib2"));
    fx.write("lib1.nl", "str r1, \"lib2\"\ncall r0, require, r1, 1\n");
    fx.write("top.nl", "str r1, \"lib1\"\ncall r0, require, r1, 1\n");

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "top").unwrap());
    assert_eq!(
        rt.modules().loaded_features(),
        [
            fx.canonical("lib2.nl"),
            fx.canonical("lib1.nl"),
            fx.canonical("top.nl")
        ]
    );
    assert!(rt.modules().loading_features().is_empty());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_failed_require_can_be_retried() {
    let fx = Fixture::new();
    fx.write("flaky.nl", "bogus r1\n");

    let mut rt = fx.runtime();
    assert!(matches!(
        require::require(&mut rt, "flaky"),
        Err(RequireError::Compile { .. })
    ));
    assert!(rt.modules().loading_features().is_empty());

    fx.write("flaky.nl", &printer("fixed"));
    assert!(require::require(&mut rt, "flaky").unwrap());
    assert_eq!(rt.output(), ["fixed".to_string()]);
}

#[test]
fn test_failed_require_stays_loading_without_retry() {
    let fx = Fixture::new();
    fx.write("flaky.nl", "bogus r1\n");

    let config = LoaderConfig {
        retry_failed: false,
        ..fx.config()
    };
    let mut rt = Runtime::with_config(config).capture_output();
    assert!(require::require(&mut rt, "flaky").is_err());
    assert_eq!(rt.modules().loading_features(), [fx.canonical("flaky.nl")]);

    fx.write("flaky.nl", &printer("fixed"));
    assert!(!require::require(&mut rt, "flaky").unwrap());
    assert!(rt.output().is_empty());
    assert!(rt.modules().loaded_features().is_empty());
}

#[test]
fn test_syntax_error_leaves_no_temporary_files() {
    let fx = Fixture::new();
    fx.write("broken.nl", "int r1, 1\njmp nowhere\n");

    let mut rt = fx.runtime();
    let exc = rt
        .builtin("require")
        .map(|f| f(&mut rt, &[Value::from("broken")]))
        .unwrap()
        .unwrap_err();
    assert_eq!(exc.class, "LoadError");
    assert!(fx.scratch_files().is_empty());
}

#[test]
fn test_successful_load_leaves_no_temporary_files() {
    let fx = Fixture::new();
    fx.write("ok.nl", &printer("ok"));

    let mut rt = fx.runtime();
    require::load(&mut rt, "ok").unwrap();
    require::load(&mut rt, "ok").unwrap();
    assert!(fx.scratch_files().is_empty());
}

#[test]
fn test_raise_during_load_leaves_no_temporary_files() {
    let fx = Fixture::new();
    fx.write("raiser.nl", "str r1, \"nope\"\nraise r1\n");

    let mut rt = fx.runtime();
    assert!(matches!(
        require::require(&mut rt, "raiser"),
        Err(RequireError::Raised(_))
    ));
    assert!(fx.scratch_files().is_empty());
}

#[test]
fn test_absolute_path_bypasses_search_path() {
    let fx = Fixture::new();
    fx.write("abs.nl", &printer("abs"));
    let elsewhere = tempfile::tempdir().unwrap();
    let missing = elsewhere.path().join("abs.nl").display().to_string();

    let mut rt = fx.runtime();
    match require::load(&mut rt, &missing) {
        Err(RequireError::NotFound { name }) => assert_eq!(name, missing),
        other => panic!("expected NotFound, got {:?}", other),
    }

    let present = fx.modules.path().join("abs.nl").display().to_string();
    assert!(require::load(&mut rt, &present).unwrap());
    assert_eq!(rt.output(), ["abs".to_string()]);
}

#[test]
fn test_non_string_argument_is_type_error() {
    let fx = Fixture::new();
    let mut rt = fx.runtime();

    let exc = run_script(&mut rt, "int r1, 5\ncall r0, require, r1, 1\n").unwrap_err();
    assert_eq!(exc.class, "TypeError");
    assert_eq!(exc.message, "can't convert Integer into String");

    let exc = run_script(&mut rt, "nil r1\ncall r0, load, r1, 1\n").unwrap_err();
    assert_eq!(exc.class, "TypeError");
    assert_eq!(exc.message, "can't convert NilClass into String");
}

#[test]
fn test_missing_module_message() {
    let fx = Fixture::new();
    let mut rt = fx.runtime();

    let exc = run_script(&mut rt, "str r1, \"ghost\"\ncall r0, require, r1, 1\n").unwrap_err();
    assert_eq!(exc.class, "LoadError");
    assert_eq!(exc.message, "cannot load such file -- ghost");
}

#[test]
fn test_invalid_extension() {
    let fx = Fixture::new();
    fx.write("notes.txt", "hello");

    let mut rt = fx.runtime();
    let err = require::require(&mut rt, "notes.txt").unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Filepath '{}' is invalid extension.", fx.canonical("notes.txt"))
    );
    assert_eq!(err.into_exception().class, "LoadError");
}

#[test]
fn test_bogus_native_extension_is_runtime_error() {
    let fx = Fixture::new();
    fx.write(&format!("ext{}", require::NATIVE_EXT), "not a shared library");

    let mut rt = fx.runtime();
    let err = require::require(&mut rt, "ext").unwrap_err();
    assert!(matches!(err, RequireError::Runtime(_)));
    assert_eq!(err.into_exception().class, "RuntimeError");
}

#[cfg(target_os = "linux")]
#[test]
fn test_native_library_without_entry_point() {
    let candidates = [
        "/lib/x86_64-linux-gnu/libc.so.6",
        "/lib/aarch64-linux-gnu/libc.so.6",
        "/lib64/libc.so.6",
        "/usr/lib/libc.so.6",
    ];
    let Some(libc) = candidates.iter().map(Path::new).find(|p| p.exists()) else {
        return;
    };

    let mut rt = Runtime::new();
    let err = require::load_native(&mut rt, libc).unwrap_err();
    match err {
        RequireError::Runtime(msg) => assert!(msg.contains("nl_ext_init"), "{}", msg),
        other => panic!("expected Runtime error, got {:?}", other),
    }
}

// ============================================================================
// Execution details
// ============================================================================

#[test]
fn test_trailing_halt_returns_to_caller() {
    let fx = Fixture::new();
    fx.write("m.nl", &format!("{}halt\n", printer("m")));

    let mut rt = fx.runtime();
    let result = run_script(
        &mut rt,
        "str r1, \"m\"
         call r2, require, r1, 1
         str r3, \"after\"
         call r0, print, r3, 1
         ret r2
        ",
    );
    assert_eq!(result.unwrap(), Value::Bool(true));
    assert_eq!(rt.output(), ["m".to_string(), "after".to_string()]);
    assert!(!rt.is_halted());
}

#[test]
fn test_backtrace_names_source_file() {
    let fx = Fixture::new();
    fx.write(
        "bad.nl",
        ".def fail
    str r1, \"boom\"
    raise r1
.end
    call r0, fail
",
    );

    let mut rt = fx.runtime();
    let exc = match require::require(&mut rt, "bad") {
        Err(RequireError::Raised(exc)) => exc,
        other => panic!("expected raised exception, got {:?}", other),
    };

    let source = fx.canonical("bad.nl");
    assert_eq!(exc.class, "RuntimeError");
    assert_eq!(exc.message, "boom");
    assert_eq!(
        exc.backtrace,
        vec![
            format!("{}:3:in fail", source),
            format!("{}:5:in <main>", source)
        ]
    );
}

#[test]
fn test_exception_passes_through_require_unchanged() {
    let fx = Fixture::new();
    fx.write("inner.nl", "str r1, \"deep\"\nraise r1\n");

    let mut rt = fx.runtime();
    let exc = run_script(&mut rt, "str r1, \"inner\"\ncall r0, require, r1, 1\n").unwrap_err();
    assert_eq!(exc.class, "RuntimeError");
    assert_eq!(exc.message, "deep");
    assert_eq!(exc.backtrace.len(), 2);
    assert!(exc.backtrace[0].starts_with(&fx.canonical("inner.nl")));
    assert_eq!(exc.backtrace[1], "script.nl:2:in <main>");
}

#[test]
fn test_module_functions_are_callable_after_require() {
    let fx = Fixture::new();
    fx.write(
        "greeter.nl",
        ".def greet
    str r2, \"hello \"
    add r0, r2, r1
    ret r0
.end
",
    );

    let mut rt = fx.runtime();
    let result = run_script(
        &mut rt,
        "str r1, \"greeter\"
         call r0, require, r1, 1
         str r2, \"world\"
         call r3, greet, r2, 1
         ret r3
        ",
    );
    assert_eq!(result.unwrap(), Value::from("hello world"));
}

#[test]
fn test_precompiled_module() {
    let fx = Fixture::new();
    let units = Assembler::new()
        .assemble(&printer("compiled"), "orig.nl")
        .unwrap();
    fs::write(fx.modules.path().join("pre.nlb"), dump_to_vec(&units)).unwrap();
    fx.write("pre.nl", &printer("source"));

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "pre").unwrap());
    assert_eq!(rt.output(), ["compiled".to_string()]);
    assert_eq!(
        rt.unit(0).unwrap().filename.as_deref(),
        Some(fx.canonical("pre.nlb").as_str())
    );
}

#[test]
fn test_arena_restored_across_require() {
    let fx = Fixture::new();
    fx.write("strings.nl", "str r1, \"x\"\nstr r2, \"y\"\nadd r3, r1, r2\n");

    let mut rt = fx.runtime();
    let before = rt.arena_len();
    assert!(require::require(&mut rt, "strings").unwrap());
    assert_eq!(rt.arena_len(), before);
}

#[test]
fn test_search_path_mutation_at_runtime() {
    let fx = Fixture::new();
    let extra = tempfile::tempdir().unwrap();
    fs::write(extra.path().join("later.nl"), printer("later")).unwrap();

    let mut rt = fx.runtime();
    assert!(require::require(&mut rt, "later").is_err());

    let script = format!(
        "str r1, \"{}\"\ncall r0, add_load_path, r1, 1\nstr r1, \"later\"\ncall r0, require, r1, 1\nret r0\n",
        extra.path().display()
    );
    assert_eq!(run_script(&mut rt, &script).unwrap(), Value::Bool(true));
    assert_eq!(rt.output(), ["later".to_string()]);
}

// ============================================================================
// Recursion and compiler front-end
// ============================================================================

#[test]
fn test_self_load_recursion_raises_system_stack_error() {
    let fx = Fixture::new();
    fx.write("again.nl", "str r1, \"again\"\ncall r0, load, r1, 1\n");

    let mut rt = fx.runtime();
    let err = require::load(&mut rt, "again").unwrap_err();
    let exc = err.into_exception();
    assert_eq!(exc.class, "SystemStackError");
    assert!(exc.backtrace.len() >= nlreq::interp::MAX_CALL_DEPTH - 1);
    assert!(fx.scratch_files().is_empty());
}

/// Delegates to the assembler and records each mode it is asked for
#[derive(Default)]
struct RecordingCompiler {
    modes: Mutex<Vec<CompileMode>>,
}

impl Compiler for RecordingCompiler {
    fn compile(
        &self,
        rt: &mut Runtime,
        source: &str,
        filename: &str,
        mode: CompileMode,
    ) -> Result<usize, CompileError> {
        self.modes.lock().push(mode);
        Assembler::new().compile(rt, source, filename, mode)
    }
}

#[test]
fn test_source_modules_compile_declare_only() {
    let fx = Fixture::new();
    fx.write("a.nl", &printer("a"));

    let compiler = Arc::new(RecordingCompiler::default());
    let mut rt = fx.runtime().with_compiler(compiler.clone());
    assert!(require::require(&mut rt, "a").unwrap());

    assert_eq!(*compiler.modes.lock(), [CompileMode::DeclareOnly]);
    assert_eq!(rt.output(), ["a".to_string()]);
}
