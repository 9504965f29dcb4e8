//! Source loader
//!
//! Compiles a source file in a scratch runtime, dumps the result to a
//! temporary bytecode file, and loads that file like any other compiled
//! unit while attributing it to the source path.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::compiled::load_compiled;
use super::error::RequireError;
use crate::config::LoaderConfig;
use crate::ir::{dump_units, CompileMode};
use crate::runtime::Runtime;

/// Per-process counter that keeps concurrent artifacts apart
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const MAX_ATTEMPTS: usize = 16;

/// A uniquely named file that is removed when dropped
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
}

impl TemporaryArtifact {
    /// Create `<temp_dir>/<prefix><pid>.<seq>` for writing
    pub fn create(config: &LoaderConfig) -> io::Result<(Self, File)> {
        let dir = config.temp_dir();
        let pid = std::process::id();

        for _ in 0..MAX_ATTEMPTS {
            let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
            let path = dir.join(format!("{}{}.{}", config.temp_prefix, pid, seq));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((Self { path }, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free temporary file name in {}", dir.display()),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove temporary artifact");
            }
        }
    }
}

/// Compile `source_path` and load the result into `rt`.
pub fn compile_and_load(rt: &mut Runtime, source_path: &Path) -> Result<(), RequireError> {
    let source_name = source_path.display().to_string();
    let source =
        fs::read_to_string(source_path).map_err(|e| RequireError::load(source_name.as_str(), e))?;

    let (artifact, file) = TemporaryArtifact::create(rt.modules().config())
        .map_err(|e| RequireError::load(source_name.as_str(), e))?;
    debug!(source = %source_name, artifact = %artifact.path().display(), "compiling");

    {
        let mut scratch = rt.isolated();
        let compiler = scratch.compiler();
        let start = scratch.unit_count();
        compiler
            .compile(&mut scratch, &source, &source_name, CompileMode::DeclareOnly)
            .map_err(|e| RequireError::Compile {
                path: source_name.clone(),
                message: e.to_string(),
            })?;

        let mut writer = BufWriter::new(file);
        dump_units(&scratch.units()[start..], &mut writer)
            .and_then(|()| writer.flush())
            .map_err(|e| RequireError::load(source_name.as_str(), e))?;
    }

    load_compiled(rt, artifact.path(), &source_name)
}
