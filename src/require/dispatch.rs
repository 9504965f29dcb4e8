//! Extension dispatch

use std::path::Path;

use tracing::debug;

use super::compiled::load_compiled;
use super::error::RequireError;
use super::native::load_native;
use super::resolver::{ResolvedPath, COMPILED_EXT, NATIVE_EXT, SOURCE_EXT};
use super::source::compile_and_load;
use crate::runtime::Runtime;

/// Loader selected by a file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Compiled,
    Source,
    Native,
}

impl ModuleKind {
    pub fn from_path(path: &Path) -> Result<Self, RequireError> {
        let invalid = |reason| RequireError::InvalidExtension {
            path: path.display().to_string(),
            reason,
        };

        let ext = path.extension().ok_or_else(|| invalid("invalid"))?;
        match format!(".{}", ext.to_string_lossy()).as_str() {
            COMPILED_EXT => Ok(ModuleKind::Compiled),
            SOURCE_EXT => Ok(ModuleKind::Source),
            NATIVE_EXT => Ok(ModuleKind::Native),
            _ => Err(invalid("invalid extension")),
        }
    }
}

/// Hand `path` to the loader for its extension
pub fn dispatch(rt: &mut Runtime, path: &ResolvedPath) -> Result<(), RequireError> {
    let kind = ModuleKind::from_path(path.as_path())?;
    debug!(path = %path, ?kind, "dispatching");

    match kind {
        ModuleKind::Compiled => load_compiled(rt, path.as_path(), &path.to_string()),
        ModuleKind::Source => compile_and_load(rt, path.as_path()),
        ModuleKind::Native => load_native(rt, path.as_path()),
    }
}
