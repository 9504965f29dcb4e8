//! Module name resolution
//!
//! Maps a requested name to an existing file by walking the search path and
//! trying each recognized extension in turn.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::RequireError;
use super::search_path::SearchPath;

/// Precompiled bytecode
pub const COMPILED_EXT: &str = ".nlb";

/// Source compiled on load
pub const SOURCE_EXT: &str = ".nl";

/// Native extension library
#[cfg(windows)]
pub const NATIVE_EXT: &str = ".dll";
#[cfg(target_vendor = "apple")]
pub const NATIVE_EXT: &str = ".dyn";
#[cfg(not(any(windows, target_vendor = "apple")))]
pub const NATIVE_EXT: &str = ".so";

const ALL_EXTENSIONS: [&str; 3] = [COMPILED_EXT, SOURCE_EXT, NATIVE_EXT];
const AS_GIVEN: [&str; 1] = [""];

/// Extensions tried for `name`, in order.
///
/// A name whose final component already carries an extension is tried as
/// given.
pub fn candidate_extensions(name: &str) -> &'static [&'static str] {
    if Path::new(name).extension().is_some() {
        &AS_GIVEN
    } else {
        &ALL_EXTENSIONS
    }
}

/// A path that named a readable file when it was resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Ledger key
    pub fn key(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolve `name` against `search_path`.
///
/// Absolute names are probed as-is. Names starting with `.` are looked up in
/// the working directory only. Anything else is tried in every search
/// directory, exhausting all candidate extensions in one directory before
/// moving on to the next. Candidates are canonicalized before probing, so
/// two spellings of the same file resolve to the same path.
pub fn resolve(search_path: &SearchPath, name: &str) -> Result<ResolvedPath, RequireError> {
    let not_found = || RequireError::NotFound {
        name: name.to_string(),
    };

    if name.starts_with(std::path::is_separator) {
        let path = Path::new(name);
        debug!(path = %path.display(), "probing absolute path");
        return if probe(path) {
            Ok(ResolvedPath(path.to_path_buf()))
        } else {
            Err(not_found())
        };
    }

    let dirs: Vec<&str> = if name.starts_with('.') {
        vec!["."]
    } else {
        search_path.iter().collect()
    };

    for dir in dirs {
        for ext in candidate_extensions(name) {
            let candidate = format!("{}/{}{}", dir, name, ext);
            debug!(%candidate, "trying");

            let Ok(real) = fs::canonicalize(&candidate) else {
                continue;
            };
            if probe(&real) {
                debug!(module = name, path = %real.display(), "resolved");
                return Ok(ResolvedPath(real));
            }
        }
    }

    Err(not_found())
}

/// Open for reading, then close
fn probe(path: &Path) -> bool {
    File::open(path)
        .and_then(|file| file.metadata())
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
