//! Native extension loader
//!
//! Opens a shared library, looks up its entry point and hands it the
//! runtime. Libraries stay mapped for the rest of the process.

use std::path::Path;

use libloading::{Library, Symbol};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use super::error::RequireError;
use crate::runtime::Runtime;

/// Entry point every native extension exports
pub type NativeEntry = unsafe extern "C" fn(*mut Runtime);

/// Libraries opened so far; never unloaded
static LIBRARIES: Lazy<Mutex<Vec<Library>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Load the extension at `path` and call its entry point with `rt`.
pub fn load_native(rt: &mut Runtime, path: &Path) -> Result<(), RequireError> {
    let library = open_library(path).map_err(|e| RequireError::Runtime(e.to_string()))?;
    let symbol_name = rt.modules().config().native_entry_symbol.clone();

    // Safety: the symbol is trusted to have the `NativeEntry` signature. The
    // copied function pointer stays valid because the library is never
    // unloaded.
    let entry: NativeEntry = unsafe {
        let symbol: Symbol<NativeEntry> = library
            .get(symbol_name.as_bytes())
            .map_err(|e| RequireError::Runtime(e.to_string()))?;
        *symbol
    };

    LIBRARIES.lock().push(library);

    unsafe { entry(rt as *mut Runtime) };

    info!(path = %path.display(), symbol = %symbol_name, "native extension initialized");
    Ok(())
}

/// Number of libraries kept mapped by this process
pub fn retained_libraries() -> usize {
    LIBRARIES.lock().len()
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LAZY};

    // Safety: running the library's initializers is the point of loading it.
    unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}
