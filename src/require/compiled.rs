//! Compiled unit loader

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::info;

use super::error::RequireError;
use crate::interp::{self, Proc};
use crate::runtime::Runtime;

/// Read the units in `path` into `rt` and run the root unit.
///
/// Every unit read is attributed to `attribution`, which is what backtraces
/// report. A trailing `halt` in the root unit is rewritten to a nil return
/// so the module hands control back to its caller.
pub fn load_compiled(rt: &mut Runtime, path: &Path, attribution: &str) -> Result<(), RequireError> {
    let file = File::open(path).map_err(|e| RequireError::load(path.display().to_string(), e))?;
    let mut reader = BufReader::new(file);

    let checkpoint = rt.arena_save();
    let result = rt.read_units(&mut reader);
    rt.arena_restore(checkpoint);

    let root = match result {
        Ok(root) => root,
        Err(err) => {
            if let Some(exc) = rt.take_exception() {
                return Err(RequireError::Raised(exc));
            }
            return Err(RequireError::load(path.display().to_string(), err));
        }
    };

    for unit in rt.units_from_mut(root) {
        unit.filename = Some(attribution.to_string());
    }
    if let Some(unit) = rt.unit_mut(root) {
        unit.finalize_for_invocation();
    }

    let units = rt.unit_count() - root;
    let receiver = rt.top_self();
    let checkpoint = rt.arena_save();
    let result = interp::invoke(rt, &Proc::top_level(root), &[], receiver);
    rt.arena_restore(checkpoint);
    result.map_err(RequireError::Raised)?;

    info!(path = %path.display(), attribution, units, "loaded");
    Ok(())
}
