use std::path::{Path, PathBuf};

use lumen_hwprof::plugins_dir;
use tracing::{debug, warn};

/// Platform file name of the default backend plugin.
pub(crate) fn default_plugin_filename() -> String {
    format!(
        "{}lumen_backend{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Explicit path (flag or `LUMEN_PLUGIN`) first, then the plugins directory.
pub(crate) fn locate_plugin_binary(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            debug!(path = %p.display(), "using requested plugin");
            return Some(p.to_path_buf());
        }
        warn!(path = %p.display(), "requested plugin does not exist");
        return None;
    }

    let p = plugins_dir().join(default_plugin_filename());
    if p.exists() {
        debug!(path = %p.display(), "using plugin from plugins dir");
        Some(p)
    } else {
        None
    }
}
