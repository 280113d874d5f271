use super::locate::locate_plugin_binary;
use libloading::Library;
use lumen_abi::ffi::{LUMEN_ABI_VERSION, PLUGIN_ENTRY_SYMBOL, PluginApi, PluginEntryFn};
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

pub(crate) struct LoadedPlugin {
    #[allow(dead_code)]
    _lib: Library,
    pub(crate) api: &'static PluginApi,
    pub(crate) path: PathBuf,
}

// The vtable is immutable static data owned by the library, which lives as long as the process.
unsafe impl Send for LoadedPlugin {}
unsafe impl Sync for LoadedPlugin {}

static PLUGIN: OnceLock<Result<LoadedPlugin, String>> = OnceLock::new();

/// Open the backend plugin once per process. Later calls return the first outcome,
/// whatever path they pass.
pub fn load_plugin_once(explicit: Option<&Path>) -> Result<&'static LoadedPlugin, String> {
    PLUGIN
        .get_or_init(|| {
            let path = locate_plugin_binary(explicit).ok_or_else(|| {
                "backend plugin not found; pass --plugin or set LUMEN_PLUGIN".to_string()
            })?;
            let lib = unsafe { Library::new(&path) }
                .map_err(|e| format!("failed to open plugin {}: {e}", path.display()))?;
            init_loaded(lib, path)
        })
        .as_ref()
        .map_err(|e| e.clone())
}

/// The plugin opened by `load_plugin_once`, if any.
pub(crate) fn loaded_plugin() -> Result<&'static LoadedPlugin, String> {
    match PLUGIN.get() {
        Some(Ok(p)) => Ok(p),
        Some(Err(e)) => Err(e.clone()),
        None => Err("no backend plugin loaded".into()),
    }
}

fn init_loaded(lib: Library, path: PathBuf) -> Result<LoadedPlugin, String> {
    let entry: libloading::Symbol<PluginEntryFn> = unsafe {
        lib.get(PLUGIN_ENTRY_SYMBOL.as_bytes())
            .map_err(|e| format!("missing symbol {}: {e}", PLUGIN_ENTRY_SYMBOL))?
    };

    let api_ptr = unsafe { entry() };
    if api_ptr.is_null() {
        return Err("plugin entry returned null".into());
    }

    let api = unsafe { &*api_ptr };
    if api.info.abi_version != LUMEN_ABI_VERSION {
        return Err(format!(
            "ABI mismatch: host={} plugin={}",
            LUMEN_ABI_VERSION, api.info.abi_version
        ));
    }

    let id = unsafe { c_label(api.info.id) };
    let semver = unsafe { c_label(api.info.semver) };
    info!(plugin = %id, version = %semver, path = %path.display(), "backend plugin loaded");

    Ok(LoadedPlugin {
        _lib: lib,
        api,
        path,
    })
}

unsafe fn c_label(ptr: *const core::ffi::c_char) -> String {
    if ptr.is_null() {
        return "unknown".into();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
