use core::ffi::c_void;
use std::ffi::CString;
use std::slice;

use crate::plugin::loader::{LoadedPlugin, loaded_plugin};
use lumen_abi::{
    BackendCapabilities, BackendError, EvalRequest, InferenceBackend, LoadParams, Logits,
    ModelCoreInfo, RuntimeConfig, Token, ffi::*,
};
use tracing::{debug, warn};

/// `InferenceBackend` over a session created by the loaded plugin's vtable.
pub struct PluginBackend {
    plugin: &'static LoadedPlugin,
    session: *mut c_void,
    eos: Token,
    info: ModelCoreInfo,
}

impl Drop for PluginBackend {
    fn drop(&mut self) {
        if !self.session.is_null() {
            unsafe { (self.plugin.api.llm.destroy_session)(self.session) };
            self.session = std::ptr::null_mut();
        }
    }
}

// SAFETY: the raw session pointer is only touched through `&mut self` or under the
// engine's per-session lock, never from two threads at once.
unsafe impl Send for PluginBackend {}

fn make_cstring(s: &str) -> Result<CString, BackendError> {
    CString::new(s).map_err(|_| BackendError::from("string contains interior NUL"))
}

/// Copy a plugin-owned buffer out byte for byte and hand it back to the plugin.
unsafe fn take_plugin_bytes(api_free: FreeStringFn, s: LumenString) -> Vec<u8> {
    if s.ptr.is_null() {
        return Vec::new();
    }
    let out = if s.len == 0 {
        Vec::new()
    } else {
        unsafe { slice::from_raw_parts(s.ptr as *const u8, s.len) }.to_vec()
    };
    unsafe { api_free(s) };
    out
}

unsafe fn take_plugin_string(api_free: FreeStringFn, s: LumenString) -> String {
    let bytes = unsafe { take_plugin_bytes(api_free, s) };
    String::from_utf8_lossy(&bytes).into_owned()
}

impl PluginBackend {
    fn last_error(&self, fallback: &str) -> BackendError {
        let msg = unsafe {
            let s = (self.plugin.api.llm.last_error)();
            take_plugin_string(self.plugin.api.llm.free_string, s)
        };
        BackendError(if msg.is_empty() { fallback.to_string() } else { msg })
    }

    fn take_floats(&self, arr: FloatArray, fallback: &str) -> Result<Vec<f32>, BackendError> {
        if arr.ptr.is_null() {
            return Err(self.last_error(fallback));
        }
        let v = unsafe { slice::from_raw_parts(arr.ptr, arr.len) }.to_vec();
        unsafe { (self.plugin.api.llm.free_floats)(arr) };
        Ok(v)
    }
}

impl InferenceBackend for PluginBackend {
    fn load(params: &LoadParams) -> Result<Self, BackendError> {
        let plugin = loaded_plugin().map_err(BackendError)?;
        let path = params
            .model_path
            .to_str()
            .ok_or_else(|| BackendError::from("model path not valid UTF-8"))?;
        let cpath = make_cstring(path)?;
        let cquant = make_cstring(&params.quantization)?;

        let raw = SessionParams {
            model_path: cpath.as_ptr(),
            quantization: cquant.as_ptr(),
            context_size: u32::try_from(params.context_size)
                .map_err(|_| BackendError::from("context size exceeds u32"))?,
            thread_count: params.thread_count.min(u32::MAX as usize) as u32,
        };
        let session = unsafe { (plugin.api.llm.create_session)(&raw) };
        if session.is_null() {
            let msg = unsafe {
                let s = (plugin.api.llm.last_error)();
                take_plugin_string(plugin.api.llm.free_string, s)
            };
            return Err(BackendError(if msg.is_empty() {
                "create_session failed".into()
            } else {
                msg
            }));
        }

        let meta_json = unsafe {
            let s = (plugin.api.llm.collect_json)(session);
            take_plugin_string(plugin.api.llm.free_string, s)
        };
        let mut info = if meta_json.is_empty() {
            ModelCoreInfo::default()
        } else {
            serde_json::from_str::<ModelCoreInfo>(&meta_json).unwrap_or_else(|e| {
                warn!("malformed model metadata from plugin: {e}");
                ModelCoreInfo::default()
            })
        };
        if info.path.as_os_str().is_empty() {
            info.path = params.model_path.clone();
        }

        let eos = Token(unsafe { (plugin.api.llm.eos_token)(session) });
        debug!(plugin = %plugin.path.display(), eos = eos.0, "plugin session created");

        Ok(Self {
            plugin,
            session,
            eos,
            info,
        })
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError> {
        let ctext = make_cstring(text)?;
        let arr = unsafe { (self.plugin.api.llm.tokenize_utf8)(self.session, ctext.as_ptr()) };
        if arr.ptr.is_null() {
            return Err(self.last_error("tokenize failed"));
        }
        let out = unsafe { slice::from_raw_parts(arr.ptr, arr.len) }
            .iter()
            .map(|&id| Token(id))
            .collect();
        unsafe { (self.plugin.api.llm.free_ints)(arr) };
        Ok(out)
    }

    fn evaluate(&mut self, req: &EvalRequest<'_>) -> Result<Logits, BackendError> {
        let (history_tokens, history_positions): (Vec<i32>, Vec<u64>) =
            req.history.iter().map(|e| (e.token.0, e.position)).unzip();
        let (pending_tokens, pending_positions): (Vec<i32>, Vec<u64>) =
            req.pending.iter().map(|e| (e.token.0, e.position)).unzip();

        let params = EvalParams {
            history_tokens: history_tokens.as_ptr(),
            history_positions: history_positions.as_ptr(),
            history_len: history_tokens.len(),
            pending_tokens: pending_tokens.as_ptr(),
            pending_positions: pending_positions.as_ptr(),
            pending_len: pending_tokens.len(),
            sparse_attention: req.sparse_attention,
        };
        let arr = unsafe { (self.plugin.api.llm.evaluate)(self.session, &params) };
        self.take_floats(arr, "evaluate failed").map(Logits)
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, BackendError> {
        let ctext = make_cstring(text)?;
        let arr = unsafe { (self.plugin.api.llm.embed_utf8)(self.session, ctext.as_ptr()) };
        self.take_floats(arr, "embed failed")
    }

    fn decode_token(&self, token: Token) -> Result<String, BackendError> {
        let s = unsafe { (self.plugin.api.llm.decode_token)(self.session, token.0) };
        let out = unsafe { take_plugin_string(self.plugin.api.llm.free_string, s) };
        if out.is_empty() {
            let err = self.last_error("");
            if !err.0.is_empty() {
                return Err(err);
            }
        }
        Ok(out)
    }

    fn eos_token(&self) -> Token {
        self.eos
    }

    fn model_info(&self) -> ModelCoreInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> BackendCapabilities {
        let bits = unsafe { (self.plugin.api.llm.capabilities)(self.session) };
        BackendCapabilities {
            sparse_attention: bits & CAP_SPARSE_ATTENTION != 0,
            embeddings: bits & CAP_EMBEDDINGS != 0,
        }
    }

    fn configure(&mut self, cfg: RuntimeConfig) -> Result<(), BackendError> {
        let threads = cfg.threads.min(u32::MAX as usize) as u32;
        let batch = cfg.batch_size.min(u32::MAX as usize) as u32;
        let rc = unsafe { (self.plugin.api.llm.configure)(self.session, threads, batch) };
        if rc == ERR_OK {
            Ok(())
        } else {
            Err(self.last_error("configure failed"))
        }
    }

    fn reset(&mut self) {
        unsafe { (self.plugin.api.llm.reset)(self.session) };
    }

    fn memory_usage_bytes(&self) -> Option<u64> {
        let n = unsafe { (self.plugin.api.llm.memory_usage)(self.session) };
        u64::try_from(n).ok()
    }

    fn detokenize(&self, tokens: &[Token]) -> Result<Vec<u8>, BackendError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i32> = tokens.iter().map(|t| t.0).collect();
        let s = unsafe { (self.plugin.api.llm.detokenize_utf8)(self.session, ids.as_ptr(), ids.len()) };
        if s.ptr.is_null() {
            return Err(self.last_error("detokenize failed"));
        }
        // Byte-fallback tokens may end mid code point; the engine reassembles them.
        Ok(unsafe { take_plugin_bytes(self.plugin.api.llm.free_string, s) })
    }
}
