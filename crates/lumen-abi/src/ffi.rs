use core::ffi::{c_char, c_void};

/// Bump this when you break the ABI. Host checks it at load time.
pub const LUMEN_ABI_VERSION: u32 = 1;

pub const PLUGIN_ENTRY_SYMBOL: &str = "lumen_plugin_entry_v1";

pub const ERR_OK: i32 = 0;
pub const ERR_FAIL: i32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LumenString {
    pub ptr: *mut c_char,
    pub len: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Int32Array {
    pub ptr: *mut i32,
    pub len: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FloatArray {
    pub ptr: *mut f32,
    pub len: usize,
}

#[repr(C)]
pub struct PluginInfo {
    pub abi_version: u32,
    pub id: *const c_char,     // "llama"
    pub semver: *const c_char, // "0.1.0"
}

/// Flattened `LoadParams`.
#[repr(C)]
pub struct SessionParams {
    pub model_path: *const c_char,
    pub quantization: *const c_char,
    pub context_size: u32,
    pub thread_count: u32,
}

/// Flattened `EvalRequest`. Positions are absolute; `history_positions` has
/// `history_len` elements, `pending_positions` has `pending_len`.
#[repr(C)]
pub struct EvalParams {
    pub history_tokens: *const i32,
    pub history_positions: *const u64,
    pub history_len: usize,
    pub pending_tokens: *const i32,
    pub pending_positions: *const u64,
    pub pending_len: usize,
    pub sparse_attention: bool,
}

// ---------- Function pointer types (C ABI) ----------

pub type CollectJsonFn = unsafe extern "C" fn(session: *mut c_void) -> LumenString;
pub type FreeStringFn = unsafe extern "C" fn(s: LumenString);

pub type CreateSessionFn = unsafe extern "C" fn(params: *const SessionParams) -> *mut c_void;
pub type DestroySessionFn = unsafe extern "C" fn(session: *mut c_void);

pub type TokenizeUtf8Fn =
    unsafe extern "C" fn(session: *mut c_void, text: *const c_char) -> Int32Array;
pub type FreeIntsFn = unsafe extern "C" fn(arr: Int32Array);

/// Returns logits (len == vocab) or a null array on failure (see `last_error`).
pub type EvaluateFn =
    unsafe extern "C" fn(session: *mut c_void, params: *const EvalParams) -> FloatArray;
pub type EmbedUtf8Fn = unsafe extern "C" fn(session: *mut c_void, text: *const c_char) -> FloatArray;
pub type FreeFloatsFn = unsafe extern "C" fn(arr: FloatArray);

pub type DecodeTokenFn = unsafe extern "C" fn(session: *mut c_void, token_id: i32) -> LumenString;
pub type DetokenizeUtf8Fn =
    unsafe extern "C" fn(session: *mut c_void, tokens: *const i32, len: usize) -> LumenString;
pub type EosTokenFn = unsafe extern "C" fn(session: *mut c_void) -> i32;

pub type LastErrorFn = unsafe extern "C" fn() -> LumenString;

pub type ConfigureFn =
    unsafe extern "C" fn(session: *mut c_void, threads: u32, batch_size: u32) -> i32;
pub type ResetFn = unsafe extern "C" fn(session: *mut c_void);
pub type MemoryUsageFn = unsafe extern "C" fn(session: *mut c_void) -> i64; // -1 if unknown
/// Bit 0: sparse attention, bit 1: embeddings.
pub type CapabilitiesFn = unsafe extern "C" fn(session: *mut c_void) -> u32;

pub const CAP_SPARSE_ATTENTION: u32 = 1 << 0;
pub const CAP_EMBEDDINGS: u32 = 1 << 1;

// ---------- VTables ----------

#[repr(C)]
pub struct LlmApi {
    pub create_session: CreateSessionFn,
    pub destroy_session: DestroySessionFn,

    /// JSON for `lumen_abi::metadata::ModelCoreInfo`.
    pub collect_json: CollectJsonFn,

    pub tokenize_utf8: TokenizeUtf8Fn,
    pub free_ints: FreeIntsFn,

    pub evaluate: EvaluateFn,
    pub embed_utf8: EmbedUtf8Fn,
    pub free_floats: FreeFloatsFn,

    pub decode_token: DecodeTokenFn,
    pub detokenize_utf8: DetokenizeUtf8Fn,
    pub eos_token: EosTokenFn,

    // Diagnostics & memory management
    pub last_error: LastErrorFn,
    pub free_string: FreeStringFn,

    // Runtime control
    pub configure: ConfigureFn,
    pub reset: ResetFn,
    pub memory_usage: MemoryUsageFn,
    pub capabilities: CapabilitiesFn,
}

#[repr(C)]
pub struct PluginApi {
    pub info: PluginInfo,
    pub llm: LlmApi,
}

/// Plugin must export `lumen_plugin_entry_v1` returning a pointer to a static `PluginApi`.
pub type PluginEntryFn = unsafe extern "C" fn() -> *const PluginApi;
