#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use lumen_core::abi::{
    BackendCapabilities, BackendError, EvalRequest, InferenceBackend, LoadParams, Logits,
    ModelCoreInfo, RuntimeConfig, Token,
};
use lumen_core::{CancelToken, EngineConfig, LoadOptions, SessionHandle, SessionManager};
use parking_lot::Mutex;

pub const VOCAB: usize = 32;
pub const EOS: Token = Token(0);

/// Knobs and counters shared between a test and every backend it loads.
#[derive(Default)]
pub struct MockControl {
    pub eos_immediately: AtomicBool,
    pub eval_delay: Mutex<Duration>,
    /// 1-based evaluate call that fails.
    pub fail_at_eval: Mutex<Option<usize>>,
    /// 1-based evaluate call during which the token is cancelled (the call itself succeeds).
    pub cancel_at_eval: Mutex<Option<(usize, CancelToken)>>,
    pub evals: AtomicUsize,
    pub max_window: AtomicUsize,
    pub configs: Mutex<Vec<RuntimeConfig>>,
    pub sparse_flags: Mutex<Vec<bool>>,
    pub loads: Mutex<Vec<LoadParams>>,
    pub embeds: AtomicUsize,
    pub live: AtomicUsize,
    /// When set, each `detokenize` call returns the next chunk verbatim (empty once drained).
    pub byte_script: Mutex<Option<VecDeque<Vec<u8>>>>,
}

impl MockControl {
    pub fn set_delay(&self, d: Duration) {
        *self.eval_delay.lock() = d;
    }

    pub fn cancel_during_eval(&self, n: usize, token: CancelToken) {
        *self.cancel_at_eval.lock() = Some((n, token));
    }

    pub fn fail_during_eval(&self, n: usize) {
        *self.fail_at_eval.lock() = Some(n);
    }

    /// Make the backend emit raw bytes per token, valid UTF-8 or not.
    pub fn script_bytes(&self, chunks: &[&[u8]]) {
        *self.byte_script.lock() = Some(chunks.iter().map(|c| c.to_vec()).collect());
    }
}

/// Deterministic stand-in for a numerical backend: one token per whitespace
/// word, logits derived from the visible window only.
pub struct MockBackend {
    ctl: Arc<MockControl>,
    context_size: usize,
    threads: usize,
    path: std::path::PathBuf,
}

impl MockBackend {
    pub fn with_control(params: &LoadParams, ctl: Arc<MockControl>) -> Result<Self, BackendError> {
        if params.model_path.to_string_lossy().contains("missing") {
            return Err(BackendError::from("no such model file"));
        }
        ctl.loads.lock().push(params.clone());
        ctl.live.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            ctl,
            context_size: params.context_size,
            threads: 8,
            path: params.model_path.clone(),
        })
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.ctl.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn word_token(word: &str) -> Token {
    let h = word
        .bytes()
        .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    Token(1 + (h % (VOCAB as u32 - 1)) as i32)
}

impl InferenceBackend for MockBackend {
    fn load(params: &LoadParams) -> Result<Self, BackendError> {
        Self::with_control(params, Arc::new(MockControl::default()))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError> {
        Ok(text.split_whitespace().map(word_token).collect())
    }

    fn evaluate(&mut self, req: &EvalRequest<'_>) -> Result<Logits, BackendError> {
        let n = self.ctl.evals.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.ctl.eval_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay * 8 / self.threads.max(1) as u32);
        }

        if *self.ctl.fail_at_eval.lock() == Some(n) {
            return Err(BackendError::from("device lost"));
        }
        if let Some((at, token)) = self.ctl.cancel_at_eval.lock().as_ref() {
            if *at == n {
                token.cancel();
            }
        }

        let window = req.history.len() + req.pending.len();
        if window > self.context_size {
            return Err(BackendError(format!(
                "window {window} exceeds context {}",
                self.context_size
            )));
        }
        self.ctl.max_window.fetch_max(window, Ordering::SeqCst);
        self.ctl.sparse_flags.lock().push(req.sparse_attention);

        let mut logits = vec![0.0f32; VOCAB];
        if self.ctl.eos_immediately.load(Ordering::SeqCst) {
            logits[EOS.0 as usize] = 10.0;
            return Ok(Logits(logits));
        }
        let mix = req
            .history
            .iter()
            .chain(req.pending.iter())
            .enumerate()
            .fold(0u64, |acc, (i, e)| {
                acc.wrapping_mul(131)
                    .wrapping_add(e.token.0 as u64 * (i as u64 + 3))
            });
        let next = 1 + (mix % (VOCAB as u64 - 1)) as usize;
        for (i, l) in logits.iter_mut().enumerate() {
            *l = -((i as f32 - next as f32).abs());
        }
        logits[EOS.0 as usize] = -100.0;
        logits[next] = 5.0;
        Ok(Logits(logits))
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, BackendError> {
        if text.is_empty() {
            return Err(BackendError::from("empty input"));
        }
        self.ctl.embeds.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += b as f32 / 255.0;
        }
        Ok(v)
    }

    fn decode_token(&self, token: Token) -> Result<String, BackendError> {
        if token == EOS {
            return Ok(String::new());
        }
        Ok(format!(" w{}", token.0))
    }

    fn eos_token(&self) -> Token {
        EOS
    }

    fn model_info(&self) -> ModelCoreInfo {
        ModelCoreInfo {
            name: Some("mock".into()),
            backend: "mock".into(),
            path: self.path.clone(),
            context_length: Some(self.context_size as u32),
            vocab_size: Some(VOCAB as u32),
            eos_token_id: Some(EOS.0),
            ..ModelCoreInfo::default()
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            sparse_attention: true,
            embeddings: true,
        }
    }

    fn configure(&mut self, cfg: RuntimeConfig) -> Result<(), BackendError> {
        self.threads = cfg.threads.max(1);
        self.ctl.configs.lock().push(cfg);
        Ok(())
    }

    fn memory_usage_bytes(&self) -> Option<u64> {
        Some(1 << 20)
    }

    fn detokenize(&self, tokens: &[Token]) -> Result<Vec<u8>, BackendError> {
        if let Some(script) = self.ctl.byte_script.lock().as_mut() {
            return Ok(script.pop_front().unwrap_or_default());
        }
        let mut out = Vec::new();
        for t in tokens {
            out.extend_from_slice(self.decode_token(*t)?.as_bytes());
        }
        Ok(out)
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_threads: Some(8),
        default_thread_count: Some(4),
        ..EngineConfig::default()
    }
}

pub fn manager_with(config: EngineConfig) -> (Arc<SessionManager<MockBackend>>, Arc<MockControl>) {
    let ctl = Arc::new(MockControl::default());
    let loader_ctl = ctl.clone();
    let mgr = SessionManager::with_loader(config, move |params| {
        MockBackend::with_control(params, loader_ctl.clone())
    });
    (Arc::new(mgr), ctl)
}

pub fn manager() -> (Arc<SessionManager<MockBackend>>, Arc<MockControl>) {
    manager_with(test_config())
}

pub fn load(mgr: &SessionManager<MockBackend>, context_size: usize) -> SessionHandle {
    mgr.load_model(LoadOptions::new("/models/mock-f16.gguf").context_size(context_size))
        .expect("mock load")
        .handle
}

/// Prompt of `n` distinct words.
pub fn words(n: usize) -> String {
    (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
}

/// Spin until `cond` holds or two seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
