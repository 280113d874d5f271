use lumen_abi::{EvalRequest, InferenceBackend, Logits, Token};
use tracing::{debug, trace};

use super::Pipeline;
use crate::error::{EngineError, Result};
use crate::session::SessionState;

impl<B: InferenceBackend> Pipeline<'_, B> {
    /// Evaluate `tokens` against the committed history and commit them once the
    /// backend accepted the batch. The history handed to the backend already
    /// excludes whatever the commit is about to evict.
    pub(super) fn evaluate_and_commit(
        &mut self,
        st: &mut SessionState<B>,
        tokens: &[Token],
    ) -> Result<Logits> {
        self.sync_runtime(&mut st.backend)?;

        let pending = st.kv.stage(tokens);
        let skip = st.kv.evictions_for(pending.len());
        let req = EvalRequest {
            history: st.kv.view().skip(skip),
            pending: &pending,
            sparse_attention: self.sparse,
        };
        let logits = st
            .backend
            .evaluate(&req)
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let evicted = st.kv.commit(&pending);
        if evicted > 0 {
            trace!(evicted, len = st.kv.len(), "cache window slid");
        }
        if let Some(bytes) = st.backend.memory_usage_bytes() {
            self.slot.controller.metrics().observe_memory(bytes);
        }
        Ok(logits)
    }

    /// Feed the prompt in chunks bounded by the configured prefill size, the
    /// current batch size and the cache capacity. Cancellation is honoured
    /// between chunks. Returns the logits following the last prompt token.
    pub(super) fn prefill(&mut self, prompt: &[Token]) -> Result<Logits> {
        let slot = self.slot;
        let mut offset = 0usize;
        let mut last: Option<Logits> = None;

        for chunk_idx in 0usize.. {
            if offset >= prompt.len() {
                break;
            }
            self.check_cancel()?;

            let batch = slot.controller.runtime().batch_size;
            let chunk_len = self
                .config
                .prefill_chunk
                .min(batch)
                .min(slot.info.context_size)
                .max(1);
            let end = (offset + chunk_len).min(prompt.len());
            let chunk = &prompt[offset..end];

            trace!(chunk = chunk_idx, len = chunk.len(), offset, "prefill chunk");
            let logits = slot
                .with_state(|st| self.evaluate_and_commit(st, chunk))
                .map_err(|e| match e {
                    EngineError::Generation(msg) => {
                        EngineError::Generation(format!("prefill chunk {chunk_idx}: {msg}"))
                    }
                    other => other,
                })?;
            last = Some(logits);
            offset = end;
        }

        debug!(tokens = prompt.len(), "prefill done");
        last.ok_or_else(|| EngineError::Generation("prompt produced no tokens".into()))
    }
}
