use std::time::{Duration, Instant};

use lumen_abi::InferenceBackend;
use tracing::{debug, info, trace, warn};

use super::utils::{decode_utf8_into, first_stop_hit, floor_char_boundary};
use super::{FinishReason, Generation, Pipeline, RequestState};
use crate::error::{EngineError, Result};

/// Accumulates decoded bytes into text and releases it to the caller while
/// holding back enough of the tail that a stop string is never streamed.
struct TextStream {
    staging: Vec<u8>,
    text: String,
    sent: usize,
    hold: usize,
}

impl TextStream {
    fn new(stops: &[String]) -> Self {
        let longest = stops.iter().map(|s| s.len()).max().unwrap_or(0);
        Self {
            staging: Vec::with_capacity(64),
            text: String::new(),
            sent: 0,
            hold: longest.saturating_sub(1),
        }
    }

    /// Append raw bytes. Complete sequences become text (invalid ones as U+FFFD);
    /// only a trailing partial code point waits for more bytes.
    fn push(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
        let used = decode_utf8_into(&self.staging, &mut self.text);
        self.staging.drain(..used);
    }

    /// Truncate at the first stop hit not yet streamed. Returns true on a hit.
    fn cut_at_stop(&mut self, stops: &[String]) -> bool {
        if stops.is_empty() {
            return false;
        }
        match first_stop_hit(&self.text[self.sent..], stops) {
            Some((i, _)) => {
                self.text.truncate(self.sent + i);
                self.staging.clear();
                true
            }
            None => false,
        }
    }

    fn flush_safe<F: FnMut(&str)>(&mut self, on_delta: &mut F) {
        let safe = floor_char_boundary(&self.text, self.text.len().saturating_sub(self.hold));
        if safe > self.sent {
            on_delta(&self.text[self.sent..safe]);
            self.sent = safe;
        }
    }

    fn finish<F: FnMut(&str)>(mut self, on_delta: &mut F) -> String {
        if !self.staging.is_empty() {
            let tail = String::from_utf8_lossy(&self.staging).into_owned();
            self.text.push_str(&tail);
            self.staging.clear();
        }
        if self.text.len() > self.sent {
            on_delta(&self.text[self.sent..]);
        }
        self.text
    }
}

impl<B: InferenceBackend> Pipeline<'_, B> {
    /// Run the request to a terminal state. Partial text is dropped on failure
    /// or cancellation; entries committed before that point stay in the cache.
    pub(crate) fn run<F>(mut self, prompt: &str, mut on_delta: F) -> Result<Generation>
    where
        F: FnMut(&str),
    {
        let result = self.run_inner(prompt, &mut on_delta);
        match &result {
            Ok(g) => {
                self.transition(RequestState::Completed);
                info!(
                    tokens = g.tokens_generated,
                    finish = ?g.finish,
                    tps = g.tokens_per_second,
                    "generation complete"
                );
            }
            Err(EngineError::Cancelled) => {
                self.transition(RequestState::Cancelled);
                info!("generation cancelled");
            }
            Err(e) => {
                self.transition(RequestState::Failed);
                warn!(error = %e, "generation failed");
            }
        }
        result
    }

    fn run_inner<F>(&mut self, prompt: &str, on_delta: &mut F) -> Result<Generation>
    where
        F: FnMut(&str),
    {
        let started = Instant::now();
        let slot = self.slot;

        let prompt_tokens = slot.with_state(|st| {
            st.backend
                .tokenize(prompt)
                .map_err(|e| EngineError::Generation(format!("tokenize: {e}")))
        })?;
        debug!(tokens = prompt_tokens.len(), sparse = self.sparse, "prompt tokenized");
        if prompt_tokens.is_empty() {
            return Err(EngineError::Generation("prompt produced no tokens".into()));
        }

        self.check_cancel()?;
        self.transition(RequestState::Decoding);
        let mut logits = self.prefill(&prompt_tokens)?;

        let decode_started = Instant::now();
        let mut stream = TextStream::new(&self.stop);
        let mut emitted = 0usize;
        let mut finish = FinishReason::MaxTokens;

        for step in 0..self.budget {
            self.check_cancel()?;

            let token = self
                .sampler
                .sample(&logits)
                .ok_or_else(|| EngineError::Generation("backend returned no finite logits".into()))?;
            trace!(step, token = token.0, "sampled");

            if token == self.eos {
                finish = FinishReason::Eos;
                break;
            }

            let (next, bytes) = slot
                .with_state(|st| {
                    let next = self.evaluate_and_commit(st, &[token])?;
                    let bytes = st
                        .backend
                        .detokenize(&[token])
                        .map_err(|e| EngineError::Generation(format!("detokenize: {e}")))?;
                    Ok((next, bytes))
                })
                .map_err(|e| match e {
                    EngineError::Generation(msg) => {
                        EngineError::Generation(format!("decode step {step}: {msg}"))
                    }
                    other => other,
                })?;
            logits = next;
            emitted += 1;

            stream.push(&bytes);
            if stream.cut_at_stop(&self.stop) {
                finish = FinishReason::StopSequence;
                break;
            }
            stream.flush_safe(on_delta);
        }

        let decode_elapsed = decode_started.elapsed();
        let text = stream.finish(on_delta);
        let elapsed = started.elapsed();
        let tokens_per_second = throughput(emitted, decode_elapsed);

        slot.controller
            .metrics()
            .record_inference(emitted, decode_elapsed, elapsed);

        Ok(Generation {
            text,
            tokens_generated: emitted,
            prompt_tokens: prompt_tokens.len(),
            finish,
            sparse_attention: self.sparse,
            elapsed,
            tokens_per_second,
        })
    }
}

fn throughput(tokens: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if tokens == 0 || secs <= 0.0 {
        0.0
    } else {
        tokens as f64 / secs
    }
}
