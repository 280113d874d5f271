use serde::{Deserialize, Serialize};

/// User-tunable sampling parameters for one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// 0.0 selects arg-max decoding; > 0.0 scales logits before stochastic sampling.
    pub temperature: f32,
    pub top_k: Option<u32>, // >= 1 keeps the K most likely candidates
    pub top_p: Option<f32>, // (0, 1] nucleus sampling
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: Some(40),
            top_p: Some(0.95),
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_k: None,
            top_p: None,
            seed: None,
        }
    }

    #[inline]
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Returns a conflict-free, clamped version of these parameters.
    ///
    /// - temperature 0 disables top_k/top_p (arg-max ignores them)
    /// - top_k < 1 → disabled
    /// - top_p ∉ (0, 1] → disabled; top_p == 1 is a no-op and is dropped
    pub fn normalized(&self) -> Self {
        let mut p = self.clone();

        if p.is_greedy() {
            p.top_k = None;
            p.top_p = None;
            return p;
        }
        if let Some(k) = p.top_k {
            if k < 1 {
                p.top_k = None;
            }
        }
        if let Some(tp) = p.top_p {
            if !(tp > 0.0 && tp < 1.0) {
                p.top_p = None;
            }
        }
        p
    }
}
