use lumen_abi::{Logits, SamplingParams, Token};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the next token from backend logits. Temperature 0 is plain arg-max and
/// never touches the RNG.
#[derive(Debug)]
pub struct Sampler {
    params: SamplingParams,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: &SamplingParams) -> Self {
        let params = params.normalized();
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// `None` when the logits carry no finite candidate.
    pub fn sample(&mut self, logits: &Logits) -> Option<Token> {
        if self.params.is_greedy() {
            return logits.argmax();
        }

        let inv_t = 1.0 / self.params.temperature;
        let mut cands: Vec<(i32, f32)> = logits
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (i as i32, v * inv_t))
            .collect();
        if cands.is_empty() {
            return None;
        }

        // Descending by logit; stable so ties keep the lower id first.
        cands.sort_by(|a, b| b.1.total_cmp(&a.1));

        if let Some(k) = self.params.top_k {
            cands.truncate((k as usize).max(1));
        }

        let max = cands[0].1;
        let mut probs: Vec<f32> = cands.iter().map(|&(_, l)| (l - max).exp()).collect();
        let sum: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= sum;
        }

        if let Some(top_p) = self.params.top_p {
            let mut cum = 0.0f32;
            let mut keep = probs.len();
            for (i, p) in probs.iter().enumerate() {
                cum += p;
                if cum >= top_p {
                    keep = i + 1;
                    break;
                }
            }
            probs.truncate(keep);
            cands.truncate(keep);
        }

        let total: f32 = probs.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Some(Token(cands[0].0));
        }
        let mut r = self.rng.gen_range(0.0..total);
        for (i, p) in probs.iter().enumerate() {
            if r < *p {
                return Some(Token(cands[i].0));
            }
            r -= p;
        }
        cands.last().map(|&(id, _)| Token(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(temperature: f32, top_k: Option<u32>, top_p: Option<f32>, seed: u64) -> SamplingParams {
        SamplingParams {
            temperature,
            top_k,
            top_p,
            seed: Some(seed),
        }
    }

    #[test]
    fn zero_temperature_is_argmax() {
        let logits = Logits(vec![0.1, 3.0, 2.9, -4.0]);
        let mut s = Sampler::new(&SamplingParams::greedy());
        for _ in 0..10 {
            assert_eq!(s.sample(&logits), Some(Token(1)));
        }
    }

    #[test]
    fn top_k_one_is_argmax_at_any_temperature() {
        let logits = Logits(vec![0.1, 0.2, 5.0, 0.3]);
        let mut s = Sampler::new(&params(2.0, Some(1), None, 7));
        for _ in 0..20 {
            assert_eq!(s.sample(&logits), Some(Token(2)));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let logits = Logits((0..16).map(|i| (i % 5) as f32 * 0.3).collect());
        let p = params(1.0, Some(8), Some(0.9), 1234);
        let mut a = Sampler::new(&p);
        let mut b = Sampler::new(&p);
        let xs: Vec<_> = (0..32).map(|_| a.sample(&logits)).collect();
        let ys: Vec<_> = (0..32).map(|_| b.sample(&logits)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn samples_stay_inside_top_k() {
        let logits = Logits(vec![5.0, 4.0, -10.0, -10.0, -10.0]);
        let mut s = Sampler::new(&params(1.0, Some(2), None, 99));
        for _ in 0..200 {
            let t = s.sample(&logits).unwrap();
            assert!(t == Token(0) || t == Token(1), "got {t:?}");
        }
    }

    #[test]
    fn nucleus_keeps_dominant_token() {
        let logits = Logits(vec![10.0, 0.0, 0.0, 0.0]);
        let mut s = Sampler::new(&params(1.0, None, Some(0.5), 3));
        for _ in 0..50 {
            assert_eq!(s.sample(&logits), Some(Token(0)));
        }
    }

    #[test]
    fn non_finite_logits_yield_none() {
        let mut s = Sampler::new(&params(0.8, None, None, 1));
        assert_eq!(s.sample(&Logits(vec![f32::NAN, f32::NEG_INFINITY])), None);
        assert_eq!(s.sample(&Logits::default()), None);
    }
}
