use serde::{Deserialize, Serialize};

/// Wrapper for a model token (ID). Using a newtype avoids accidental
/// mixing with unrelated `i32`s and keeps conversions explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub i32);

impl Token {
    /// Negative ids are reserved for error codes on the C ABI.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<i32> for Token {
    #[inline]
    fn from(value: i32) -> Self {
        Token(value)
    }
}

impl From<Token> for i32 {
    #[inline]
    fn from(token: Token) -> i32 {
        token.0
    }
}

/// Next-token scores produced by one backend forward pass. Length == vocab size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Logits(pub Vec<f32>);

impl Logits {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Index of the highest score; ties resolve to the lowest id. NaN scores never win.
    pub fn argmax(&self) -> Option<Token> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in self.0.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| Token(i as i32))
    }
}

impl From<Vec<f32>> for Logits {
    fn from(v: Vec<f32>) -> Self {
        Logits(v)
    }
}
