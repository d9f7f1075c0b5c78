use anyhow::{Context, Result};
use tiktoken_rs::CoreBPE;

/// Fixed per-message overhead charged on top of content tokens,
/// covering role markers and chat-format framing.
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Token counting abstraction.
///
/// The selection algorithm only ever sees this trait, so the default
/// content-length heuristic can be swapped for a real tokenizer without
/// touching the selector.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;
}

/// Content-length heuristic: roughly four characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let chars = text.chars().count() as u32;
        chars.div_ceil(4)
    }
}

/// Exact BPE counting via tiktoken's `cl100k_base` vocabulary.
pub struct BpeEstimator {
    bpe: CoreBPE,
}

impl BpeEstimator {
    pub fn new() -> Result<Self> {
        let bpe = cl100k()?;
        Ok(Self { bpe })
    }
}

fn cl100k() -> Result<CoreBPE> {
    tiktoken_rs::cl100k_base().context("failed to load cl100k_base vocabulary")
}

impl TokenEstimator for BpeEstimator {
    fn estimate(&self, text: &str) -> u32 {
        self.bpe.encode_with_special_tokens(text).len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_rounds_up() {
        let estimator = HeuristicEstimator;
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 1);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcde"), 2);
    }

    #[test]
    fn test_heuristic_counts_chars_not_bytes() {
        let estimator = HeuristicEstimator;
        // 4 multi-byte characters are still one heuristic token
        assert_eq!(estimator.estimate("éééé"), 1);
    }

    #[test]
    fn test_bpe_estimator_nonzero() {
        let estimator = BpeEstimator::new().unwrap();
        assert!(estimator.estimate("hello world") > 0);
        assert_eq!(estimator.estimate(""), 0);
    }
}
