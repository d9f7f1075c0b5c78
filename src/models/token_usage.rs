use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::TokenEstimator;

/// Token usage for a single message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    /// Input (prompt) tokens consumed
    pub input_tokens: u32,

    /// Output (completion) tokens generated
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// How to reconcile the usage a provider reports with what was actually
/// generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCorrection {
    /// Provider numbers are trusted as-is.
    PassThrough,
    /// Provider inflates completion counts (image-capable model families
    /// bill image tokens into the text completion figure); recompute the
    /// output count from the returned text instead.
    RecomputeFromText,
}

/// Provider quirk table, matched by model-identifier prefix.
///
/// New quirks are additive: append a prefix row, never branch inline.
const CORRECTION_TABLE: &[(&str, UsageCorrection)] = &[
    ("google/gemini-2.5-flash-image", UsageCorrection::RecomputeFromText),
    ("google/gemini-2.0-flash-exp", UsageCorrection::RecomputeFromText),
    ("openai/gpt-image", UsageCorrection::RecomputeFromText),
    ("black-forest-labs/", UsageCorrection::RecomputeFromText),
];

/// Look up the correction strategy for a model identifier.
pub fn correction_for(model: &str) -> UsageCorrection {
    CORRECTION_TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, correction)| *correction)
        .unwrap_or(UsageCorrection::PassThrough)
}

/// Apply the provider correction table to a reported usage.
pub fn corrected_usage(
    model: &str,
    reported: TokenUsage,
    response_text: &str,
    estimator: &dyn TokenEstimator,
) -> TokenUsage {
    match correction_for(model) {
        UsageCorrection::PassThrough => reported,
        UsageCorrection::RecomputeFromText => {
            let recomputed = estimator.estimate(response_text);
            // Only correct downwards; a provider under-reporting is not a
            // known quirk and should stay visible.
            let output_tokens = recomputed.min(reported.output_tokens);
            debug!(
                model,
                reported = reported.output_tokens,
                corrected = output_tokens,
                "corrected completion token count"
            );
            TokenUsage::new(reported.input_tokens, output_tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeuristicEstimator;

    #[test]
    fn test_correction_lookup_by_prefix() {
        assert_eq!(
            correction_for("google/gemini-2.5-flash-image-preview"),
            UsageCorrection::RecomputeFromText
        );
        assert_eq!(
            correction_for("anthropic/claude-sonnet-4"),
            UsageCorrection::PassThrough
        );
    }

    #[test]
    fn test_pass_through_keeps_reported_numbers() {
        let usage = corrected_usage(
            "anthropic/claude-sonnet-4",
            TokenUsage::new(100, 5000),
            "short reply",
            &HeuristicEstimator,
        );
        assert_eq!(usage, TokenUsage::new(100, 5000));
    }

    #[test]
    fn test_recompute_corrects_inflated_completion_count() {
        // 40 chars of text is ~10 heuristic tokens, far below the
        // inflated 5000 the provider reported.
        let text = "a".repeat(40);
        let usage = corrected_usage(
            "google/gemini-2.5-flash-image",
            TokenUsage::new(100, 5000),
            &text,
            &HeuristicEstimator,
        );
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 10);
    }

    #[test]
    fn test_recompute_never_inflates() {
        let text = "a".repeat(4000);
        let usage = corrected_usage(
            "google/gemini-2.5-flash-image",
            TokenUsage::new(100, 50),
            &text,
            &HeuristicEstimator,
        );
        assert_eq!(usage.output_tokens, 50);
    }
}
