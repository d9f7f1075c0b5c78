use std::sync::Arc;

use tracing::debug;

use super::estimator::{TokenEstimator, MESSAGE_OVERHEAD_TOKENS};
use crate::models::{Message, MessageRole};

/// Maximum number of complete user/assistant pairs admitted per window.
pub const DEFAULT_MAX_PAIRS: usize = 5;

/// Tokens reserved for the model's reply when checking whether a window
/// plus the new message still fits the overall budget.
pub const REPLY_BUFFER_TOKENS: u32 = 100;

/// Shrinking budget ladder tried when the full window does not fit.
const FALLBACK_FACTORS: [f32; 5] = [1.0, 0.8, 0.6, 0.4, 0.2];

#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    pub max_pairs: usize,
    pub reply_buffer: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_pairs: DEFAULT_MAX_PAIRS,
            reply_buffer: REPLY_BUFFER_TOKENS,
        }
    }
}

/// Builds the token-budgeted context window sent with each chat turn.
///
/// Pure over its inputs: for a fixed message slice and budget the result
/// is deterministic, and its estimated cost never exceeds the budget.
pub struct ContextSelector {
    estimator: Arc<dyn TokenEstimator>,
    config: SelectorConfig,
}

impl ContextSelector {
    pub fn new(estimator: Arc<dyn TokenEstimator>, config: SelectorConfig) -> Self {
        Self { estimator, config }
    }

    pub fn message_cost(&self, message: &Message) -> u32 {
        self.estimator.estimate(&message.content) + MESSAGE_OVERHEAD_TOKENS
    }

    /// Select a context window from `messages` (the just-typed message
    /// must not be in the slice), newest-to-oldest, within `max_tokens`.
    ///
    /// Complete user/assistant pairs are atomic: a pair is admitted whole
    /// or not at all, and pairs are preferred over individual messages.
    /// Orphaned assistant messages (no user turn before them, e.g. after a
    /// failed exchange was retried away) and unpaired user messages are
    /// admitted individually when the remaining budget allows. The walk
    /// stops at the first unit that would overflow.
    pub fn select(&self, messages: &[Message], max_tokens: u32) -> Vec<Message> {
        let mut selected: Vec<&Message> = Vec::new();
        let mut used: u32 = 0;
        let mut pairs = 0usize;
        // Walking backward we see an assistant turn before the user turn
        // that produced it; hold it until its user message shows up.
        let mut pending_assistant: Option<&Message> = None;

        'walk: for message in messages.iter().rev() {
            match message.role {
                MessageRole::Assistant => {
                    if let Some(orphan) = pending_assistant.take() {
                        // Two assistant turns in a row: the newer one has
                        // no user turn of its own.
                        let cost = self.message_cost(orphan);
                        if used + cost > max_tokens {
                            break 'walk;
                        }
                        selected.push(orphan);
                        used += cost;
                    }
                    pending_assistant = Some(message);
                }
                MessageRole::User => {
                    match pending_assistant.take() {
                        Some(assistant) => {
                            if pairs >= self.config.max_pairs {
                                break 'walk;
                            }
                            let cost =
                                self.message_cost(message) + self.message_cost(assistant);
                            if used + cost > max_tokens {
                                break 'walk;
                            }
                            selected.push(assistant);
                            selected.push(message);
                            used += cost;
                            pairs += 1;
                        }
                        None => {
                            // Unpaired user turn (trailing, or from a
                            // failed exchange mid-history).
                            let cost = self.message_cost(message);
                            if used + cost > max_tokens {
                                break 'walk;
                            }
                            selected.push(message);
                            used += cost;
                        }
                    }
                }
            }
        }

        // History opened with an assistant turn that never found its user.
        if let Some(orphan) = pending_assistant {
            let cost = self.message_cost(orphan);
            if used + cost <= max_tokens {
                selected.push(orphan);
                used += cost;
            }
        }

        debug!(
            budget = max_tokens,
            used,
            pairs,
            selected = selected.len(),
            "context window selected"
        );

        // Collected newest-first; restore chronological order.
        selected.reverse();
        selected.into_iter().cloned().collect()
    }

    /// Estimated cost of an already-selected window.
    pub fn window_cost(&self, window: &[Message]) -> u32 {
        window.iter().map(|m| self.message_cost(m)).sum()
    }

    /// Budget fallback ladder: try the full context budget, then 80%, 60%,
    /// 40% and 20% of it, accepting the first window that fits `budget`
    /// together with the new message and a small reply buffer. The final
    /// fallback is the empty window (just the new message).
    pub fn select_with_fallback(
        &self,
        messages: &[Message],
        budget: u32,
        new_message_cost: u32,
    ) -> Vec<Message> {
        let reserved = new_message_cost + self.config.reply_buffer;
        for factor in FALLBACK_FACTORS {
            let scaled = (budget as f32 * factor) as u32;
            let window = self.select(messages, scaled);
            if self.window_cost(&window) + reserved <= budget {
                return window;
            }
        }
        debug!(budget, "no context window fits, sending bare message");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeuristicEstimator;
    use chrono::{Duration, Utc};

    fn selector() -> ContextSelector {
        ContextSelector::new(Arc::new(HeuristicEstimator), SelectorConfig::default())
    }

    /// Sequenced history builder: each entry is (role, content).
    fn history(turns: &[(MessageRole, &str)]) -> Vec<Message> {
        let t0 = Utc::now();
        turns
            .iter()
            .enumerate()
            .map(|(i, (role, content))| {
                let message = match role {
                    MessageRole::User => Message::user(*content),
                    MessageRole::Assistant => Message::assistant(*content),
                };
                message.with_timestamp(t0 + Duration::seconds(i as i64))
            })
            .collect()
    }

    use MessageRole::{Assistant, User};

    #[test]
    fn test_prefers_most_recent_complete_pair() {
        let messages = history(&[
            (User, "first question"),
            (Assistant, "first answer"),
            (User, "second question"),
            (Assistant, "second answer"),
        ]);
        let sel = selector();
        // room for exactly one pair: each message is ~4 + overhead 4
        let one_pair = sel.message_cost(&messages[2]) + sel.message_cost(&messages[3]);
        let window = sel.select(&messages, one_pair);

        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "second question");
        assert_eq!(window[1].content, "second answer");
    }

    #[test]
    fn test_budget_invariant_for_all_budgets() {
        let messages = history(&[
            (User, "a question with a somewhat longer body of text"),
            (Assistant, "a reply that also carries some weight"),
            (User, "short"),
            (Assistant, "ok"),
            (User, "another question entirely"),
            (Assistant, "another reply entirely"),
        ]);
        let sel = selector();
        for budget in 0..200 {
            let window = sel.select(&messages, budget);
            assert!(
                sel.window_cost(&window) <= budget,
                "window cost exceeded budget {budget}"
            );
            // deterministic
            assert_eq!(window, sel.select(&messages, budget));
        }
    }

    #[test]
    fn test_pairs_are_atomic() {
        let messages = history(&[(User, "question"), (Assistant, "answer")]);
        let sel = selector();
        let pair_cost = sel.window_cost(&messages);
        // one token short of the pair: nothing is partially included
        let window = sel.select(&messages, pair_cost - 1);
        assert!(window.is_empty());
    }

    #[test]
    fn test_pair_limit() {
        let turns: Vec<(MessageRole, String)> = (0..8)
            .flat_map(|i| {
                [
                    (User, format!("question {i}")),
                    (Assistant, format!("answer {i}")),
                ]
            })
            .collect();
        let borrowed: Vec<(MessageRole, &str)> =
            turns.iter().map(|(r, c)| (*r, c.as_str())).collect();
        let messages = history(&borrowed);

        let window = selector().select(&messages, 10_000);
        // default cap is 5 pairs
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].content, "question 3");
        assert_eq!(window[9].content, "answer 7");
    }

    #[test]
    fn test_orphaned_assistant_included_individually() {
        // assistant turn with no preceding user turn, mid-history
        let messages = history(&[
            (Assistant, "greeting from a prior failed exchange"),
            (User, "question"),
            (Assistant, "answer"),
        ]);
        let window = selector().select(&messages, 10_000);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "greeting from a prior failed exchange");
    }

    #[test]
    fn test_trailing_unpaired_user_included() {
        let messages = history(&[
            (User, "question"),
            (Assistant, "answer"),
            (User, "follow-up that failed to send"),
        ]);
        let window = selector().select(&messages, 10_000);
        assert_eq!(window.len(), 3);
        assert_eq!(window[2].content, "follow-up that failed to send");
    }

    #[test]
    fn test_empty_history_yields_empty_window() {
        let window = selector().select(&[], 1_000);
        assert!(window.is_empty());
    }

    #[test]
    fn test_fallback_ladder_shrinks_window() {
        let messages = history(&[
            (User, &"x".repeat(400)),
            (Assistant, &"y".repeat(400)),
            (User, "small question"),
            (Assistant, "small answer"),
        ]);
        let sel = selector();
        // budget that fits the small pair plus the new message, but not
        // the big pair as well
        let window = sel.select_with_fallback(&messages, 330, 10);
        assert!(!window.is_empty());
        assert!(sel.window_cost(&window) + 10 + REPLY_BUFFER_TOKENS <= 330);
    }

    #[test]
    fn test_fallback_bottoms_out_empty() {
        let messages = history(&[(User, &"x".repeat(400)), (Assistant, &"y".repeat(400))]);
        let window = selector().select_with_fallback(&messages, 50, 40);
        assert!(window.is_empty());
    }
}
