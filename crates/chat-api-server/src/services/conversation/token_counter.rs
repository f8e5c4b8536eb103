use crate::store::models::Message;

/// Word-based token estimation. Mixed-language chat text averages ~1.3
/// tokens per word; a small constant covers role/formatting overhead.
pub struct TokenCounter;

const TOKENS_PER_WORD: f64 = 1.3;
const MESSAGE_OVERHEAD: usize = 5;

impl TokenCounter {
    pub fn count_text(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let words = text.split_whitespace().count();
        ((words as f64 * TOKENS_PER_WORD) + MESSAGE_OVERHEAD as f64).ceil() as usize
    }

    /// Total cost of a message sequence, using each message's recorded count
    /// when present so upstream-reported usage is preferred over estimates.
    pub fn count_messages(messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|message| {
                if message.token_count > 0 {
                    message.token_count as usize
                } else {
                    Self::count_text(&message.content)
                }
            })
            .sum()
    }
}
