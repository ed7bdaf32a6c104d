//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This is
//! accurate within ~10% for BPE tokenizers on English text, which is all
//! the history budget and the output-size check need.

use crate::message::Message;

/// Characters per token assumed by the heuristic.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for role name and delimiters in the wire format.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn count_string_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn count_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + count_string_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn count_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(count_message_tokens).sum()
}

/// Split `text` into consecutive chunks of at most `max_tokens` tokens.
///
/// Chunks never split a UTF-8 character.
pub fn chunk_by_tokens(text: &str, max_tokens: usize) -> Vec<&str> {
    let max_bytes = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(max_bytes);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // A single character wider than the budget still has to go somewhere.
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_string_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(count_string_tokens("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(count_message_tokens(&msg), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("hi")];
        assert_eq!(count_messages_tokens(&msgs), 6 + 5);
    }

    #[test]
    fn chunks_respect_limit() {
        let text = "a".repeat(100);
        let chunks = chunk_by_tokens(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 40);
        assert_eq!(chunks[2].len(), 20);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunks_keep_multibyte_chars_whole() {
        let text = "héllo wörld ünïcode";
        let chunks = chunk_by_tokens(text, 1);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_by_tokens("", 10).is_empty());
    }
}
