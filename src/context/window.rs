//! Context-length slicing.
//!
//! Token-aware truncation of retrieved context so that a prompt fits the
//! selected model's context window. Truncation keeps the earliest tokens and
//! is an approximation: it may cut through a word.

use crate::llm::Tokenizer;

/// Tokens left for retrieved context once the prompt and the output reserve
/// are accounted for. May be zero or negative.
pub fn context_budget(context_length: usize, prompt_tokens: usize, output_reserve: usize) -> i64 {
    context_length as i64 - prompt_tokens as i64 - output_reserve as i64
}

/// Truncate `text` from the end so it holds at most `max_tokens` tokens.
pub fn slice_to_context_length(text: &str, tokenizer: &dyn Tokenizer, max_tokens: i64) -> String {
    if max_tokens <= 0 {
        return String::new();
    }
    let spans = tokenizer.token_spans(text);
    let limit = max_tokens as usize;
    if spans.len() <= limit {
        return text.to_string();
    }

    let mut end = spans[limit - 1].1.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Include whole items in order while budget remains; the first item that
/// would overflow is sliced to the remaining budget and everything after it
/// is dropped. Items are never reordered.
pub fn slice_list_to_context_length(
    items: &[String],
    tokenizer: &dyn Tokenizer,
    max_tokens: i64,
) -> Vec<String> {
    let mut remaining = max_tokens;
    let mut kept = Vec::new();

    for item in items {
        if remaining <= 0 {
            break;
        }
        let count = tokenizer.count(item) as i64;
        if count <= remaining {
            kept.push(item.clone());
            remaining -= count;
        } else {
            kept.push(slice_to_context_length(item, tokenizer, remaining));
            break;
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ReferenceTokenizer;

    /// One token per whitespace-separated word, spans include the trailing space.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn name(&self) -> &str {
            "words"
        }

        fn token_spans(&self, text: &str) -> Vec<(usize, usize)> {
            let mut spans = Vec::new();
            let mut start = None;
            for (i, c) in text.char_indices() {
                match (start, c.is_whitespace()) {
                    (None, false) => start = Some(i),
                    (Some(s), true) => {
                        spans.push((s, i));
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                spans.push((s, text.len()));
            }
            spans
        }

        fn encode(&self, text: &str) -> Vec<u32> {
            self.token_spans(text).iter().map(|(s, _)| *s as u32).collect()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn within_budget_is_unchanged() {
        let text = "alpha beta gamma";
        assert_eq!(slice_to_context_length(text, &WordTokenizer, 3), text);
        assert_eq!(slice_to_context_length(text, &WordTokenizer, 100), text);
    }

    #[test]
    fn truncates_keeping_earliest_tokens() {
        let sliced = slice_to_context_length("alpha beta gamma delta", &WordTokenizer, 2);
        assert_eq!(sliced, "alpha beta");
        assert_eq!(WordTokenizer.count(&sliced), 2);
    }

    #[test]
    fn zero_or_negative_budget_yields_empty() {
        assert_eq!(slice_to_context_length("alpha", &WordTokenizer, 0), "");
        assert_eq!(slice_to_context_length("alpha", &WordTokenizer, -5), "");
        assert!(slice_list_to_context_length(&strings(&["a", "b"]), &WordTokenizer, 0).is_empty());
    }

    #[test]
    fn slicing_is_idempotent() {
        let once = slice_to_context_length("one two three four five", &ReferenceTokenizer, 3);
        let twice = slice_to_context_length(&once, &ReferenceTokenizer, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn list_keeps_whole_items_then_slices_first_overflow() {
        let items = strings(&["a b", "c d e", "f g h i", "j"]);
        let sliced = slice_list_to_context_length(&items, &WordTokenizer, 7);
        assert_eq!(sliced, strings(&["a b", "c d e", "f g"]));
    }

    #[test]
    fn list_drops_remaining_items_when_budget_is_exact() {
        let items = strings(&["a b", "c d", "e"]);
        let sliced = slice_list_to_context_length(&items, &WordTokenizer, 4);
        assert_eq!(sliced, strings(&["a b", "c d"]));
    }

    #[test]
    fn list_never_reorders() {
        let items = strings(&["third item here", "first", "second one"]);
        let sliced = slice_list_to_context_length(&items, &WordTokenizer, 100);
        assert_eq!(sliced, items);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundary() {
        let text = "日本語のテキストはとても長い文章です";
        let sliced = slice_to_context_length(text, &ReferenceTokenizer, 1);
        assert!(text.starts_with(&sliced));
        assert!(!sliced.is_empty());
    }
}
