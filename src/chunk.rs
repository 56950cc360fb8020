//! Sentence-boundary text chunker.
//!
//! Splits document content into passages that respect a configurable word
//! budget. Sentences are the indivisible unit: a chunk closes when the next
//! sentence would push it past `target_words`, and a single sentence longer
//! than the budget is kept whole rather than split mid-sentence.

/// Default word budget per chunk.
pub const DEFAULT_TARGET_WORDS: usize = 100;

/// Split content into sentence-aligned chunks of roughly `target_words` words.
/// Returns the chunks in document order; joining them with single spaces
/// reproduces the whitespace-normalized input.
pub fn chunk_text(content: &str, target_words: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for sentence in split_sentences(content) {
        let words = sentence.split_whitespace().count();
        if current_words + words > target_words && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Segment text into sentences at `.`, `!`, or `?` followed by whitespace.
/// Trailing text without a terminator forms the final sentence. Whitespace-only
/// input produces no sentences.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some(&(_, next)) = iter.peek() {
                if next.is_whitespace() {
                    let end = i + ch.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}
