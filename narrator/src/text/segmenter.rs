//! Greedy word-boundary chunking under a character budget.

/// Default chunk length limit in characters.
pub const DEFAULT_CHUNK_LIMIT: usize = 150;

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into speakable chunks of at most `limit` characters.
///
/// Words are accumulated greedily. Each accepted word costs its length plus
/// one separator, the first word of the document's first chunk included, so
/// the opening chunk is budgeted one character conservatively. A chunk opened
/// by an overflowing word starts at that word's bare length. A word longer
/// than `limit` is never split; it becomes a chunk of its own.
///
/// Lengths are counted in `char`s. Empty or whitespace-only input gives no
/// chunks. The function never fails.
pub fn segment(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut length = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if length + word_len + 1 <= limit {
            current.push(word);
            length += word_len + 1;
        } else {
            if !current.is_empty() {
                chunks.push(current.join(" "));
            }
            current = vec![word];
            length = word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
