//! Splits normalized text into bounded chunks for embedding.
//!
//! Chunks prefer to break on sentence boundaries and carry a controlled
//! overlap from the previous chunk, so context at split points is not lost.
//! Every produced chunk is at most `max_len` bytes.

/// Default maximum chunk length in bytes.
pub const DEFAULT_MAX_LEN: usize = 512;

/// Default overlap carried between consecutive chunks, in bytes.
pub const DEFAULT_OVERLAP: usize = 64;

/// Split `text` into chunks of at most `max_len` bytes, preferring sentence
/// boundaries, with roughly `overlap` bytes of trailing context repeated at
/// the start of each subsequent chunk.
///
/// Empty input yields no chunks; input shorter than `max_len` yields exactly
/// one.
pub fn split_text(text: &str, max_len: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    // Pieces must leave room for the overlap carried into a fresh chunk.
    let piece_budget = max_len.saturating_sub(overlap + 1).max(1);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        for piece in hard_split(sentence, piece_budget) {
            if current.is_empty() {
                current.push_str(piece);
            } else if current.len() + 1 + piece.len() <= max_len {
                current.push(' ');
                current.push_str(piece);
            } else {
                let tail = overlap_tail(&current, overlap).to_string();
                chunks.push(std::mem::take(&mut current));
                if !tail.is_empty() {
                    current.push_str(&tail);
                    current.push(' ');
                }
                current.push_str(piece);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split text into sentence units, keeping the terminator with its sentence.
/// A unit with no terminator (the trailing remainder) is returned as-is.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminator = false;

    for (idx, ch) in text.char_indices() {
        if prev_terminator && ch.is_whitespace() {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        prev_terminator = matches!(ch, '.' | '!' | '?');
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Split an over-long sentence on word boundaries into pieces of at most
/// `limit` bytes. A single word longer than `limit` is cut at char
/// boundaries.
fn hard_split(sentence: &str, limit: usize) -> Vec<&str> {
    if sentence.len() <= limit {
        return vec![sentence];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < sentence.len() {
        let remaining = &sentence[start..];
        if remaining.len() <= limit {
            pieces.push(remaining);
            break;
        }
        let window = truncate_to_boundary(remaining, limit);
        // Prefer the last space inside the window; always make progress,
        // even when the limit is smaller than one char
        let mut cut = window.rfind(' ').filter(|&i| i > 0).unwrap_or(window.len());
        if cut == 0 {
            cut = next_char_boundary(remaining, 1);
        }
        pieces.push(remaining[..cut].trim_end());
        start += cut;
        // Skip the separating space
        while sentence[start..].starts_with(' ') {
            start += 1;
        }
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// The trailing `overlap` bytes of a chunk, trimmed to a word boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> &str {
    if overlap == 0 || chunk.len() <= overlap {
        return "";
    }
    let window_start = chunk.len() - overlap;
    let window_start = next_char_boundary(chunk, window_start);
    let tail = &chunk[window_start..];
    // Drop the partial leading word
    match tail.find(' ') {
        Some(i) => tail[i..].trim_start(),
        None => "",
    }
}

/// Largest prefix of `s` that is at most `limit` bytes and ends on a char
/// boundary.
fn truncate_to_boundary(s: &str, limit: usize) -> &str {
    let mut end = limit.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Smallest char boundary at or after `idx`.
fn next_char_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("a short sentence.", 512, 64);
        assert_eq!(chunks, vec!["a short sentence.".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 512, 64).is_empty());
        assert!(split_text("   ", 512, 64).is_empty());
    }

    #[test]
    fn test_chunks_bounded() {
        let text = "word ".repeat(500);
        for chunk in split_text(&text, 128, 32) {
            assert!(chunk.len() <= 128, "chunk too long: {} bytes", chunk.len());
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let text = "first sentence here. second sentence here. third sentence here. \
                    fourth sentence here. fifth sentence here."
            .to_string();
        let chunks = split_text(&text, 60, 0);
        assert!(chunks.len() > 1);
        // Every chunk except possibly the last ends at a sentence boundary
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk broke mid-sentence: {chunk:?}");
        }
    }

    #[test]
    fn test_overlap_carried_between_chunks() {
        let text = "alpha beta gamma delta. epsilon zeta eta theta. \
                    iota kappa lambda mu. nu xi omicron pi.";
        let chunks = split_text(text, 48, 16);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // The next chunk opens with words that closed the previous one
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_single_long_word_hard_split() {
        let text = "x".repeat(1000);
        let chunks = split_text(&text, 100, 10);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 100);
        }
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "日本語のテキストです。".repeat(40);
        for chunk in split_text(&text, 100, 20) {
            assert!(chunk.len() <= 100);
            // The chunk is valid UTF-8 by construction; verify it renders
            assert!(!chunk.chars().next().unwrap().is_whitespace());
        }
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("one. two! three? four");
        assert_eq!(sentences, vec!["one.", "two!", "three?", "four"]);
    }
}
