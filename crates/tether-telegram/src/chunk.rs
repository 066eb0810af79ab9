// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-aware splitting of outbound text.

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Lines are kept whole where possible; a line longer than `max_chars` is
/// hard-split after the pending chunk is flushed. Empty input yields no
/// chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if line_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if current_len + line_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_short_inputs() {
        assert!(chunk_text("", 10).is_empty());
        assert_eq!(chunk_text("hello", 10), vec!["hello"]);
        assert_eq!(chunk_text("0123456789", 10), vec!["0123456789"]);
    }

    #[test]
    fn lines_are_packed_without_splitting() {
        let chunks = chunk_text("aaaa\nbbbb\ncccc\n", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc\n"]);
    }

    #[test]
    fn long_line_is_hard_split_after_flush() {
        let chunks = chunk_text("ab\n0123456789XYZ\ncd", 5);
        assert_eq!(chunks, vec!["ab\n", "01234", "56789", "XYZ\n", "cd"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(12);
        let chunks = chunk_text(&text, 5);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn every_chunk_respects_the_limit() {
        let text = (0..200)
            .map(|i| "x".repeat(i % 37))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, 30);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        assert_eq!(chunks.concat(), text);
    }
}
