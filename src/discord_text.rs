/// Splits `text` into chunks of at most `limit` characters.
///
/// Chunks are cut at fixed character offsets; concatenating them gives back
/// the original text.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DISCORD_MESSAGE_LIMIT;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("hello", DISCORD_MESSAGE_LIMIT), vec!["hello"]);
        assert!(split_message("", DISCORD_MESSAGE_LIMIT).is_empty());
    }

    #[test]
    fn test_splits_on_exact_boundary() {
        let text = "a".repeat(DISCORD_MESSAGE_LIMIT * 2 + 5);
        let chunks = split_message(&text, DISCORD_MESSAGE_LIMIT);
        let sizes: Vec<_> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(sizes, vec![2000, 2000, 5]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(2001);
        let chunks = split_message(&text, DISCORD_MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "é");
    }
}
