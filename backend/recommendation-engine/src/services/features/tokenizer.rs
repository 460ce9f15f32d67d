use unicode_segmentation::UnicodeSegmentation;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
    "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "too", "up", "us", "was", "we", "were", "what",
    "when", "which", "who", "why", "will", "with", "you", "your",
];

/// Split text into normalized terms: Unicode words, lowercased, without
/// stop words, numbers and single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 2)
        .filter(|w| !w.chars().all(|c| c.is_numeric()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_normalizes() {
        let tokens = tokenize("The Roof-Repair guide, 2024 edition: a How-To!");
        assert_eq!(tokens, vec!["roof", "repair", "guide", "edition"]);
    }

    #[test]
    fn test_tokenize_unicode() {
        let tokens = tokenize("Café Küche design");
        assert_eq!(tokens, vec!["café", "küche", "design"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("   ").is_empty());
        assert!(tokenize("a I 42").is_empty());
    }
}
