//! Sentence segmentation over a stream of LLM token deltas.

const ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "prof", "sr", "jr", "etc", "i.e", "e.g", "vs", "inc", "ltd", "co",
];

fn count_words(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Buffers token deltas and emits whole sentences on terminator boundaries,
/// rejecting boundaries inside abbreviations, numeric literals, or
/// mid-word (a lowercase, non-whitespace character immediately follows).
pub struct SentenceSegmenter {
    buffer: String,
    min_words: usize,
}

impl SentenceSegmenter {
    pub fn new(min_words: usize) -> Self {
        Self {
            buffer: String::new(),
            min_words,
        }
    }

    /// Append a token delta, returning a sentence if a valid boundary with
    /// enough accumulated words was found.
    pub fn add_token(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);
        self.try_emit()
    }

    /// Flush the residual buffer unconditionally, regardless of word count,
    /// so the tail of a short response is never lost.
    pub fn finalize(&mut self) -> Option<String> {
        let trimmed = self.buffer.trim();
        if trimmed.is_empty() {
            self.buffer.clear();
            return None;
        }
        let out = trimmed.to_string();
        self.buffer.clear();
        Some(out)
    }

    fn try_emit(&mut self) -> Option<String> {
        let chars: Vec<char> = self.buffer.chars().collect();

        for i in 0..chars.len() {
            let c = chars[i];
            if c != '.' && c != '?' && c != '!' {
                continue;
            }
            // Can't yet tell whether the next character is lowercase
            // non-whitespace until it arrives.
            if i + 1 >= chars.len() {
                continue;
            }
            let next = chars[i + 1];
            if next.is_lowercase() && !next.is_whitespace() {
                continue;
            }
            if i >= 3
                && chars[i - 3].is_ascii_digit()
                && chars[i - 2].is_ascii_digit()
                && chars[i - 1].is_ascii_digit()
            {
                continue;
            }

            let mut word_start = i;
            while word_start > 0
                && (chars[word_start - 1].is_alphanumeric() || chars[word_start - 1] == '.')
            {
                word_start -= 1;
            }
            let word: String = chars[word_start..i].iter().collect::<String>().to_lowercase();
            if ABBREVIATIONS.contains(&word.as_str()) {
                continue;
            }

            let candidate: String = chars[0..=i].iter().collect();
            if count_words(&candidate) < self.min_words {
                continue;
            }

            let remainder: String = chars[i + 1..].iter().collect();
            self.buffer = remainder.trim_start().to_string();
            return Some(candidate.trim().to_string());
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_chars(seg: &mut SentenceSegmenter, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for c in text.chars() {
            if let Some(s) = seg.add_token(&c.to_string()) {
                out.push(s);
            }
        }
        out
    }

    #[test]
    fn test_abbreviation_does_not_terminate_sentence() {
        let mut seg = SentenceSegmenter::new(3);
        let sentences = feed_chars(&mut seg, "Dr. Smith arrived. Then he left. ");
        assert_eq!(sentences, vec!["Dr. Smith arrived.".to_string()]);
    }

    #[test]
    fn test_abbreviation_inside_question_does_not_split_mid_name() {
        let mut seg = SentenceSegmenter::new(3);
        let sentences = feed_chars(&mut seg, "Hello Dr. Smith, how are you today? ");
        assert_eq!(sentences, vec!["Hello Dr. Smith, how are you today?".to_string()]);
    }

    #[test]
    fn test_below_min_words_waits_for_more_text() {
        let mut seg = SentenceSegmenter::new(10);
        let sentences = feed_chars(&mut seg, "Hi there.");
        assert!(sentences.is_empty());
    }

    #[test]
    fn test_finalize_emits_residual_regardless_of_word_count() {
        let mut seg = SentenceSegmenter::new(10);
        feed_chars(&mut seg, "Ok.");
        let tail = seg.finalize();
        assert_eq!(tail, Some("Ok.".to_string()));
    }

    #[test]
    fn test_finalize_on_empty_buffer_returns_none() {
        let mut seg = SentenceSegmenter::new(3);
        assert_eq!(seg.finalize(), None);
    }

    #[test]
    fn test_numeric_literal_does_not_terminate_sentence() {
        let mut seg = SentenceSegmenter::new(1);
        let sentences = feed_chars(&mut seg, "The total was 123.45 dollars exactly. ");
        assert_eq!(
            sentences,
            vec!["The total was 123.45 dollars exactly.".to_string()]
        );
    }

    #[test]
    fn test_mid_word_lowercase_does_not_terminate_sentence() {
        let mut seg = SentenceSegmenter::new(1);
        // "e.g." followed by lowercase "apples" must not split mid-phrase.
        let sentences = feed_chars(&mut seg, "Bring fruit, e.g. apples, to the party. ");
        assert_eq!(
            sentences,
            vec!["Bring fruit, e.g. apples, to the party.".to_string()]
        );
    }
}
