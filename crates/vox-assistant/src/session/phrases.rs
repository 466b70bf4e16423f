/// Lowercases, drops punctuation and collapses whitespace.
pub fn normalize_utterance(text: &str) -> String {
    text.chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch.is_whitespace() || ch == '\'' {
                ch
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when any of `phrases` occurs in `text`.
pub fn contains_phrase(text: &str, phrases: &[String]) -> bool {
    let normalized = normalize_utterance(text);
    if normalized.is_empty() {
        return false;
    }
    phrases
        .iter()
        .map(|phrase| normalize_utterance(phrase))
        .filter(|phrase| !phrase.is_empty())
        .any(|phrase| normalized.contains(&phrase))
}

/// True when `text` is one of `phrases` or starts with one as a whole word,
/// so "네, 끝내줘" answers yes but "네비게이션" does not.
pub fn starts_with_phrase(text: &str, phrases: &[String]) -> bool {
    let normalized = normalize_utterance(text);
    if normalized.is_empty() {
        return false;
    }
    phrases
        .iter()
        .map(|phrase| normalize_utterance(phrase))
        .filter(|phrase| !phrase.is_empty())
        .any(|phrase| normalized == phrase || normalized.starts_with(&format!("{phrase} ")))
}

/// Splits reply text into sentences for speech, in order. A period only
/// ends a sentence before whitespace, so "3.5" stays whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(ch);
        let boundary = match ch {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map(|next| next.is_whitespace()).unwrap_or(true),
            _ => false,
        };
        if boundary {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn end_phrase_matches_inside_longer_utterance() {
        let end = phrases(&["그만할게", "end the session"]);
        assert!(contains_phrase("그만할게", &end));
        assert!(contains_phrase("이제 그만할게요.", &end));
        assert!(contains_phrase("OK, End the session!", &end));
        assert!(!contains_phrase("what's the weather", &end));
    }

    #[test]
    fn confirmation_requires_leading_word() {
        let yes = phrases(&["네", "yes"]);
        assert!(starts_with_phrase("네", &yes));
        assert!(starts_with_phrase("네, 종료해 줘", &yes));
        assert!(starts_with_phrase("Yes!", &yes));
        assert!(!starts_with_phrase("네비게이션 켜줘", &yes));
        assert!(!starts_with_phrase("yesterday", &yes));
    }

    #[test]
    fn sentences_split_on_terminators_and_newlines() {
        assert_eq!(
            split_sentences("It is 3.5 degrees. Bring a coat!\nAnything else?"),
            vec!["It is 3.5 degrees.", "Bring a coat!", "Anything else?"]
        );
        assert_eq!(
            split_sentences("안녕하세요。반갑습니다"),
            vec!["안녕하세요。", "반갑습니다"]
        );
        assert!(split_sentences("   ").is_empty());
    }
}
