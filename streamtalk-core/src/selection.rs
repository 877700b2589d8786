// ABOUTME: Extracts card positions from noisy chat text during the selection phase
// ABOUTME: Digits first; Korean and English number words only when no digits are present

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Numbers found in one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSelection {
    /// In-range positions in order of appearance, each listed once
    pub numbers: Vec<usize>,
    /// Some in-range position appeared more than once in the raw text
    pub has_duplicate: bool,
}

impl ParsedSelection {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && !self.has_duplicate
    }
}

fn digit_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)\s*(번째|번|장|개)?").ok())
        .as_ref()
}

/// Parse positions in [1, deck_size] from a viewer message.
///
/// Digit runs win: when any ASCII digit run is present, number words are
/// ignored. Runs followed by 장 or 개 are card counts, not positions.
/// Number words count only as whole tokens, and only when they carry a 번
/// suffix or the message consists of nothing but numbers and connectors,
/// so reactions like "오 대박" never pick a card.
pub fn parse_selection(text: &str, deck_size: usize) -> ParsedSelection {
    let mut raw: Vec<usize> = Vec::new();
    let mut saw_digits = false;

    let captures = digit_regex().into_iter().flat_map(|re| re.captures_iter(text));
    for caps in captures {
        saw_digits = true;
        if matches!(caps.get(2).map(|m| m.as_str()), Some("장") | Some("개")) {
            continue;
        }
        if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            raw.push(n);
        }
    }

    if !saw_digits {
        raw = word_numbers(text);
    }

    let mut seen = HashSet::new();
    let mut numbers = Vec::new();
    let mut has_duplicate = false;
    for n in raw.into_iter().filter(|n| (1..=deck_size).contains(n)) {
        if seen.insert(n) {
            numbers.push(n);
        } else {
            has_duplicate = true;
        }
    }

    ParsedSelection {
        numbers,
        has_duplicate,
    }
}

const CONNECTORS: [&str; 8] = ["and", "&", "then", "그리고", "이랑", "랑", "하고", "번"];

fn word_numbers(text: &str) -> Vec<usize> {
    let tokens: Vec<&str> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '&'))
        .filter(|t| !t.is_empty())
        .collect();

    let mut values = Vec::new();
    let mut all_numeric = true;
    for token in &tokens {
        let lowered = token.to_lowercase();
        if CONNECTORS.contains(&lowered.as_str()) {
            continue;
        }
        let (stem, suffixed) = match lowered
            .strip_suffix("번째")
            .or_else(|| lowered.strip_suffix('번'))
        {
            Some(stem) if !stem.is_empty() => (stem.to_string(), true),
            _ => (lowered.clone(), false),
        };
        match parse_number_word(&stem) {
            Some(n) => values.push((n, suffixed)),
            None => all_numeric = false,
        }
    }

    values
        .into_iter()
        .filter(|(_, suffixed)| *suffixed || all_numeric)
        .map(|(n, _)| n)
        .collect()
}

/// Parse a single number word (Korean sino or native, or English)
pub fn parse_number_word(word: &str) -> Option<usize> {
    parse_sino_korean(word)
        .or_else(|| parse_native_korean(word))
        .or_else(|| parse_english(word))
}

fn sino_digit(c: char) -> Option<usize> {
    Some(match c {
        '일' => 1,
        '이' => 2,
        '삼' => 3,
        '사' => 4,
        '오' => 5,
        '육' => 6,
        '칠' => 7,
        '팔' => 8,
        '구' => 9,
        _ => return None,
    })
}

fn parse_sino_korean(word: &str) -> Option<usize> {
    let chars: Vec<char> = word.chars().collect();
    match chars.iter().position(|&c| c == '십') {
        None if chars.len() == 1 => sino_digit(chars[0]),
        None => None,
        Some(pos) => {
            let tens = match &chars[..pos] {
                [] => 1,
                [d] => sino_digit(*d)?,
                _ => return None,
            };
            let units = match &chars[pos + 1..] {
                [] => 0,
                [d] => sino_digit(*d)?,
                _ => return None,
            };
            Some(tens * 10 + units)
        }
    }
}

const NATIVE_TENS: [(&str, usize); 8] = [
    ("열", 10),
    ("스물", 20),
    ("스무", 20),
    ("서른", 30),
    ("마흔", 40),
    ("쉰", 50),
    ("예순", 60),
    ("일흔", 70),
];

const NATIVE_UNITS: [(&str, usize); 13] = [
    ("하나", 1),
    ("한", 1),
    ("둘", 2),
    ("두", 2),
    ("셋", 3),
    ("세", 3),
    ("넷", 4),
    ("네", 4),
    ("다섯", 5),
    ("여섯", 6),
    ("일곱", 7),
    ("여덟", 8),
    ("아홉", 9),
];

fn native_unit(word: &str) -> Option<usize> {
    NATIVE_UNITS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, n)| *n)
}

fn parse_native_korean(word: &str) -> Option<usize> {
    if let Some(n) = native_unit(word) {
        return Some(n);
    }
    for (prefix, tens) in NATIVE_TENS {
        if let Some(rest) = word.strip_prefix(prefix) {
            if rest.is_empty() {
                return Some(tens);
            }
            return native_unit(rest).map(|u| tens + u);
        }
    }
    None
}

const READING_WORDS: [&str; 5] = ["tarot", "reading", "fortune", "타로", "운세"];

/// Rough check for "read my cards" requests, used to answer bystanders
/// locally while someone else holds the reading
pub fn asks_for_reading(text: &str) -> bool {
    let lower = text.to_lowercase();
    READING_WORDS.iter().any(|w| lower.contains(w))
}

const ENGLISH_ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const ENGLISH_TENS: [(&str, usize); 6] = [
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
];

fn parse_english(word: &str) -> Option<usize> {
    if let Some(n) = ENGLISH_ONES.iter().position(|w| *w == word) {
        return Some(n);
    }
    let (tens_word, unit_word) = match word.split_once('-') {
        Some((t, u)) => (t, Some(u)),
        None => (word, None),
    };
    let tens = ENGLISH_TENS
        .iter()
        .find(|(w, _)| *w == tens_word)
        .map(|(_, n)| *n)?;
    match unit_word {
        None => Some(tens),
        Some(u) => {
            let unit = ENGLISH_ONES.iter().position(|w| *w == u)?;
            (1..=9).contains(&unit).then_some(tens + unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asks_for_reading() {
        assert!(asks_for_reading("Tarot for me about love please"));
        assert!(asks_for_reading("타로 봐줘"));
        assert!(asks_for_reading("오늘 운세 어때요"));
        assert!(!asks_for_reading("7 12 40"));
        assert!(!asks_for_reading("hi choco"));
    }

    fn nums(text: &str) -> Vec<usize> {
        parse_selection(text, 78).numbers
    }

    #[test]
    fn test_plain_digits() {
        assert_eq!(nums("5 12 40"), vec![5, 12, 40]);
        assert_eq!(nums("7번이랑 22번, 그리고 3번이요"), vec![7, 22, 3]);
        assert!(nums("no numbers here").is_empty());
    }

    #[test]
    fn test_out_of_range_ignored() {
        assert_eq!(nums("0 50 46 88"), vec![50, 46]);
    }

    #[test]
    fn test_card_counts_are_not_positions() {
        assert_eq!(nums("3장 볼게요 10번 20번 30번"), vec![10, 20, 30]);
        assert!(nums("5개 뽑아주세요").is_empty());
    }

    #[test]
    fn test_duplicate_detected() {
        let parsed = parse_selection("5 5 9", 78);
        assert!(parsed.has_duplicate);
        assert_eq!(parsed.numbers, vec![5, 9]);
        assert!(!parse_selection("5 9", 78).has_duplicate);
    }

    #[test]
    fn test_duplicate_outside_range_ignored() {
        assert!(!parse_selection("99 99 4", 78).has_duplicate);
    }

    #[test]
    fn test_korean_sino_words() {
        assert_eq!(nums("하나 다섯 십삼"), vec![1, 5, 13]);
        assert_eq!(nums("이십칠 칠십팔"), vec![27, 78]);
        assert_eq!(parse_number_word("십"), Some(10));
        assert_eq!(parse_number_word("구십구"), Some(99));
    }

    #[test]
    fn test_korean_native_words_with_suffix() {
        assert_eq!(nums("열한번 스무번째 일번 주세요"), vec![11, 20, 1]);
        assert_eq!(nums("일곱 여덟 아홉"), vec![7, 8, 9]);
        assert_eq!(nums("스물셋 마흔"), vec![23, 40]);
    }

    #[test]
    fn test_reactions_do_not_pick_cards() {
        assert!(nums("오 대박").is_empty());
        assert!(nums("이 카드 예쁘다").is_empty());
        assert!(nums("that one looks nice").is_empty());
    }

    #[test]
    fn test_english_words() {
        assert_eq!(nums("seven and twenty-two"), vec![7, 22]);
        assert_eq!(nums("Three, Nineteen, Seventy-Eight"), vec![3, 19, 78]);
        assert_eq!(parse_number_word("seventy-zero"), None);
    }

    #[test]
    fn test_digits_win_over_words() {
        assert_eq!(nums("하나 말고 33"), vec![33]);
    }

    #[test]
    fn test_word_duplicates_detected() {
        assert!(!parse_selection("다섯 5번 다섯", 78).has_duplicate);
        assert!(parse_selection("다섯 다섯 아홉", 78).has_duplicate);
    }
}
