// ABOUTME: Rewrites reply text before it reaches the speech engine
// ABOUTME: Drops chat jamo like ㅋㅋ and spells card numbers and counts as Korean words

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Spoken instead of text made only of chat jamo
pub const PLACEHOLDER: &str = ".";

const SINO_DIGITS: [&str; 10] = ["", "일", "이", "삼", "사", "오", "육", "칠", "팔", "구"];
const NATIVE_COUNTS: [&str; 11] = [
    "", "한", "두", "세", "네", "다섯", "여섯", "일곱", "여덟", "아홉", "열",
];

fn jamo_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ㅋ+|ㅎ+|ㄷㄷ|ㅠ+|ㅜ+|ㅡ+").ok())
        .as_ref()
}

fn space_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

fn position_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)\s*번").ok()).as_ref()
}

fn count_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)\s*개").ok()).as_ref()
}

/// Sino-Korean reading for 1..=99, e.g. 78 -> 칠십팔
fn sino_korean(n: usize) -> String {
    let (tens, ones) = (n / 10, n % 10);
    let mut out = String::new();
    if tens > 1 {
        out.push_str(SINO_DIGITS[tens]);
    }
    if tens >= 1 {
        out.push('십');
    }
    out.push_str(SINO_DIGITS[ones]);
    out
}

fn replace_numbers(
    text: &str,
    re: Option<&'static Regex>,
    max: usize,
    word: impl Fn(usize) -> String,
    suffix: &str,
) -> String {
    let Some(re) = re else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        match caps[1].parse::<usize>() {
            Ok(n) if (1..=max).contains(&n) => format!("{} {}", word(n), suffix),
            _ => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Prepare reply text for synthesis. Blank input is returned unchanged.
pub fn text_for_tts(text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut s = match jamo_regex() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    if let Some(re) = space_regex() {
        s = re.replace_all(&s, " ").into_owned();
    }
    let s = s.trim();
    if s.is_empty() {
        return PLACEHOLDER.to_string();
    }

    let s = replace_numbers(s, position_regex(), 78, sino_korean, "번");
    replace_numbers(&s, count_regex(), 10, |n| NATIVE_COUNTS[n].to_string(), "개")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sino_korean_readings() {
        assert_eq!(sino_korean(1), "일");
        assert_eq!(sino_korean(10), "십");
        assert_eq!(sino_korean(11), "십일");
        assert_eq!(sino_korean(20), "이십");
        assert_eq!(sino_korean(78), "칠십팔");
    }

    #[test]
    fn test_strips_chat_jamo() {
        assert_eq!(text_for_tts("좋아요ㅋㅋㅋ 진짜ㅎㅎ"), "좋아요 진짜");
        assert_eq!(text_for_tts("ㄷㄷ 무서워ㅠㅠ"), "무서워");
        assert_eq!(text_for_tts("음ㅡㅡ 글쎄ㅜ"), "음 글쎄");
    }

    #[test]
    fn test_all_jamo_becomes_placeholder() {
        assert_eq!(text_for_tts("ㅋㅋㅋㅋ"), PLACEHOLDER);
        assert_eq!(text_for_tts("ㅠㅠ ㅋㅋ"), PLACEHOLDER);
    }

    #[test]
    fn test_blank_text_unchanged() {
        assert_eq!(text_for_tts(""), "");
        assert_eq!(text_for_tts("   "), "   ");
    }

    #[test]
    fn test_card_positions_read_as_words() {
        assert_eq!(text_for_tts("7번이랑 78번 고르셨네요"), "칠 번이랑 칠십팔 번 고르셨네요");
        assert_eq!(text_for_tts("12 번 카드"), "십이 번 카드");
        // Out of deck range stays as digits
        assert_eq!(text_for_tts("99번"), "99번");
    }

    #[test]
    fn test_counts_read_as_native_words() {
        assert_eq!(text_for_tts("카드 3개 골라주세요"), "카드 세 개 골라주세요");
        assert_eq!(text_for_tts("10개"), "열 개");
        assert_eq!(text_for_tts("11개"), "11개");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(text_for_tts("hello there"), "hello there");
    }
}
