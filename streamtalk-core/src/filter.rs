// ABOUTME: Noise filter for viewer chat: length bounds, bot senders, character floods, URLs, blocked words
// ABOUTME: Filtered messages are still consumed; they are only kept out of the model prompt

use crate::config::FilterConfig;
use crate::message::InboundMessage;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    TooShort,
    TooLong,
    Bot,
    Flood,
    Url,
    Blocked(String),
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => f.write_str("too short"),
            Self::TooLong => f.write_str("too long"),
            Self::Bot => f.write_str("bot sender"),
            Self::Flood => f.write_str("repeated characters"),
            Self::Url => f.write_str("contains a link"),
            Self::Blocked(word) => write!(f, "blocked keyword {:?}", word),
        }
    }
}

fn url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://\S+").ok())
        .as_ref()
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        current = if Some(c) == previous { current + 1 } else { 1 };
        previous = Some(c);
        longest = longest.max(current);
    }
    longest
}

#[derive(Debug, Clone)]
pub struct ChatFilter {
    config: FilterConfig,
    blocked: Vec<String>,
}

impl ChatFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            blocked: config
                .blocked_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            config: config.clone(),
        }
    }

    /// Why the message should stay out of the prompt, if it should.
    /// The channel owner is never filtered.
    pub fn check(&self, message: &InboundMessage) -> Option<FilterReason> {
        if message.is_from_channel_owner {
            return None;
        }
        let text = message.text.trim();
        let length = text.chars().count();
        if length < self.config.min_length {
            return Some(FilterReason::TooShort);
        }
        if length > self.config.max_length {
            return Some(FilterReason::TooLong);
        }

        if self.config.drop_bots {
            let name = message.sender_name.trim().to_lowercase();
            if name.ends_with("bot") || name.ends_with('봇') {
                return Some(FilterReason::Bot);
            }
        }

        if longest_run(text) > self.config.max_repeat {
            return Some(FilterReason::Flood);
        }

        if self.config.drop_urls && url_regex().is_some_and(|re| re.is_match(text)) {
            return Some(FilterReason::Url);
        }

        let lowered = text.to_lowercase();
        self.blocked
            .iter()
            .find(|word| lowered.contains(word.as_str()))
            .map(|word| FilterReason::Blocked(word.clone()))
    }

    pub fn allows(&self, message: &InboundMessage) -> bool {
        match self.check(message) {
            Some(reason) => {
                tracing::debug!(sender = %message.sender_name, %reason, "Filtered chat message");
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ChatFilter {
        ChatFilter::new(&FilterConfig {
            blocked_keywords: vec!["Spoiler".into(), "  ".into()],
            ..Default::default()
        })
    }

    fn msg(name: &str, text: &str) -> InboundMessage {
        InboundMessage::new("id", name, text)
    }

    #[test]
    fn test_ordinary_message_passes() {
        assert!(filter().allows(&msg("alice", "안녕하세요 초코님!")));
    }

    #[test]
    fn test_length_bounds() {
        let f = filter();
        assert_eq!(f.check(&msg("alice", "   ")), Some(FilterReason::TooShort));
        assert_eq!(
            f.check(&msg("alice", &"a b ".repeat(200))),
            Some(FilterReason::TooLong)
        );
    }

    #[test]
    fn test_bot_senders() {
        let f = filter();
        assert_eq!(f.check(&msg("NightBot", "hello")), Some(FilterReason::Bot));
        assert_eq!(f.check(&msg("치즈봇", "hello")), Some(FilterReason::Bot));
        assert_eq!(f.check(&msg("bottle", "hello")), None);
    }

    #[test]
    fn test_character_flood() {
        let f = filter();
        assert_eq!(f.check(&msg("alice", "ㅋㅋㅋㅋㅋㅋㅋㅋㅋㅋ")), None);
        assert_eq!(
            f.check(&msg("alice", "ㅋㅋㅋㅋㅋㅋㅋㅋㅋㅋㅋ")),
            Some(FilterReason::Flood)
        );
    }

    #[test]
    fn test_urls_and_keywords() {
        let f = filter();
        assert_eq!(
            f.check(&msg("alice", "look HTTPS://example.com/x")),
            Some(FilterReason::Url)
        );
        assert_eq!(
            f.check(&msg("alice", "no SPOILERS please")),
            Some(FilterReason::Blocked("spoiler".into()))
        );
    }

    #[test]
    fn test_owner_never_filtered() {
        let owner = msg("streamerbot", "https://my.shop").from_owner();
        assert!(filter().allows(&owner));
    }
}
