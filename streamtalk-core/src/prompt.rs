// ABOUTME: System prompts, per-phase framing notes, and the canned lines spoken without a model call
// ABOUTME: An optional character sheet is prepended to every system prompt

use crate::config::PersonaConfig;
use crate::deck::Card;
use crate::message::ConversationTurn;
use crate::session::Phase;
use anyhow::{Context, Result};
use std::path::Path;

const REPLY_FORMAT: &str = r#"Respond with JSON only, on one line, no markdown:
{"replies": [{"text": "one short sentence shown on screen", "tts_text": "the same sentence phrased to sound natural when read aloud (optional)", "emotion": "happy|sad|angry|surprised|neutral|excited", "action": "start_topic_question|start_selection|cancel (omit for ordinary chat)", "topic": "reading topic when action is start_selection", "item_count": 1, "requester": "viewer name the action is for"}]}
Return at most one reply. Leave "replies" empty only when nothing deserves an answer."#;

const REPLY_RULES: &str = "The user message lists chat lines that arrived while you were talking, as `name: text`. \
Ignore spam and flooding, merge repeated questions, and answer everything worth answering in one reply. \
Even a short line deserves a short answer.\n\n\
Card readings:\n\
- A viewer asks for a reading without a topic: only ask what the reading should be about. Never ask for card numbers yet. Use action \"start_topic_question\".\n\
- A viewer asks for a reading and names a topic: say you will read for that topic and ask them to pick card numbers from 1 to 78. \
Use action \"start_selection\" with \"topic\" and \"item_count\": 1 for yes/no questions, 3 for simple topics, 5 for long-term or complex ones. \
If the viewer asked for a specific number of cards, use that.\n\
- Otherwise omit the action.";

const SELECTION_RULES: &str = "A card reading is waiting for the requester to pick numbers. \
Their message did not contain usable card numbers. \
If they want to stop the reading, use action \"cancel\" and say goodbye politely. \
Otherwise explain briefly why the numbers were not recognised and ask again.";

const INTERPRETATION_SYSTEM: &str = r##"You are a tarot reader. Interpret the drawn cards for the question and answer with JSON only:
{"interpretation": "...", "tts_text": "...", "visual_data": {...}, "soul_color": "#RRGGBB", "danger_alert": false}
visual_data rules:
1. Yes/no questions: {"visual_type": "yes_no", "recommendation": "YES" or "NO" or "SEMI-YES", "score": 0-100}
2. Choosing between options: {"visual_type": "bar", "labels": ["option A", "option B"], "scores": [70, 30]}
3. General fortune: {"visual_type": "radar", "labels": ["money", "love", "health", "work", "people"], "scores": [80, 70, 60, 90, 75]}
"scores" is always a JSON array with exactly one number (0-100) per label. Never merge scores into a single number."##;

const SUMMARY_SYSTEM: &str = "Summarise the following conversation in one short paragraph. \
Keep the important context, recurring viewers, and open topics.";

const SUMMARY_INPUT_LIMIT: usize = 8000;
const FAILED_GENERATION_LIMIT: usize = 2000;

/// What the model should know about the reading state for this batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// No reading in progress
    Open,
    /// The requester was asked what the reading should be about
    AskingTopic { requester_name: String },
    /// Requester spoke during selection but gave no usable numbers
    Selecting {
        requester_name: String,
        spread_count: usize,
        selected: Vec<usize>,
    },
    /// Someone else holds the reading; start requests must be declined
    Busy { requester_name: String, phase: Phase },
    /// Readings are switched off
    ReadingDisabled,
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn join_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default)]
pub struct PromptBook {
    persona_name: String,
    character: String,
}

impl PromptBook {
    pub fn new(persona_name: impl Into<String>, character: impl Into<String>) -> Self {
        Self {
            persona_name: persona_name.into(),
            character: character.into().trim().to_string(),
        }
    }

    /// Load the character sheet named by the persona config, if any
    pub fn load(persona: &PersonaConfig) -> Result<Self> {
        let character = match &persona.character_file {
            Some(file) if Path::new(file).exists() => std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read character file {}", file))?,
            Some(file) => {
                tracing::warn!(path = %file, "Character file not found, using bare prompts");
                String::new()
            }
            None => String::new(),
        };
        if !character.trim().is_empty() {
            tracing::info!(persona = %persona.name, "Loaded character sheet");
        }
        Ok(Self::new(persona.name.clone(), character))
    }

    pub fn persona_name(&self) -> &str {
        &self.persona_name
    }

    fn with_character(&self, base: &str) -> String {
        if self.character.is_empty() {
            base.to_string()
        } else {
            format!("{}\n\n{}", self.character, base)
        }
    }

    pub fn reply_system(&self, framing: &Framing) -> String {
        let rules = match framing {
            Framing::Selecting { .. } => SELECTION_RULES,
            _ => REPLY_RULES,
        };
        let base = format!(
            "You are {}, a live stream host chatting with viewers.\n{}\n\n{}",
            self.persona_name, rules, REPLY_FORMAT
        );
        self.with_character(&base)
    }

    /// User message: the batch plus the framing note for the current phase
    pub fn reply_user(&self, lines: &[String], framing: &Framing) -> String {
        let mut content = format!("Chat:\n{}", lines.join("\n"));
        if let Some(note) = framing_note(framing) {
            content.push_str("\n\n");
            content.push_str(&note);
        }
        content
    }

    pub fn interpretation_system(&self) -> String {
        self.with_character(INTERPRETATION_SYSTEM)
    }

    pub fn interpretation_user(&self, topic: &str, cards: &[Card]) -> String {
        let drawn = cards
            .iter()
            .map(Card::describe)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Question: {}\nCards drawn: {}\nInclude visual_data that fits the question.",
            topic, drawn
        )
    }

    pub fn summary_system(&self) -> &'static str {
        SUMMARY_SYSTEM
    }

    pub fn summary_user(&self, turns: &[ConversationTurn]) -> String {
        let text = turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    crate::message::TurnRole::User => "user",
                    crate::message::TurnRole::Assistant => "assistant",
                    crate::message::TurnRole::System => "system",
                };
                format!("{}: {}", role, t.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        truncate_chars(&text, SUMMARY_INPUT_LIMIT).to_string()
    }

    /// Follow-up asking the model to repeat its answer as valid JSON
    pub fn correction(&self, failed_generation: Option<&str>) -> String {
        match failed_generation.map(str::trim).filter(|s| !s.is_empty()) {
            Some(failed) => format!(
                "[JSON validation failed] The output below was not valid JSON. \
                 Output the same content again as a single line of valid JSON, no markdown or commentary.\n\n\
                 Failed output:\n{}",
                truncate_chars(failed, FAILED_GENERATION_LIMIT)
            ),
            None => "[JSON validation failed] Your previous answer did not match the requested format. \
                     Output only the requested JSON on a single line, no markdown or commentary."
                .to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Canned lines
    // -------------------------------------------------------------------------

    pub fn restart_selection(&self, spread_count: usize) -> String {
        format!(
            "There was a repeated number. Let's start over: please pick {} different cards from 1 to 78.",
            spread_count
        )
    }

    pub fn selection_progress(&self, selected: &[usize], remaining: usize) -> String {
        let noun = if remaining == 1 { "card" } else { "cards" };
        format!(
            "Got {}. Pick {} more {}.",
            join_numbers(selected),
            remaining,
            noun
        )
    }

    pub fn cards_chosen(&self, cards: &[Card]) -> String {
        let names = cards
            .iter()
            .map(Card::display_name)
            .collect::<Vec<_>>()
            .join(", ");
        format!("You drew {}. Let me read them for you.", names)
    }

    /// Told to bystanders who asked for a reading in the same batch as the requester
    pub fn reading_deferral(&self, names: &[String], requester_name: &str) -> String {
        format!(
            "{}, I'm reading for {} right now, so please ask again once we're done.",
            names.join(", "),
            requester_name
        )
    }

    pub fn reading_failed(&self) -> String {
        "Sorry, the cards went quiet on me. Let's try again another time.".to_string()
    }

    pub fn expiry_apology(&self, requester_name: &str, phase: Phase) -> String {
        match phase {
            Phase::AskingTopic => format!(
                "{}, I didn't hear a topic in time, so I've put the cards away. Ask again whenever you like!",
                requester_name
            ),
            _ => format!(
                "{}, time ran out for picking cards, so I've closed the reading. Sorry about that!",
                requester_name
            ),
        }
    }
}

fn framing_note(framing: &Framing) -> Option<String> {
    match framing {
        Framing::Open => None,
        Framing::AskingTopic { requester_name } => Some(format!(
            "[Reading: you asked {} what the reading should be about, and the chat above is the answer. \
             If they named a topic, use action \"start_selection\" with the topic and item_count (1-5) \
             and ask them to pick that many numbers from 1 to 78. If they declined or gave no topic, \
             answer normally without an action.]",
            requester_name
        )),
        Framing::Selecting {
            requester_name,
            spread_count,
            selected,
        } => {
            let chosen = if selected.is_empty() {
                "none yet".to_string()
            } else {
                join_numbers(selected)
            };
            Some(format!(
                "[Reading for {}: {} cards needed, already chosen: {}.]",
                requester_name, spread_count, chosen
            ))
        }
        Framing::Busy {
            requester_name,
            phase,
        } => Some(format!(
            "[A reading for {} is in progress ({}). Anyone else asking for a reading must be told politely \
             that someone else is being read for right now. Never include an action.]",
            requester_name, phase
        )),
        Framing::ReadingDisabled => Some(
            "[Card readings are switched off today. Politely decline any request for a reading right now \
             and never include an action. Questions about when readings will be back can be answered normally.]"
                .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TurnRole;

    #[test]
    fn test_character_sheet_prepended() {
        let book = PromptBook::new("Choco", "  You are a cheerful cat.  ");
        let system = book.reply_system(&Framing::Open);
        assert!(system.starts_with("You are a cheerful cat.\n\nYou are Choco"));
        assert!(PromptBook::new("Choco", "")
            .interpretation_system()
            .starts_with("You are a tarot reader"));
    }

    #[test]
    fn test_interpretation_prompt_keeps_every_visual_rule() {
        let system = PromptBook::new("Choco", "").interpretation_system();
        assert!(system.contains(r##""soul_color": "#RRGGBB""##));
        assert!(system.contains(r#""visual_type": "radar""#));
        assert!(system.ends_with("Never merge scores into a single number."));
    }

    #[test]
    fn test_load_missing_character_file_is_not_fatal() {
        let persona = PersonaConfig {
            character_file: Some("/nonexistent/character.txt".into()),
            ..Default::default()
        };
        let book = PromptBook::load(&persona).unwrap();
        assert_eq!(book.persona_name(), "Choco");
        assert!(!book.reply_system(&Framing::Open).contains("\n\n\n"));
    }

    #[test]
    fn test_reply_user_includes_all_lines_and_framing() {
        let book = PromptBook::default();
        let lines = vec!["alice: hi".to_string(), "bob: hi".to_string()];
        let open = book.reply_user(&lines, &Framing::Open);
        assert_eq!(open, "Chat:\nalice: hi\nbob: hi");

        let busy = book.reply_user(
            &lines,
            &Framing::Busy {
                requester_name: "carol".into(),
                phase: Phase::Selecting,
            },
        );
        assert!(busy.contains("reading for carol is in progress (selecting)"));
    }

    #[test]
    fn test_correction_truncates_failed_output() {
        let book = PromptBook::default();
        let long = "x".repeat(5000);
        let msg = book.correction(Some(&long));
        assert!(msg.ends_with(&"x".repeat(FAILED_GENERATION_LIMIT)));
        assert!(!msg.contains(&"x".repeat(FAILED_GENERATION_LIMIT + 1)));
        assert!(book.correction(None).contains("did not match"));
    }

    #[test]
    fn test_summary_input_is_bounded() {
        let book = PromptBook::default();
        let turns = vec![ConversationTurn::new(TurnRole::User, "가".repeat(10_000))];
        assert_eq!(book.summary_user(&turns).chars().count(), SUMMARY_INPUT_LIMIT);
    }

    #[test]
    fn test_canned_lines() {
        let book = PromptBook::default();
        assert!(book.restart_selection(3).contains("pick 3 different cards"));
        assert_eq!(book.selection_progress(&[5, 9], 1), "Got 5, 9. Pick 1 more card.");
        assert!(book
            .expiry_apology("alice", Phase::Selecting)
            .starts_with("alice, time ran out"));
    }
}
