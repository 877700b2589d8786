// ABOUTME: Parses model output into a validated ReplyResult or Interpretation
// ABOUTME: Actions become a tagged enum here so nothing downstream handles raw strings

use crate::message::Emotion;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SOUL_COLOR: &str = "#a855f7";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplyParseError {
    #[error("model output is empty")]
    Empty,
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("model output has the wrong shape: {0}")]
    Shape(String),
}

/// Session side effect requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyAction {
    #[default]
    None,
    StartTopicQuestion {
        requester: Option<String>,
    },
    StartSelection {
        topic: String,
        count: usize,
        requester: Option<String>,
    },
    CancelSession,
}

impl ReplyAction {
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            Self::StartTopicQuestion { .. } | Self::StartSelection { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyResult {
    pub text: String,
    pub emotion: Emotion,
    pub action: ReplyAction,
    pub tts_text: Option<String>,
}

impl ReplyResult {
    pub fn new(text: impl Into<String>, emotion: Emotion) -> Self {
        Self {
            text: text.into(),
            emotion,
            action: ReplyAction::None,
            tts_text: None,
        }
    }

    /// What the synthesizer should read
    pub fn spoken_text(&self) -> &str {
        self.tts_text.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default, alias = "response")]
    text: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    tts_text: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default, alias = "tarot_question")]
    topic: Option<String>,
    #[serde(default, alias = "tarot_spread_count")]
    item_count: Option<Value>,
    #[serde(default)]
    requester: Option<String>,
    #[serde(default, alias = "tarot_cancel")]
    cancel: Option<bool>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn count_from(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawReply {
    fn action(&self) -> ReplyAction {
        if self.cancel == Some(true) {
            return ReplyAction::CancelSession;
        }
        let requester = non_empty(self.requester.clone());
        let name = self
            .action
            .as_deref()
            .map(|a| a.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match name.as_str() {
            "start_topic_question" | "ask_topic" | "tarot_ask_question" => {
                ReplyAction::StartTopicQuestion { requester }
            }
            "start_selection" | "tarot" => match non_empty(self.topic.clone()) {
                Some(topic) => ReplyAction::StartSelection {
                    topic,
                    count: crate::session::clamp_spread(
                        count_from(self.item_count.as_ref()).or(Some(3)),
                    ),
                    requester,
                },
                // A selection without a topic still needs one
                None => ReplyAction::StartTopicQuestion { requester },
            },
            "cancel" | "cancel_session" | "tarot_cancel" => ReplyAction::CancelSession,
            _ => ReplyAction::None,
        }
    }
}

/// Strip markdown fences, then fall back to the outermost braces
pub fn extract_json(raw: &str) -> Result<Value, ReplyParseError> {
    let mut text = raw.trim();
    if text.is_empty() {
        return Err(ReplyParseError::Empty);
    }
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    let text = text.trim();

    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(first) => match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if end > start => serde_json::from_str(&text[start..=end])
                .map_err(|e| ReplyParseError::InvalidJson(e.to_string())),
            _ => Err(ReplyParseError::InvalidJson(first.to_string())),
        },
    }
}

/// Parse a reply payload.
///
/// Accepts `{"replies": [..]}`, a bare array, or a single reply object. Only
/// the first reply is used; an empty list or empty text means "no reply".
pub fn parse_reply(raw: &str) -> Result<Option<ReplyResult>, ReplyParseError> {
    let value = extract_json(raw)?;
    let first = match value {
        Value::Object(mut map) => match map.remove("replies") {
            Some(Value::Array(items)) => items.into_iter().next(),
            Some(Value::Null) => None,
            Some(other) => {
                return Err(ReplyParseError::Shape(format!(
                    "replies must be an array, got {}",
                    other
                )))
            }
            None => Some(Value::Object(map)),
        },
        Value::Array(items) => items.into_iter().next(),
        other => {
            return Err(ReplyParseError::Shape(format!(
                "expected an object, got {}",
                other
            )))
        }
    };

    let Some(item) = first else {
        return Ok(None);
    };
    let raw_reply: RawReply =
        serde_json::from_value(item).map_err(|e| ReplyParseError::Shape(e.to_string()))?;

    let action = raw_reply.action();
    let tts_text = non_empty(raw_reply.tts_text.clone());
    let Some(text) = non_empty(raw_reply.text.clone()).or_else(|| tts_text.clone()) else {
        if action != ReplyAction::None {
            // Nothing to say the action out loud with; worth the corrective retry
            return Err(ReplyParseError::Shape(format!("{:?} without reply text", action)));
        }
        return Ok(None);
    };
    Ok(Some(ReplyResult {
        text,
        emotion: Emotion::parse_lenient(raw_reply.emotion.as_deref().unwrap_or_default()),
        action,
        tts_text,
    }))
}

// =============================================================================
// Interpretation
// =============================================================================

/// Chart shown beside the revealed cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "visual_type", rename_all = "snake_case")]
pub enum VisualData {
    YesNo { recommendation: String, score: u8 },
    Bar { labels: Vec<String>, scores: Vec<u8> },
    Radar { labels: Vec<String>, scores: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    #[serde(rename = "interpretation")]
    pub text: String,
    pub tts_text: Option<String>,
    pub visual_data: Option<VisualData>,
    pub soul_color: String,
    pub danger_alert: bool,
}

impl Default for Interpretation {
    fn default() -> Self {
        Self {
            text: String::new(),
            tts_text: None,
            visual_data: None,
            soul_color: DEFAULT_SOUL_COLOR.to_string(),
            danger_alert: false,
        }
    }
}

impl Interpretation {
    pub fn spoken_text(&self) -> &str {
        self.tts_text.as_deref().unwrap_or(&self.text)
    }
}

fn score(value: &Value) -> Option<u8> {
    let n = value.as_f64()?;
    Some(n.clamp(0.0, 100.0).round() as u8)
}

/// Undo a model gluing two-digit scores into one integer, e.g. [4080] for two labels
fn recover_concatenated(scores: &[Value], label_count: usize) -> Option<Vec<u8>> {
    let [single] = scores else {
        return None;
    };
    let digits = single.as_u64()?.to_string();
    if label_count < 2 || digits.len() != label_count * 2 {
        return None;
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()?
                .parse::<u8>()
                .ok()
                .map(|n| n.min(100))
        })
        .collect()
}

/// Keep only chart data that can actually be drawn
pub fn validate_visual(value: &Value) -> Option<VisualData> {
    let kind = value.get("visual_type").and_then(Value::as_str).unwrap_or("");

    if kind == "yes_no" {
        let recommendation = value
            .get("recommendation")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())?;
        let score = value.get("score").and_then(score).unwrap_or(50);
        return Some(VisualData::YesNo {
            recommendation,
            score,
        });
    }

    let labels: Vec<String> = value
        .get("labels")?
        .as_array()?
        .iter()
        .map(|l| l.as_str().map(str::to_string))
        .collect::<Option<_>>()?;
    let raw_scores = value.get("scores")?.as_array()?;
    let scores = match recover_concatenated(raw_scores, labels.len()) {
        Some(recovered) => recovered,
        None => raw_scores.iter().map(score).collect::<Option<_>>()?,
    };
    if labels.len() != scores.len() || scores.len() < 2 {
        tracing::debug!(labels = labels.len(), scores = scores.len(), "Dropping unusable chart data");
        return None;
    }

    Some(if kind == "bar" {
        VisualData::Bar { labels, scores }
    } else {
        VisualData::Radar { labels, scores }
    })
}

pub fn parse_interpretation(raw: &str) -> Result<Interpretation, ReplyParseError> {
    let value = extract_json(raw)?;
    let Value::Object(map) = &value else {
        return Err(ReplyParseError::Shape("expected an object".to_string()));
    };
    let text = map
        .get("interpretation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ReplyParseError::Shape("missing interpretation".to_string()))?;

    Ok(Interpretation {
        text: text.to_string(),
        tts_text: map
            .get("tts_text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        visual_data: map.get("visual_data").and_then(validate_visual),
        soul_color: map
            .get("soul_color")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SOUL_COLOR)
            .to_string(),
        danger_alert: map
            .get("danger_alert")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
