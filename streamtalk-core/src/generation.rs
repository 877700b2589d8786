// ABOUTME: Model calls for replies, interpretations, and summaries with one corrective retry
// ABOUTME: Rate limits abandon the call; malformed output gets exactly one follow-up asking for valid JSON

use crate::config::PersonaConfig;
use crate::deck::Card;
use crate::memory::Summarizer;
use crate::message::ConversationTurn;
use crate::metrics;
use crate::prompt::{Framing, PromptBook};
use crate::reply::{parse_interpretation, parse_reply, Interpretation, ReplyParseError, ReplyResult};
use async_trait::async_trait;
use std::sync::Arc;
use streamtalk_llm::{ChatMessage, CompletionRequest, LlmError, RequestPurpose, SharedModel};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("model is rate limited")]
    RateLimited,
    #[error("model call failed: {0}")]
    Llm(LlmError),
    #[error("model output unusable after retry: {0}")]
    Malformed(ReplyParseError),
}

#[derive(Debug, Clone, Copy)]
pub struct TokenLimits {
    pub reply: u32,
    pub interpretation: u32,
    pub summary: u32,
}

impl From<&PersonaConfig> for TokenLimits {
    fn from(persona: &PersonaConfig) -> Self {
        Self {
            reply: persona.reply_max_tokens,
            interpretation: persona.interpretation_max_tokens,
            summary: persona.summary_max_tokens,
        }
    }
}

impl Default for TokenLimits {
    fn default() -> Self {
        (&PersonaConfig::default()).into()
    }
}

/// Builds requests from prompts and memory, and turns raw output into typed results
#[derive(Clone)]
pub struct ReplyGenerator {
    model: SharedModel,
    prompts: Arc<PromptBook>,
    limits: TokenLimits,
}

impl ReplyGenerator {
    pub fn new(model: SharedModel, prompts: Arc<PromptBook>, limits: TokenLimits) -> Self {
        Self {
            model,
            prompts,
            limits,
        }
    }

    pub fn prompts(&self) -> &PromptBook {
        &self.prompts
    }

    async fn call(&self, request: CompletionRequest) -> Result<String, LlmError> {
        metrics::record_llm_call(request.purpose.as_str());
        let result = self.model.complete(request).await;
        if let Err(e) = &result {
            metrics::record_llm_error(e.kind());
        }
        result
    }

    /// One call, plus one corrective follow-up if the output could not be used
    async fn complete_parsed<T, F>(&self, request: CompletionRequest, parse: F) -> Result<T, GenerationError>
    where
        F: Fn(&str) -> Result<T, ReplyParseError>,
    {
        let purpose = request.purpose;
        let retry = match self.call(request.clone()).await {
            Ok(raw) => match parse(&raw) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::warn!(purpose = %purpose, error = %e, "Unusable model output, retrying once");
                    request
                        .followed_by(ChatMessage::assistant(raw.clone()))
                        .followed_by(ChatMessage::user(self.prompts.correction(None)))
                }
            },
            Err(LlmError::RateLimited { retry_after }) => {
                tracing::warn!(purpose = %purpose, ?retry_after, "Rate limited, abandoning call");
                return Err(GenerationError::RateLimited);
            }
            Err(LlmError::InvalidJson { failed_generation }) => {
                tracing::warn!(purpose = %purpose, "Model JSON validation failed, retrying once");
                request.followed_by(ChatMessage::user(
                    self.prompts.correction(failed_generation.as_deref()),
                ))
            }
            Err(e) => {
                tracing::warn!(purpose = %purpose, error = %e, "Model call failed");
                return Err(GenerationError::Llm(e));
            }
        };

        match self.call(retry).await {
            Ok(raw) => parse(&raw).map_err(|e| {
                tracing::warn!(purpose = %purpose, error = %e, "Model output still unusable");
                GenerationError::Malformed(e)
            }),
            Err(LlmError::RateLimited { .. }) => Err(GenerationError::RateLimited),
            Err(e) => {
                tracing::warn!(purpose = %purpose, error = %e, "Corrective retry failed");
                Err(GenerationError::Llm(e))
            }
        }
    }

    /// One model call covering the whole batch. Ok(None) means the model chose not to answer.
    pub async fn reply(
        &self,
        context: &[ConversationTurn],
        lines: &[String],
        framing: &Framing,
    ) -> Result<Option<ReplyResult>, GenerationError> {
        let mut messages = vec![ChatMessage::system(self.prompts.reply_system(framing))];
        messages.extend(context.iter().map(ConversationTurn::to_chat_message));
        messages.push(ChatMessage::user(self.prompts.reply_user(lines, framing)));

        let purpose = match framing {
            Framing::Selecting { .. } => RequestPurpose::Selection,
            _ => RequestPurpose::Reply,
        };
        let request = CompletionRequest::new(purpose, messages).with_max_tokens(self.limits.reply);
        self.complete_parsed(request, parse_reply).await
    }

    pub async fn interpret(&self, topic: &str, cards: &[Card]) -> Result<Interpretation, GenerationError> {
        let request = CompletionRequest::new(
            RequestPurpose::Interpretation,
            vec![
                ChatMessage::system(self.prompts.interpretation_system()),
                ChatMessage::user(self.prompts.interpretation_user(topic, cards)),
            ],
        )
        .with_max_tokens(self.limits.interpretation);
        self.complete_parsed(request, parse_interpretation).await
    }

    pub fn summarizer(&self) -> ModelSummarizer {
        ModelSummarizer {
            generator: self.clone(),
        }
    }
}

/// Folds evicted turns into the rolling summary through the same model
pub struct ModelSummarizer {
    generator: ReplyGenerator,
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, turns: &[ConversationTurn]) -> anyhow::Result<String> {
        let prompts = &self.generator.prompts;
        let request = CompletionRequest::new(
            RequestPurpose::Summary,
            vec![
                ChatMessage::system(prompts.summary_system()),
                ChatMessage::user(prompts.summary_user(turns)),
            ],
        )
        .with_max_tokens(self.generator.limits.summary)
        .plain_text();

        let summary = self.generator.call(request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            anyhow::bail!("summary came back empty");
        }
        Ok(summary.to_string())
    }
}
