//! Classifier — asks the completion service whether a promotional message
//! is worth keeping.
//!
//! **Fail-safe:** anything other than a literal `UNIMPORTANT` reply,
//! including call failures and timeouts, classifies as `Important`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DEFAULT_CLASSIFY_TIMEOUT;
use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Classification;

/// Max tokens for the label reply.
const CLASSIFY_MAX_TOKENS: u32 = 50;

/// Deterministic labelling.
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Token usage of one classification call. Zero when the call failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Outcome of one classification, with usage for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyResult {
    pub classification: Classification,
    pub usage: ClassifyUsage,
    /// True when the label is the fail-safe default: call failed, timed
    /// out, or the reply was not a label.
    pub fell_back: bool,
}

/// Single-attempt LLM classifier.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            timeout: DEFAULT_CLASSIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Classify one message. Never fails.
    pub async fn classify(&self, subject: &str, sender: &str, snippet: &str) -> Classification {
        self.classify_with_usage(subject, sender, snippet)
            .await
            .classification
    }

    /// Classify one message and report token usage.
    pub async fn classify_with_usage(
        &self,
        subject: &str,
        sender: &str,
        snippet: &str,
    ) -> ClassifyResult {
        match self.try_classify(subject, sender, snippet).await {
            Ok(result) => {
                debug!(sender, classification = %result.classification, "Classified");
                result
            }
            Err(e) => {
                warn!(sender, error = %e, "Classification failed, preserving email");
                ClassifyResult {
                    classification: Classification::Important,
                    usage: ClassifyUsage::default(),
                    fell_back: true,
                }
            }
        }
    }

    async fn try_classify(
        &self,
        subject: &str,
        sender: &str,
        snippet: &str,
    ) -> Result<ClassifyResult, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classification_system_prompt()),
            ChatMessage::user(build_classification_user_prompt(subject, sender, snippet)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| PipelineError::ClassificationTimeout(self.timeout))??;

        let usage = ClassifyUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        match parse_classification(&response.content) {
            Ok(classification) => Ok(ClassifyResult {
                classification,
                usage,
                fell_back: false,
            }),
            Err(e) => {
                // Unrecognized text still counts toward usage.
                warn!(sender, raw = %response.content, error = %e, "Unrecognized label, preserving email");
                Ok(ClassifyResult {
                    classification: Classification::Important,
                    usage,
                    fell_back: true,
                })
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Fixed instruction context with the two label categories.
fn build_classification_system_prompt() -> String {
    "You are an email assistant that classifies promotional emails as IMPORTANT or UNIMPORTANT.\n\n\
     IMPORTANT emails include:\n\
     - Educational content\n\
     - Professional development\n\
     - Job opportunities and career-related\n\
     - Research and academic content\n\n\
     UNIMPORTANT emails include:\n\
     - Courses, learning\n\
     - Generic promotional content\n\
     - Newsletters from unknown sources\n\
     - Health and wellness content\n\
     - Technology updates and tutorials\n\
     - Generic marketing promotions\n\
     - Sales and discounts\n\
     - Entertainment newsletters\n\
     - Spam-like content\n\
     - Unsolicited offers\n\
     - Event invitations\n\
     - Survey requests\n\
     - Social media notifications\n\
     - Unsolicited newsletters\n\
     - Unrelated content\n\
     - Industry news and insights\n\
     - Financial/investment newsletters\n\n\
     Classify the email based on the subject, sender, and snippet.\n\
     Respond with only: IMPORTANT or UNIMPORTANT"
        .to_string()
}

/// Variable context for one message.
fn build_classification_user_prompt(subject: &str, sender: &str, snippet: &str) -> String {
    format!("Subject: {subject}\nSender: {sender}\nSnippet: {snippet}")
}

// ── Response parsing ────────────────────────────────────────────────

/// Map a raw reply to a label after trimming and upper-casing.
fn parse_classification(raw: &str) -> Result<Classification, PipelineError> {
    let normalized = raw.trim().to_uppercase();
    match normalized.as_str() {
        "UNIMPORTANT" => Ok(Classification::Unimportant),
        "IMPORTANT" => Ok(Classification::Important),
        _ => Err(PipelineError::UnrecognizedLabel(normalized)),
    }
}
