//! Error types for inbox-sweep.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Completion-service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Mailbox collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Login failed for {username}")]
    AuthFailed { username: String },

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Message {id} is not known to this mailbox")]
    UnknownMessage { id: String },

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level HTTP errors (no response received).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// Classification errors. None of these abort a run; the classifier folds
/// them into the fail-safe label.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification timed out after {0:?}")]
    ClassificationTimeout(Duration),

    #[error("Unrecognized classification reply: '{0}'")]
    UnrecognizedLabel(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_converts_into_pipeline_error() {
        let err: PipelineError = LlmError::RequestFailed {
            provider: "anthropic".into(),
            reason: "503".into(),
        }
        .into();
        assert!(matches!(err, PipelineError::Llm(_)));
        assert_eq!(
            err.to_string(),
            "LLM error: Provider anthropic request failed: 503"
        );
    }

    #[test]
    fn http_error_display_includes_url() {
        let err = HttpError::Timeout {
            url: "https://x.com/u".into(),
        };
        assert_eq!(err.to_string(), "request to https://x.com/u timed out");
    }
}
