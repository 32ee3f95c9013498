//! Shared types for the unsubscribe pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ── Classification ──────────────────────────────────────────────────

/// Keep-or-discard label for a promotional message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Important,
    Unimportant,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Important => "IMPORTANT",
            Self::Unimportant => "UNIMPORTANT",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Candidate ───────────────────────────────────────────────────────

/// Where an unsubscribe URL was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// `List-Unsubscribe` header.
    Header,
    /// An HTML link whose visible text contains an unsubscribe keyword.
    HtmlKeywordLink,
    /// An HTML link whose href contains `unsubscribe`.
    HtmlKeywordHref,
}

impl DiscoveryMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::HtmlKeywordLink => "html-keyword-link",
            Self::HtmlKeywordHref => "html-keyword-href",
        }
    }
}

/// A resolved unsubscribe URL, prior to any network attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeCandidate {
    pub url: String,
    pub method: DiscoveryMethod,
}

impl UnsubscribeCandidate {
    pub fn new(url: impl Into<String>, method: DiscoveryMethod) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }
}

// ── Action outcome ──────────────────────────────────────────────────

/// HTTP method used for an unsubscribe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Why a single attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// The endpoint answered with a non-2xx status.
    Status { code: u16 },
    /// No response: timeout, connection or URL error.
    Transport { reason: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { code } => write!(f, "Status: {code}"),
            Self::Transport { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// Result of the GET → POST protocol for one candidate.
///
/// `get_failure` keeps the first leg's failure whenever the POST fallback
/// ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded {
        method: HttpMethod,
        status: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        get_failure: Option<AttemptFailure>,
    },
    Failed {
        method: HttpMethod,
        failure: AttemptFailure,
        get_failure: AttemptFailure,
    },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

// ── Audit trail ─────────────────────────────────────────────────────

/// Typed event appended by the orchestrator, in the order it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Classified {
        sender: String,
        classification: Classification,
    },
    Preserved {
        sender: String,
    },
    LinkResolved {
        sender: String,
        candidate: UnsubscribeCandidate,
    },
    LinkMissing {
        sender: String,
    },
    GetFailed {
        sender: String,
        url: String,
        failure: AttemptFailure,
    },
    ActionSucceeded {
        sender: String,
        url: String,
        method: HttpMethod,
        status: u16,
    },
    ActionFailed {
        sender: String,
        url: String,
        method: HttpMethod,
        failure: AttemptFailure,
    },
    Deleted {
        sender: String,
    },
    DeleteFailed {
        sender: String,
        reason: String,
    },
}

impl AuditEvent {
    /// Human-readable audit line, for terminal events only.
    ///
    /// Classification, preservation and link resolution are intermediate
    /// steps and render to `None`.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Classified { .. } | Self::Preserved { .. } | Self::LinkResolved { .. } => None,
            Self::LinkMissing { sender } => Some(format!("No unsubscribe link found for: {sender}")),
            Self::GetFailed {
                sender,
                url,
                failure,
            } => Some(format!(
                "GET request failed for: {sender} ({url}) [{failure}]. Trying POST..."
            )),
            Self::ActionSucceeded {
                sender,
                url,
                method,
                status,
            } => Some(format!(
                "Unsubscribed from: {sender} ({url}) [{method} {status}]"
            )),
            Self::ActionFailed {
                sender,
                url,
                method,
                failure,
            } => Some(format!(
                "{method} request failed for: {sender} ({url}) [{failure}]"
            )),
            Self::Deleted { .. } => Some("  -> Email moved to trash".to_string()),
            Self::DeleteFailed { reason, .. } => {
                Some(format!("  -> Failed to delete email: {reason}"))
            }
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────

/// Classification tally for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// 1-based batch number.
    pub index: usize,
    pub size: usize,
    pub important: usize,
    pub unimportant: usize,
    /// Messages preserved only because classification failed.
    pub fallbacks: usize,
}

/// Result of a pipeline run.
///
/// Counters only ever grow. At every point,
/// `unsubscribed + preserved + failed == processed()`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Messages handed to the run.
    pub total: usize,
    pub unsubscribed: usize,
    pub preserved: usize,
    pub failed: usize,
    pub batches: Vec<BatchSummary>,
    pub cooldowns: usize,
    pub events: Vec<AuditEvent>,
    pub unsubscribed_senders: Vec<String>,
    pub preserved_senders: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Set when the run stopped early on cancellation.
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            unsubscribed: 0,
            preserved: 0,
            failed: 0,
            batches: Vec::new(),
            cooldowns: 0,
            events: Vec::new(),
            unsubscribed_senders: Vec::new(),
            preserved_senders: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Messages that reached a terminal counter.
    pub fn processed(&self) -> usize {
        self.unsubscribed + self.preserved + self.failed
    }

    pub fn is_empty_run(&self) -> bool {
        self.total == 0
    }

    pub(crate) fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub(crate) fn record_preserved(&mut self, sender: &str) {
        self.preserved += 1;
        self.preserved_senders.push(sender.to_string());
        self.push(AuditEvent::Preserved {
            sender: sender.to_string(),
        });
    }

    pub(crate) fn record_unsubscribed(
        &mut self,
        sender: &str,
        url: &str,
        method: HttpMethod,
        status: u16,
    ) {
        self.unsubscribed += 1;
        self.unsubscribed_senders.push(sender.to_string());
        self.push(AuditEvent::ActionSucceeded {
            sender: sender.to_string(),
            url: url.to_string(),
            method,
            status,
        });
    }

    pub(crate) fn record_failed(&mut self, event: AuditEvent) {
        self.failed += 1;
        self.push(event);
    }

    /// Rendered audit lines, in event order.
    pub fn audit_trail(&self) -> Vec<String> {
        self.events.iter().filter_map(AuditEvent::render).collect()
    }

    /// One-line count summary.
    pub fn summary(&self) -> String {
        if self.is_empty_run() {
            if self.cancelled {
                return "Cancelled before any promotion emails were listed.".to_string();
            }
            return "No promotion emails found.".to_string();
        }
        let mut line = format!(
            "Intelligent unsubscribe completed: {} unsubscribed, {} preserved, {} failed.",
            self.unsubscribed, self.preserved, self.failed
        );
        if self.cancelled {
            line.push_str(&format!(
                " Cancelled after {} of {} emails.",
                self.processed(),
                self.total
            ));
        }
        line
    }

    /// Summary line, then the audit trail, then the sender lists.
    pub fn render(&self) -> String {
        let mut lines = vec![self.summary()];
        lines.extend(self.audit_trail());

        if !self.unsubscribed_senders.is_empty() {
            lines.push(String::new());
            lines.push("Successfully unsubscribed:".to_string());
            lines.extend(numbered(&self.unsubscribed_senders));
        }
        if !self.preserved_senders.is_empty() {
            lines.push(String::new());
            lines.push("Preserved important emails:".to_string());
            lines.extend(numbered(&self.preserved_senders));
        }

        lines.join("\n")
    }
}

fn numbered(senders: &[String]) -> impl Iterator<Item = String> + '_ {
    senders
        .iter()
        .enumerate()
        .map(|(i, sender)| format!("  {}. {}", i + 1, sender))
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
