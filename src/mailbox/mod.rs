//! Mailbox collaborator — message records and the provider seam.
//!
//! Optional message fields are resolved once, at ingestion, into a typed
//! [`Message`]. The pipeline only ever reads messages; trashing goes through
//! [`Mailbox::move_to_trash`].

pub mod imap;
pub mod memory;

pub use imap::{ImapConfig, ImapMailbox};
pub use memory::MemoryMailbox;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// Max characters taken from the plain body when a message has no snippet.
pub const SNIPPET_FALLBACK_CHARS: usize = 200;

// ── Headers ─────────────────────────────────────────────────────────

/// Header map with case-insensitive names.
///
/// Keys are stored lowercased. When a header repeats, the first occurrence
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header unless one with the same name is already present.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// A message as handed over by the mailbox provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Provider-side identity.
    pub id: String,
    pub subject: String,
    /// Sender address (or the raw From value when no address parses).
    pub sender: String,
    /// Provider snippet; may be empty.
    pub snippet: String,
    pub plain: Option<String>,
    pub html: Option<String>,
    pub headers: Headers,
    /// Attachment filenames.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub date: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: impl Into<String>, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_plain(mut self, plain: impl Into<String>) -> Self {
        self.plain = Some(plain.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_attachment(mut self, filename: impl Into<String>) -> Self {
        self.attachments.push(filename.into());
        self
    }

    /// Text handed to the classifier: the snippet, or the head of the plain
    /// body when the provider gave no snippet.
    pub fn classifier_snippet(&self) -> String {
        if !self.snippet.trim().is_empty() {
            return self.snippet.clone();
        }
        self.plain
            .as_deref()
            .map(|body| body.chars().take(SNIPPET_FALLBACK_CHARS).collect())
            .unwrap_or_default()
    }
}

// ── Provider trait ──────────────────────────────────────────────────

/// Mailbox provider — pure I/O, no classification logic.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// List messages matching a provider filter expression. Trashed
    /// messages are never returned.
    async fn list_messages(&self, query: &str) -> Result<Vec<Message>, MailboxError>;

    /// Move a message to the trash.
    async fn move_to_trash(&self, message: &Message) -> Result<(), MailboxError>;
}
