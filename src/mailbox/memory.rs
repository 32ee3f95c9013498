//! In-process mailbox, used by tests and local dry runs.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::mailbox::{Mailbox, Message};

struct Entry {
    message: Message,
    trashed: bool,
}

/// Mailbox holding messages in memory. The filter expression is ignored;
/// every non-trashed message is listed.
pub struct MemoryMailbox {
    entries: Mutex<Vec<Entry>>,
    failing_trash: Mutex<HashSet<String>>,
    trash_requests: Mutex<Vec<String>>,
}

impl MemoryMailbox {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            entries: Mutex::new(
                messages
                    .into_iter()
                    .map(|message| Entry {
                        message,
                        trashed: false,
                    })
                    .collect(),
            ),
            failing_trash: Mutex::new(HashSet::new()),
            trash_requests: Mutex::new(Vec::new()),
        }
    }

    /// Make `move_to_trash` fail for the given message id.
    pub fn fail_trash_for(&self, id: &str) {
        lock(&self.failing_trash).insert(id.to_string());
    }

    /// Whether the message has been moved to trash.
    pub fn is_trashed(&self, id: &str) -> bool {
        lock(&self.entries)
            .iter()
            .any(|e| e.message.id == id && e.trashed)
    }

    /// Ids passed to `move_to_trash`, in call order (including failures).
    pub fn trash_requests(&self) -> Vec<String> {
        lock(&self.trash_requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_messages(&self, _query: &str) -> Result<Vec<Message>, MailboxError> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|e| !e.trashed)
            .map(|e| e.message.clone())
            .collect())
    }

    async fn move_to_trash(&self, message: &Message) -> Result<(), MailboxError> {
        lock(&self.trash_requests).push(message.id.clone());

        if lock(&self.failing_trash).contains(&message.id) {
            return Err(MailboxError::Command {
                command: "MOVE".into(),
                reason: format!("trash refused for {}", message.id),
            });
        }

        let mut entries = lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|e| e.message.id == message.id)
            .ok_or_else(|| MailboxError::UnknownMessage {
                id: message.id.clone(),
            })?;
        entry.trashed = true;
        Ok(())
    }
}
