//! Batch orchestrator — drives classify → resolve → unsubscribe → trash
//! over the whole message set.
//!
//! Per run: `BATCH(i) → CLASSIFY_ALL(i) → DISPATCH(i) → COOLDOWN → …`.
//! Classification within a batch runs concurrently (bounded, results kept
//! in input order); dispatch is sequential in input order, so the audit
//! trail is deterministic for a fixed input and fixed external answers.
//!
//! Cancellation is checked while listing, before each dispatch, and during
//! classification and cooldown. A message is counted only once its dispatch completes, so
//! a cancelled report still satisfies `unsubscribed + preserved + failed
//! == processed()`.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::error::MailboxError;
use crate::mailbox::{Mailbox, Message};
use crate::pipeline::actor::UnsubscribeActor;
use crate::pipeline::classifier::{ClassifyResult, Classifier};
use crate::pipeline::resolver;
use crate::pipeline::types::{ActionOutcome, AuditEvent, BatchReport, BatchSummary, Classification};

/// Runs the unsubscribe pipeline in fixed-size batches.
pub struct BatchOrchestrator {
    classifier: Classifier,
    actor: UnsubscribeActor,
    mailbox: Arc<dyn Mailbox>,
    config: SweepConfig,
}

impl BatchOrchestrator {
    pub fn new(
        classifier: Classifier,
        actor: UnsubscribeActor,
        mailbox: Arc<dyn Mailbox>,
        config: SweepConfig,
    ) -> Self {
        Self {
            classifier,
            actor,
            mailbox,
            config,
        }
    }

    /// List messages with the configured query and run over them.
    pub async fn sweep(&self, token: &CancellationToken) -> Result<BatchReport, MailboxError> {
        let messages = tokio::select! {
            _ = token.cancelled() => {
                warn!(mailbox = self.mailbox.name(), "Sweep cancelled while listing");
                let mut report = BatchReport::new(0);
                report.cancelled = true;
                report.finished_at = Some(Utc::now());
                return Ok(report);
            }
            listed = self.mailbox.list_messages(&self.config.query) => listed?,
        };
        info!(
            mailbox = self.mailbox.name(),
            query = %self.config.query,
            count = messages.len(),
            "Listed promotion emails"
        );
        Ok(self.run(&messages, token).await)
    }

    /// Run the pipeline over `messages`. Never fails; per-message errors
    /// are folded into the report.
    pub async fn run(&self, messages: &[Message], token: &CancellationToken) -> BatchReport {
        let mut report = BatchReport::new(messages.len());

        if messages.is_empty() {
            info!("No promotion emails found");
            report.finished_at = Some(Utc::now());
            return report;
        }

        let batch_size = self.config.batch_size.max(1);
        let batch_count = messages.len().div_ceil(batch_size);

        'batches: for (i, batch) in messages.chunks(batch_size).enumerate() {
            let index = i + 1;
            debug!(batch = index, of = batch_count, size = batch.len(), "Classifying batch");

            let results = tokio::select! {
                _ = token.cancelled() => {
                    report.cancelled = true;
                    break 'batches;
                }
                results = self.classify_batch(batch) => results,
            };

            let summary = summarize(index, &results);
            info!(
                batch = index,
                of = batch_count,
                size = summary.size,
                important = summary.important,
                unimportant = summary.unimportant,
                fallbacks = summary.fallbacks,
                "Batch classified"
            );
            for result in &results {
                report.input_tokens += u64::from(result.usage.input_tokens);
                report.output_tokens += u64::from(result.usage.output_tokens);
            }
            report.batches.push(summary);

            for (message, result) in batch.iter().zip(&results) {
                if token.is_cancelled() {
                    report.cancelled = true;
                    break 'batches;
                }
                self.dispatch(message, result.classification, &mut report)
                    .await;
            }

            if index < batch_count {
                debug!(batch = index, cooldown = ?self.config.cooldown, "Cooling down");
                report.cooldowns += 1;
                tokio::select! {
                    _ = token.cancelled() => {
                        report.cancelled = true;
                        break 'batches;
                    }
                    _ = tokio::time::sleep(self.config.cooldown) => {}
                }
            }
        }

        report.finished_at = Some(Utc::now());

        if report.cancelled {
            warn!(
                processed = report.processed(),
                total = report.total,
                "Sweep cancelled"
            );
        }
        info!(
            unsubscribed = report.unsubscribed,
            preserved = report.preserved,
            failed = report.failed,
            input_tokens = report.input_tokens,
            output_tokens = report.output_tokens,
            "Sweep finished"
        );
        report
    }

    /// Classify a whole batch, results in input order.
    async fn classify_batch(&self, batch: &[Message]) -> Vec<ClassifyResult> {
        stream::iter(batch)
            .map(|message| {
                let snippet = message.classifier_snippet();
                async move {
                    self.classifier
                        .classify_with_usage(&message.subject, &message.sender, &snippet)
                        .await
                }
            })
            .buffered(self.config.effective_concurrency())
            .collect()
            .await
    }

    /// Take one classified message to its terminal counter.
    async fn dispatch(
        &self,
        message: &Message,
        classification: Classification,
        report: &mut BatchReport,
    ) {
        let sender = message.sender.as_str();
        report.push(AuditEvent::Classified {
            sender: sender.to_string(),
            classification,
        });

        if classification == Classification::Important {
            debug!(sender, "Preserving important email");
            report.record_preserved(sender);
            return;
        }

        let Some(candidate) = resolver::resolve(message) else {
            info!(sender, "No unsubscribe link found");
            report.record_failed(AuditEvent::LinkMissing {
                sender: sender.to_string(),
            });
            return;
        };
        report.push(AuditEvent::LinkResolved {
            sender: sender.to_string(),
            candidate: candidate.clone(),
        });

        match self.actor.attempt(&candidate).await {
            ActionOutcome::Succeeded {
                method,
                status,
                get_failure,
            } => {
                if let Some(failure) = get_failure {
                    report.push(AuditEvent::GetFailed {
                        sender: sender.to_string(),
                        url: candidate.url.clone(),
                        failure,
                    });
                }
                report.record_unsubscribed(sender, &candidate.url, method, status);
                match self.mailbox.move_to_trash(message).await {
                    Ok(()) => report.push(AuditEvent::Deleted {
                        sender: sender.to_string(),
                    }),
                    Err(e) => {
                        warn!(sender, id = %message.id, error = %e, "Failed to trash email");
                        report.push(AuditEvent::DeleteFailed {
                            sender: sender.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            ActionOutcome::Failed {
                method,
                failure,
                get_failure,
            } => {
                report.push(AuditEvent::GetFailed {
                    sender: sender.to_string(),
                    url: candidate.url.clone(),
                    failure: get_failure,
                });
                report.record_failed(AuditEvent::ActionFailed {
                    sender: sender.to_string(),
                    url: candidate.url.clone(),
                    method,
                    failure,
                });
            }
        }
    }
}

fn summarize(index: usize, results: &[ClassifyResult]) -> BatchSummary {
    let unimportant = results
        .iter()
        .filter(|r| r.classification == Classification::Unimportant)
        .count();
    BatchSummary {
        index,
        size: results.len(),
        important: results.len() - unimportant,
        unimportant,
        fallbacks: results.iter().filter(|r| r.fell_back).count(),
    }
}
