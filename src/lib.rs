//! Inbox Sweep — LLM-assisted bulk unsubscribe for promotional email.

pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
