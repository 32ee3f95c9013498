//! IMAP mailbox — blocking TLS session driven from `spawn_blocking`.
//!
//! Listing uses Gmail's `X-GM-RAW` search extension so provider filter
//! expressions such as `category:promotions` work unchanged. Bodies are
//! fetched with `BODY.PEEK[]` so listing leaves `\Seen` untouched. Message
//! ids are derived from the UID; `Message-ID` stays in the headers. Trashing
//! uses `UID MOVE` into the configured trash folder.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MailboxError;
use crate::mailbox::{Headers, Mailbox, Message, SNIPPET_FALLBACK_CHARS};

/// Socket read timeout for IMAP responses.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder searched when listing.
    pub source_folder: String,
    /// Destination of `move_to_trash`.
    pub trash_folder: String,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();

        let source_folder = std::env::var("EMAIL_SOURCE_FOLDER")
            .unwrap_or_else(|_| "[Gmail]/All Mail".to_string());
        let trash_folder =
            std::env::var("EMAIL_TRASH_FOLDER").unwrap_or_else(|_| "[Gmail]/Trash".to_string());

        Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            source_folder,
            trash_folder,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Mailbox backed by an IMAP server.
///
/// One session is kept open between calls and dropped on any error, so the
/// next call reconnects.
pub struct ImapMailbox {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
    /// Message id → UID in the source folder, filled by `list_messages`.
    uids: Arc<Mutex<HashMap<String, u32>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            uids: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
    {
        let config = self.config.clone();
        let slot = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || with_session(&config, &slot, op))
            .await
            .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn list_messages(&self, query: &str) -> Result<Vec<Message>, MailboxError> {
        let criteria = search_criteria(query);
        let fetched = self
            .blocking(move |session| {
                let uids = session.uid_search(&criteria)?;
                debug!(count = uids.len(), "IMAP search matched");

                let mut messages = Vec::with_capacity(uids.len());
                for uid in uids {
                    match session.uid_fetch_body(uid)? {
                        Some(raw) => match parse_message(&raw) {
                            Some(message) => messages.push((uid, message)),
                            None => warn!(uid, "Skipping unparseable message"),
                        },
                        None => warn!(uid, "FETCH returned no message body"),
                    }
                }
                Ok(messages)
            })
            .await?;

        let messages = register_uids(&mut lock(&self.uids), fetched);

        info!(
            count = messages.len(),
            folder = %self.config.source_folder,
            "Listed messages"
        );
        Ok(messages)
    }

    async fn move_to_trash(&self, message: &Message) -> Result<(), MailboxError> {
        let uid = lock(&self.uids).get(&message.id).copied().ok_or_else(|| {
            MailboxError::UnknownMessage {
                id: message.id.clone(),
            }
        })?;

        let trash = self.config.trash_folder.clone();
        self.blocking(move |session| session.uid_move(uid, &trash))
            .await?;

        lock(&self.uids).remove(&message.id);
        debug!(id = %message.id, uid, "Moved message to trash");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `op` on the cached session, opening one if needed. Any error drops
/// the session.
fn with_session<T>(
    config: &ImapConfig,
    slot: &Mutex<Option<ImapSession>>,
    op: impl FnOnce(&mut ImapSession) -> Result<T, MailboxError>,
) -> Result<T, MailboxError> {
    let mut guard = lock(slot);
    let mut session = match guard.take() {
        Some(session) => session,
        None => ImapSession::open(config)?,
    };
    let result = op(&mut session);
    if result.is_ok() {
        *guard = Some(session);
    } else {
        session.logout();
    }
    result
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with the source folder selected.
struct ImapSession {
    stream: BufReader<TlsStream>,
    tag: u32,
}

/// Untagged lines and literals collected for one command.
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

impl ImapSession {
    fn open(config: &ImapConfig) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| connect_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            tag: 0,
        };

        let _greeting = session.read_line()?;

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session
            .command(&login)
            .map_err(|_| MailboxError::AuthFailed {
                username: config.username.clone(),
            })?;

        session.command(&format!("SELECT {}", quote(&config.source_folder)))?;
        debug!(host = %config.host, folder = %config.source_folder, "IMAP session opened");
        Ok(session)
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, MailboxError> {
        let response = self.command(&format!("UID SEARCH {criteria}"))?;
        Ok(parse_search_uids(&response.lines))
    }

    fn uid_fetch_body(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailboxError> {
        let mut response = self.command(&fetch_command(uid))?;
        Ok(response.literals.pop())
    }

    fn uid_move(&mut self, uid: u32, folder: &str) -> Result<(), MailboxError> {
        self.command(&format!("UID MOVE {uid} {}", quote(folder)))?;
        Ok(())
    }

    fn logout(mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a tagged command and collect its response. A tagged `NO`/`BAD`
    /// becomes `MailboxError::Command`.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = Response {
            lines: Vec::new(),
            literals: Vec::new(),
        };
        let tagged_prefix = format!("{tag} ");

        loop {
            let line = self.read_line()?;

            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }

            if let Some(status) = line.strip_prefix(&tagged_prefix) {
                let status = status.trim();
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailboxError::Command {
                    command: verb,
                    reason: status.to_string(),
                });
            }

            response.lines.push(line);
        }
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// IMAP search criteria for a provider filter expression.
pub fn search_criteria(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        "ALL".to_string()
    } else {
        format!("X-GM-RAW {}", quote(query))
    }
}

/// Full-body fetch that does not mark the message `\Seen`.
pub fn fetch_command(uid: u32) -> String {
    format!("UID FETCH {uid} BODY.PEEK[]")
}

/// Stable per-mailbox id for a UID.
pub fn uid_message_id(uid: u32) -> String {
    format!("uid-{uid}")
}

/// Re-key fetched messages by UID and remember the mapping for trashing.
pub fn register_uids(
    uids: &mut HashMap<String, u32>,
    fetched: Vec<(u32, Message)>,
) -> Vec<Message> {
    fetched
        .into_iter()
        .map(|(uid, mut message)| {
            message.id = uid_message_id(uid);
            uids.insert(message.id.clone(), uid);
            message
        })
        .collect()
}

/// Quote a string as an IMAP quoted-string.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Size of a trailing `{n}` literal marker on a response line.
pub fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// UIDs from `* SEARCH` response lines.
pub fn parse_search_uids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|s| s.parse().ok()))
        .collect()
}

/// Parse a raw RFC 822 message into a pipeline `Message`.
pub fn parse_message(raw: &[u8]) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let plain = parsed.body_text(0).map(|t| t.into_owned());
    let html = parsed.body_html(0).map(|h| h.into_owned());

    let headers: Headers = parsed
        .headers_raw()
        .map(|(name, value)| (name, unfold(value)))
        .collect();

    let attachments = parsed
        .attachments()
        .filter_map(|part: &mail_parser::MessagePart| {
            MimeHeaders::attachment_name(part).map(|s| s.to_string())
        })
        .collect();

    let date = parsed.date().and_then(|d| {
        chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
            })
            .map(|naive| naive.and_utc())
    });

    let snippet = plain
        .as_deref()
        .map(|text| {
            compact_ws(text)
                .chars()
                .take(SNIPPET_FALLBACK_CHARS)
                .collect::<String>()
        })
        .unwrap_or_default();

    Some(Message {
        id,
        subject,
        sender,
        snippet,
        plain,
        html,
        headers,
        attachments,
        date,
    })
}

/// Undo RFC 5322 header folding.
fn unfold(value: &str) -> String {
    value.replace("\r\n", "").replace('\n', "").trim().to_string()
}

fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
