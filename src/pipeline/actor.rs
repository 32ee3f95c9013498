//! Unsubscribe actor — GET the candidate URL, fall back to one POST.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, info};

use crate::error::HttpError;
use crate::pipeline::types::{ActionOutcome, AttemptFailure, HttpMethod, UnsubscribeCandidate};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Header set sent with every unsubscribe request.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

// ── Transport seam ──────────────────────────────────────────────────

/// Sends one request and reports the response status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, method: HttpMethod, url: &str) -> Result<u16, HttpError>;
}

/// reqwest-backed transport with browser headers and a fixed timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers())
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Request {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, method: HttpMethod, url: &str) -> Result<u16, HttpError> {
        let request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        let response = request.send().await.map_err(|e| classify_error(url, e))?;
        Ok(response.status().as_u16())
    }
}

fn classify_error(url: &str, e: reqwest::Error) -> HttpError {
    let url = url.to_string();
    if e.is_timeout() {
        HttpError::Timeout { url }
    } else if e.is_builder() {
        HttpError::InvalidUrl {
            url,
            reason: e.to_string(),
        }
    } else if e.is_connect() {
        HttpError::Connect {
            url,
            reason: e.to_string(),
        }
    } else {
        HttpError::Request {
            url,
            reason: e.to_string(),
        }
    }
}

// ── Actor ───────────────────────────────────────────────────────────

/// Runs the GET → POST protocol against an unsubscribe endpoint.
pub struct UnsubscribeActor {
    transport: Arc<dyn HttpTransport>,
}

impl UnsubscribeActor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// One GET, and on any non-2xx or transport error exactly one POST.
    pub async fn attempt(&self, candidate: &UnsubscribeCandidate) -> ActionOutcome {
        let url = candidate.url.as_str();

        let get_failure = match self.send(HttpMethod::Get, url).await {
            Ok(status) => {
                info!(url, status, "Unsubscribed via GET");
                return ActionOutcome::Succeeded {
                    method: HttpMethod::Get,
                    status,
                    get_failure: None,
                };
            }
            Err(failure) => {
                debug!(url, %failure, "GET failed, trying POST");
                failure
            }
        };

        match self.send(HttpMethod::Post, url).await {
            Ok(status) => {
                info!(url, status, "Unsubscribed via POST");
                ActionOutcome::Succeeded {
                    method: HttpMethod::Post,
                    status,
                    get_failure: Some(get_failure),
                }
            }
            Err(failure) => {
                info!(url, %failure, "Unsubscribe failed");
                ActionOutcome::Failed {
                    method: HttpMethod::Post,
                    failure,
                    get_failure,
                }
            }
        }
    }

    /// 2xx status on success, otherwise the failure.
    async fn send(&self, method: HttpMethod, url: &str) -> Result<u16, AttemptFailure> {
        match self.transport.send(method, url).await {
            Ok(code) if (200..300).contains(&code) => Ok(code),
            Ok(code) => Err(AttemptFailure::Status { code }),
            Err(e) => Err(AttemptFailure::Transport {
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::pipeline::types::DiscoveryMethod;

    /// Transport answering from a script, recording every call.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<u16, HttpError>>>,
        calls: Mutex<Vec<(HttpMethod, String)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<u16, HttpError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(HttpMethod, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, method: HttpMethod, url: &str) -> Result<u16, HttpError> {
            self.calls.lock().unwrap().push((method, url.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(200))
        }
    }

    fn candidate() -> UnsubscribeCandidate {
        UnsubscribeCandidate::new("https://x.com/u", DiscoveryMethod::Header)
    }

    fn actor(transport: &Arc<ScriptedTransport>) -> UnsubscribeActor {
        UnsubscribeActor::new(transport.clone())
    }

    #[tokio::test]
    async fn get_success_skips_post() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(204)]));
        let outcome = actor(&transport).attempt(&candidate()).await;

        assert_eq!(
            outcome,
            ActionOutcome::Succeeded {
                method: HttpMethod::Get,
                status: 204,
                get_failure: None,
            }
        );
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn non_2xx_get_falls_back_to_post() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(404), Ok(200)]));
        let outcome = actor(&transport).attempt(&candidate()).await;

        assert_eq!(
            outcome,
            ActionOutcome::Succeeded {
                method: HttpMethod::Post,
                status: 200,
                get_failure: Some(AttemptFailure::Status { code: 404 }),
            }
        );
        let calls = transport.calls();
        assert_eq!(calls[0], (HttpMethod::Get, "https://x.com/u".to_string()));
        assert_eq!(calls[1], (HttpMethod::Post, "https://x.com/u".to_string()));
    }

    #[tokio::test]
    async fn transport_error_falls_back_to_post() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(HttpError::Timeout {
                url: "https://x.com/u".into(),
            }),
            Ok(202),
        ]));
        let outcome = actor(&transport).attempt(&candidate()).await;
        assert!(matches!(
            outcome,
            ActionOutcome::Succeeded {
                method: HttpMethod::Post,
                get_failure: Some(AttemptFailure::Transport { ref reason }),
                ..
            } if reason.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn post_failure_is_final() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(500), Ok(500), Ok(200)]));
        let outcome = actor(&transport).attempt(&candidate()).await;

        assert_eq!(
            outcome,
            ActionOutcome::Failed {
                method: HttpMethod::Post,
                failure: AttemptFailure::Status { code: 500 },
                get_failure: AttemptFailure::Status { code: 500 },
            }
        );
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn post_transport_error_reports_reason() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(403),
            Err(HttpError::Connect {
                url: "https://x.com/u".into(),
                reason: "refused".into(),
            }),
        ]));
        let outcome = actor(&transport).attempt(&candidate()).await;

        match outcome {
            ActionOutcome::Failed {
                failure: AttemptFailure::Transport { reason },
                ..
            } => assert!(reason.contains("refused")),
            other => panic!("expected transport failure, got {other:?}"),
        }
    }

    #[test]
    fn browser_headers_are_complete() {
        let headers = browser_headers();
        assert_eq!(headers.len(), 6);
        assert!(
            headers[header::USER_AGENT]
                .to_str()
                .unwrap()
                .contains("Chrome/91")
        );
        assert_eq!(headers[header::UPGRADE_INSECURE_REQUESTS], "1");
    }

    #[tokio::test]
    async fn relative_url_fails_without_panicking() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport.send(HttpMethod::Get, "/u/1").await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUrl { .. } | HttpError::Request { .. }
        ));
    }
}
