//! Integration tests for the unsubscribe pipeline over real HTTP.
//!
//! Each test spins up an Axum server on a random port that plays the part
//! of remote unsubscribe endpoints, and drives the real reqwest transport
//! against it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::{any, get, post};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use inbox_sweep::config::SweepConfig;
use inbox_sweep::error::LlmError;
use inbox_sweep::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider,
};
use inbox_sweep::mailbox::{MemoryMailbox, Message};
use inbox_sweep::pipeline::{
    ActionOutcome, AttemptFailure, BatchOrchestrator, Classifier, DiscoveryMethod, HttpMethod, ReqwestTransport,
    UnsubscribeActor, UnsubscribeCandidate,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests seen by the server: (method, path, user-agent).
type Hits = Arc<Mutex<Vec<(String, String, String)>>>;

/// Stub LLM: keeps anything mentioning an interview, discards the rest.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request.last_user_message().unwrap_or_default();
        let label = if prompt.contains("Interview") {
            "IMPORTANT"
        } else {
            "UNIMPORTANT"
        };
        Ok(CompletionResponse {
            content: label.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

fn record(hits: &Hits, method: &Method, uri: &Uri, headers: &HeaderMap) {
    let agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    hits.lock()
        .unwrap()
        .push((method.to_string(), uri.path().to_string(), agent));
}

async fn ok(State(hits): State<Hits>, method: Method, uri: Uri, headers: HeaderMap) -> StatusCode {
    record(&hits, &method, &uri, &headers);
    StatusCode::OK
}

async fn accepted(
    State(hits): State<Hits>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> StatusCode {
    record(&hits, &method, &uri, &headers);
    StatusCode::ACCEPTED
}

async fn gone(State(hits): State<Hits>, method: Method, uri: Uri, headers: HeaderMap) -> StatusCode {
    record(&hits, &method, &uri, &headers);
    StatusCode::GONE
}

async fn slow(State(hits): State<Hits>, method: Method, uri: Uri, headers: HeaderMap) -> StatusCode {
    record(&hits, &method, &uri, &headers);
    tokio::time::sleep(Duration::from_secs(3)).await;
    StatusCode::OK
}

/// Start the endpoint server on a random port, return (base url, hits).
async fn start_server() -> (String, Hits) {
    let hits: Hits = Arc::default();

    let app = Router::new()
        .route("/ok", get(ok))
        .route("/post-only", post(accepted))
        .route("/gone", any(gone))
        .route("/slow", any(slow))
        .with_state(hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), hits)
}

fn actor(request_timeout: Duration) -> UnsubscribeActor {
    UnsubscribeActor::new(Arc::new(ReqwestTransport::new(request_timeout).unwrap()))
}

fn candidate(url: String) -> UnsubscribeCandidate {
    UnsubscribeCandidate::new(url, DiscoveryMethod::Header)
}

fn methods(hits: &Hits) -> Vec<String> {
    hits.lock().unwrap().iter().map(|h| h.0.clone()).collect()
}

// ── Actor over real HTTP ────────────────────────────────────────────

#[tokio::test]
async fn get_success_sends_browser_headers() {
    timeout(TEST_TIMEOUT, async {
        let (base, hits) = start_server().await;

        let outcome = actor(Duration::from_secs(2))
            .attempt(&candidate(format!("{base}/ok")))
            .await;

        assert_eq!(
            outcome,
            ActionOutcome::Succeeded {
                method: HttpMethod::Get,
                status: 200,
                get_failure: None,
            }
        );
        let seen = hits.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "/ok");
        assert!(seen[0].2.starts_with("Mozilla/5.0"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn method_not_allowed_falls_back_to_post() {
    timeout(TEST_TIMEOUT, async {
        let (base, hits) = start_server().await;

        let outcome = actor(Duration::from_secs(2))
            .attempt(&candidate(format!("{base}/post-only")))
            .await;

        assert_eq!(
            outcome,
            ActionOutcome::Succeeded {
                method: HttpMethod::Post,
                status: 202,
                get_failure: Some(AttemptFailure::Status { code: 405 }),
            }
        );
        // GET is rejected by the router before reaching the handler.
        assert_eq!(methods(&hits), vec!["POST".to_string()]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn non_2xx_on_both_methods_fails_with_post_status() {
    timeout(TEST_TIMEOUT, async {
        let (base, hits) = start_server().await;

        let outcome = actor(Duration::from_secs(2))
            .attempt(&candidate(format!("{base}/gone")))
            .await;

        assert!(!outcome.is_success());
        match outcome {
            ActionOutcome::Failed {
                method,
                failure,
                get_failure,
            } => {
                assert_eq!(method, HttpMethod::Post);
                assert_eq!(failure.to_string(), "Status: 410");
                assert_eq!(get_failure.to_string(), "Status: 410");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(methods(&hits), vec!["GET".to_string(), "POST".to_string()]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unresponsive_endpoint_is_bounded_by_timeout() {
    timeout(TEST_TIMEOUT, async {
        let (base, hits) = start_server().await;

        let started = std::time::Instant::now();
        let outcome = actor(Duration::from_millis(300))
            .attempt(&candidate(format!("{base}/slow")))
            .await;

        assert!(!outcome.is_success());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(methods(&hits).len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn relative_url_is_an_ordinary_failure() {
    timeout(TEST_TIMEOUT, async {
        let outcome = actor(Duration::from_secs(1))
            .attempt(&candidate("/relative/unsubscribe".to_string()))
            .await;

        match outcome {
            ActionOutcome::Failed { failure, .. } => {
                assert!(failure.to_string().starts_with("error: "));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

// ── Full sweep ──────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_unsubscribes_and_trashes_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, hits) = start_server().await;

        let mailbox = Arc::new(MemoryMailbox::new(vec![
            Message::new("m1", "deals@shop.com", "Weekend sale")
                .with_header("List-Unsubscribe", format!("<mailto:u@shop.com>, <{base}/ok>")),
            Message::new("m2", "hr@company.com", "Interview schedule")
                .with_header("List-Unsubscribe", format!("<{base}/ok>")),
            Message::new("m3", "news@blog.io", "This week in tech").with_html(format!(
                r#"<p>Thanks for reading</p><a href="{base}/post-only">Manage subscription</a>"#
            )),
            Message::new("m4", "promo@store.net", "Flash deal")
                .with_html(format!(r#"<a href="{base}/gone?unsubscribe=1">here</a>"#)),
            Message::new("m5", "noreply@plain.org", "Hello").with_plain("no links here"),
        ]));

        let config = SweepConfig {
            batch_size: 2,
            cooldown: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            ..SweepConfig::default()
        };
        let orchestrator = BatchOrchestrator::new(
            Classifier::new(Arc::new(StubLlm)),
            actor(config.request_timeout),
            mailbox.clone(),
            config,
        );

        let report = orchestrator.sweep(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.unsubscribed, 2);
        assert_eq!(report.preserved, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.batches.len(), 3);
        assert_eq!(report.cooldowns, 2);

        assert_eq!(
            report.audit_trail(),
            vec![
                format!("Unsubscribed from: deals@shop.com ({base}/ok) [GET 200]"),
                "  -> Email moved to trash".to_string(),
                format!(
                    "GET request failed for: news@blog.io ({base}/post-only) [Status: 405]. Trying POST..."
                ),
                format!("Unsubscribed from: news@blog.io ({base}/post-only) [POST 202]"),
                "  -> Email moved to trash".to_string(),
                format!(
                    "GET request failed for: promo@store.net ({base}/gone?unsubscribe=1) [Status: 410]. Trying POST..."
                ),
                format!(
                    "POST request failed for: promo@store.net ({base}/gone?unsubscribe=1) [Status: 410]"
                ),
                "No unsubscribe link found for: noreply@plain.org".to_string(),
            ]
        );

        assert!(mailbox.is_trashed("m1"));
        assert!(mailbox.is_trashed("m3"));
        assert!(!mailbox.is_trashed("m2"));
        assert!(!mailbox.is_trashed("m4"));

        // The preserved message never produced a request.
        let paths: Vec<String> = hits.lock().unwrap().iter().map(|h| h.1.clone()).collect();
        assert_eq!(paths, vec!["/ok", "/post-only", "/gone", "/gone"]);

        let text = report.render();
        assert!(text.starts_with(
            "Intelligent unsubscribe completed: 2 unsubscribed, 1 preserved, 2 failed."
        ));
        assert!(text.contains("Preserved important emails:\n  1. hr@company.com"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_mailbox_reports_nothing_found() {
    timeout(TEST_TIMEOUT, async {
        let orchestrator = BatchOrchestrator::new(
            Classifier::new(Arc::new(StubLlm)),
            actor(Duration::from_secs(1)),
            Arc::new(MemoryMailbox::new(vec![])),
            SweepConfig::default(),
        );

        let report = orchestrator.sweep(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.render(), "No promotion emails found.");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total"], 0);
    })
    .await
    .expect("test timed out");
}
