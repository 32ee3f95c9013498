use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use inbox_sweep::config::{OutputFormat, SweepConfig};
use inbox_sweep::error::ConfigError;
use inbox_sweep::llm::{LlmConfig, create_provider};
use inbox_sweep::mailbox::{ImapConfig, ImapMailbox, Mailbox};
use inbox_sweep::pipeline::{BatchOrchestrator, Classifier, ReqwestTransport, UnsubscribeActor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let sweep_config = SweepConfig::from_env()?;
    let llm_config = LlmConfig::from_env()?;
    let imap_config = ImapConfig::from_env().ok_or_else(|| ConfigError::MissingRequired {
        key: "EMAIL_IMAP_HOST".into(),
        hint: "export EMAIL_IMAP_HOST=imap.gmail.com (plus EMAIL_USERNAME, EMAIL_PASSWORD)".into(),
    })?;

    eprintln!("📭 Inbox Sweep v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", llm_config.model, llm_config.backend);
    eprintln!(
        "   Mailbox: {}@{} [{}]",
        imap_config.username, imap_config.host, imap_config.source_folder
    );
    eprintln!("   Query: {}", sweep_config.query);
    eprintln!(
        "   Batches: {} per batch, {:?} cooldown, {} concurrent classifications\n",
        sweep_config.batch_size,
        sweep_config.cooldown,
        sweep_config.effective_concurrency()
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let classifier = Classifier::new(llm).with_timeout(sweep_config.classify_timeout);
    let transport = ReqwestTransport::new(sweep_config.request_timeout)
        .context("building unsubscribe HTTP client")?;
    let actor = UnsubscribeActor::new(Arc::new(transport));
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(imap_config));

    let output = sweep_config.output;
    let orchestrator = BatchOrchestrator::new(classifier, actor, mailbox, sweep_config);

    // ── Ctrl-C stops the run between messages ───────────────────────────
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing current message");
                token.cancel();
            }
        });
    }

    let report = orchestrator
        .sweep(&token)
        .await
        .context("listing promotion emails")?;

    match output {
        OutputFormat::Text => println!("{}", report.render()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
