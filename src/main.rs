use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pressgate::cli;
use pressgate::config::{self, Config};
use pressgate::jobs::{Jobs, PostingScheduler, TimeoutMonitor};
use pressgate::metrics::WorkflowMetrics;
use pressgate::models::approval::RequestKey;
use pressgate::models::event::ApprovalEvent;
use pressgate::notification::slack::SlackNotifier;
use pressgate::notification::webhook::WebhookNotifier;
use pressgate::notification::{FanOutNotifier, Notifier};
use pressgate::publish::dry_run::DryRunPublisher;
use pressgate::publish::http::HttpPublisher;
use pressgate::publish::Publisher;
use pressgate::render::http::HttpRenderer;
use pressgate::render::passthrough::PassthroughRenderer;
use pressgate::render::MediaRenderer;
use pressgate::schedule::ScheduleStore;
use pressgate::store::file::FileStore;
use pressgate::store::memory::MemoryStore;
use pressgate::store::postgres::PgStore;
use pressgate::store::RequestStore;
use pressgate::workflow::runs::BatchRuns;
use pressgate::workflow::upload::UploadSessions;
use pressgate::workflow::{DecisionOutcome, Intake, LifecycleEngine};
use pressgate::AppState;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.json_logs)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, ephemeral }) => run_server(cfg, port, ephemeral).await,
        None => run_server(cfg, None, false).await,
        Some(cli::Commands::Request { command }) => {
            let store = open_store(&cfg, false).await?;
            handle_request_command(store.as_ref(), command).await
        }
        Some(cli::Commands::Decide {
            action,
            story_id,
            platform,
        }) => {
            let state = build_state(cfg, false).await?;
            let event = ApprovalEvent {
                story_id,
                platform,
                action,
            };
            handle_decision(&state, &event).await
        }
        Some(cli::Commands::Schedule { command }) => {
            let schedule = ScheduleStore::load(&cfg.data_dir, cfg.schedule_offset).await?;
            handle_schedule_command(&schedule, command).await
        }
    };

    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// Registry + env filter + plain or JSON fmt layer, plus an OTLP exporter
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(json_logs: bool) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "pressgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (plain, json) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pressgate=debug,tower_http=info".into()),
        ))
        .with(plain)
        .with(json)
        .with(telemetry_layer)
        .init();
    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise one JSON file per record
/// under `{data_dir}/requests`.
async fn open_store(cfg: &Config, ephemeral: bool) -> anyhow::Result<Arc<dyn RequestStore>> {
    if ephemeral {
        tracing::warn!("ephemeral mode: requests are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(url) = cfg.database_url.as_deref() {
        let store = PgStore::connect(url).await?;
        store.migrate().await?;
        tracing::info!("using postgres request store");
        return Ok(Arc::new(store));
    }
    let dir = cfg.data_dir.join("requests");
    let store = FileStore::open(dir.clone())
        .await
        .with_context(|| format!("failed to open request store at {}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "using file request store");
    Ok(Arc::new(store))
}

fn build_notifier(cfg: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    let mut notifier =
        FanOutNotifier::new().with(Arc::new(SlackNotifier::new(cfg.slack_webhook_url.clone())?));
    if !cfg.webhook_urls.is_empty() {
        notifier = notifier.with(Arc::new(WebhookNotifier::new(
            cfg.webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )?));
    }
    Ok(Arc::new(notifier))
}

fn build_publisher(cfg: &Config) -> anyhow::Result<Arc<dyn Publisher>> {
    let publisher: Arc<dyn Publisher> = match cfg.publish_url.as_deref() {
        Some(url) => Arc::new(HttpPublisher::new(url, PUBLISH_TIMEOUT)?),
        None => {
            tracing::warn!("PRESSGATE_PUBLISH_URL not set, posts will only be logged");
            Arc::new(DryRunPublisher)
        }
    };
    Ok(publisher)
}

fn build_renderer(cfg: &Config) -> anyhow::Result<Arc<dyn MediaRenderer>> {
    let renderer: Arc<dyn MediaRenderer> = match cfg.render_url.as_deref() {
        Some(url) => Arc::new(HttpRenderer::new(url, RENDER_TIMEOUT)?),
        None => {
            tracing::warn!("PRESSGATE_RENDER_URL not set, media fallback is unavailable");
            Arc::new(PassthroughRenderer)
        }
    };
    Ok(renderer)
}

async fn build_state(cfg: Config, ephemeral: bool) -> anyhow::Result<Arc<AppState>> {
    let store = open_store(&cfg, ephemeral).await?;
    let notifier = build_notifier(&cfg)?;
    let metrics = Arc::new(WorkflowMetrics::new().context("failed to register metrics")?);

    let engine = Arc::new(LifecycleEngine::new(
        store.clone(),
        notifier.clone(),
        build_renderer(&cfg)?,
        build_publisher(&cfg)?,
        metrics,
        cfg.max_media,
    ));
    let intake = Intake::new(store, notifier, cfg.platforms.clone(), cfg.approval_timeout);
    let scheduler = PostingScheduler::new(engine.clone(), cfg.pacing);
    let schedule = ScheduleStore::load(&cfg.data_dir, cfg.schedule_offset).await?;

    Ok(Arc::new(AppState {
        engine,
        intake,
        scheduler,
        uploads: Arc::new(UploadSessions::new(cfg.session_ttl)),
        runs: Arc::new(BatchRuns::new(cfg.session_ttl)),
        schedule: Arc::new(schedule),
        config: cfg,
    }))
}

async fn run_server(cfg: Config, port: Option<u16>, ephemeral: bool) -> anyhow::Result<()> {
    if cfg.admin_key.is_none() {
        anyhow::bail!("PRESSGATE_ADMIN_KEY must be set to serve the admin API");
    }
    let port = port.unwrap_or(cfg.port);
    let state = build_state(cfg, ephemeral).await?;

    let shutdown = CancellationToken::new();
    let monitor = TimeoutMonitor::new(state.engine.clone(), state.config.timeout_check_interval);
    let jobs = Jobs::start(
        monitor,
        state.scheduler.clone(),
        state.uploads.clone(),
        state.runs.clone(),
        shutdown.clone(),
    );
    tracing::info!("timeout monitor and posting scheduler started");

    let app = pressgate::app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("pressgate listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    jobs.shutdown().await;
    tracing::info!("pressgate stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and cancels the background loops.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

async fn handle_request_command(
    store: &dyn RequestStore,
    cmd: cli::RequestCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::RequestCommands::List { status, story_id } => {
            let mut requests = store
                .list(&|r| {
                    status.map_or(true, |s| r.status == s)
                        && story_id.as_deref().map_or(true, |id| r.story_id == id)
                })
                .await?;
            if requests.is_empty() {
                println!("No matching requests.");
                return Ok(());
            }
            requests.sort_by(|a, b| {
                (a.created_at, &a.story_id, a.platform).cmp(&(b.created_at, &b.story_id, b.platform))
            });

            println!(
                "{:<28} {:<10} {:<9} {:<6} {:<26} DEADLINE",
                "STORY", "PLATFORM", "STATUS", "MEDIA", "CREATED"
            );
            for r in requests {
                println!(
                    "{:<28} {:<10} {:<9} {:<6} {:<26} {}",
                    r.story_id,
                    r.platform,
                    r.status,
                    r.media.len(),
                    r.created_at.to_rfc3339(),
                    r.decision_deadline.to_rfc3339()
                );
            }
        }
        cli::RequestCommands::Show { story_id, platform } => {
            let record = store.get(&RequestKey::new(story_id, platform)).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

async fn handle_decision(state: &AppState, event: &ApprovalEvent) -> anyhow::Result<()> {
    let decisions = state.engine.on_approval_event(event).await?;
    for d in decisions {
        match d.outcome {
            DecisionOutcome::Applied { status } => println!("{}: now {}", d.key, status),
            DecisionOutcome::Stale { current } => {
                println!("{}: unchanged, already {}", d.key, current)
            }
            DecisionOutcome::Missing => println!("{}: no such request", d.key),
        }
    }
    Ok(())
}

async fn handle_schedule_command(
    schedule: &ScheduleStore,
    cmd: cli::ScheduleCommands,
) -> anyhow::Result<()> {
    let settings = match cmd {
        cli::ScheduleCommands::Show => schedule.get().await,
        cli::ScheduleCommands::Frequency { secs } => schedule.set_frequency(secs).await?,
        cli::ScheduleCommands::Exclusion { start, end } => {
            schedule.set_exclusion(&start, &end).await?
        }
        cli::ScheduleCommands::Enable => schedule.set_enabled(true).await?,
        cli::ScheduleCommands::Disable => schedule.set_enabled(false).await?,
    };

    let excluded = schedule.is_within_exclusion_window(chrono::Utc::now()).await;
    println!("Run interval:     {}s", settings.run_interval_secs);
    println!(
        "Quiet window:     {} - {} (UTC{})",
        settings.exclusion_start,
        settings.exclusion_end,
        schedule.offset()
    );
    println!("Enabled:          {}", settings.enabled);
    println!("Harvest allowed:  {}", if excluded { "no" } else { "yes" });
    Ok(())
}
