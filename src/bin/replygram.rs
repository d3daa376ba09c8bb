use anyhow::Result;
use replygram::{
    config::Config,
    dispatcher::ActionDispatcher,
    http::{context::WebContext, server::build_router},
    ingress::Ingestor,
    metrics::create_metrics_publisher,
    platform::GraphApiClient,
    processor::RuleProcessor,
    storage::{
        PostgresAccountStorage, PostgresEventStorage, PostgresExecutionStorage, PostgresStorage,
        PostgresRuleStorage,
    },
    tasks::{RetrySweepConfig, RetrySweeper},
    throttle::ExecutionWindowThrottler,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[tokio::main]
async fn main() -> Result<()> {
    let version = replygram::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    let config = Config::new()?;

    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "replygram=info,tower_http=info,sqlx=warn".into()),
    );

    let fmt_layer = if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(version = %version, "Starting replygram application");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let metrics = create_metrics_publisher(
        &config.metrics_adapter,
        config.metrics_statsd_host.as_deref(),
        &config.metrics_prefix,
    )?;

    let accounts = Arc::new(PostgresAccountStorage::new(pool.clone()));
    let rules = Arc::new(PostgresRuleStorage::new(pool.clone()));
    let events = Arc::new(PostgresEventStorage::new(pool.clone()));
    let executions = Arc::new(PostgresExecutionStorage::new(pool.clone()));
    let storage = Arc::new(PostgresStorage::new(pool.clone()));

    let http_client = reqwest::Client::builder()
        .timeout(*config.http_client_timeout.as_ref())
        .user_agent(config.user_agent.clone())
        .build()?;
    let platform_client = Arc::new(GraphApiClient::new(
        http_client,
        config.graph_api_base_url.clone(),
        config.graph_api_version.clone(),
    ));

    let throttler = Arc::new(ExecutionWindowThrottler::new(executions.clone()));
    let dispatcher = Arc::new(ActionDispatcher::new(
        platform_client.clone(),
        executions.clone(),
        metrics.clone(),
    ));
    let processor = Arc::new(RuleProcessor::new(
        rules.clone(),
        events.clone(),
        throttler,
        dispatcher,
        metrics.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(
        accounts.clone(),
        events.clone(),
        processor,
        metrics.clone(),
    ));

    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    {
        let sweeper = RetrySweeper::new(
            executions,
            events,
            accounts,
            platform_client,
            metrics,
            RetrySweepConfig {
                interval: config.retry.sweep_interval,
                max_retries: config.retry.max_attempts,
                base_delay_ms: config.retry.base_delay_ms,
                batch_size: 50,
            },
            token.clone(),
        );
        tracker.spawn(async move {
            if let Err(e) = sweeper.run().await {
                tracing::error!(error = %e, "Retry sweeper exited with error");
            }
        });
    }

    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = signal_token.cancelled() => {},
                _ = terminate => {
                    tracing::info!("Received SIGTERM signal, initiating shutdown");
                },
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C signal, initiating shutdown");
                },
            }

            signal_tracker.close();
            signal_token.cancel();
        });
    }

    let port = *config.http_port.as_ref();
    let web_context = WebContext::new(config, ingestor, storage);
    let router = build_router(web_context);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "HTTP server listening");

    let shutdown_token = token.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    token.cancel();
    tracker.wait().await;
    tracing::info!("All tasks completed, application shutting down");

    Ok(())
}
