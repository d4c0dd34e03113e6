use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use stego_trial_portal::config::AppConfig;
use stego_trial_portal::infrastructure::{database, scanner, seed};
use stego_trial_portal::services::mailer::create_mailer;
use stego_trial_portal::services::worker::BackgroundWorker;
use stego_trial_portal::{AppState, create_app};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stego_trial_portal=info,tower_http=info,mailer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Stego trial portal...");

    let config = AppConfig::load()?;
    info!(
        "🛡️  Upload Config: Max Size={}MB, Batch={} files, Quota={}, Provider={} ({:?})",
        config.max_file_size / 1024 / 1024,
        config.max_batch_files,
        config.default_scan_quota,
        config.provider.provider_type,
        config.provider.mode
    );

    let db = database::setup_database(&config.database_url).await?;
    seed::seed_admin(&db, &config).await?;

    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    let provider = scanner::setup_provider(&config.provider).await?;
    let mailer = create_mailer(&config.mail)?;
    let state = AppState::new(db.clone(), config.clone(), provider, mailer);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker = BackgroundWorker::new(
        state.otp.clone(),
        state.scan_service.quota().clone(),
        vec![
            state.upload_limiter.clone(),
            state.auth_limiter.clone(),
            state.signup_limiter.clone(),
        ],
        config.uploads_dir.clone(),
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());
    info!("👷 Background worker initialized.");

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = SocketAddr::from((args.host, args.port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    })
    .await?;

    if let Err(e) = worker_handle.await {
        tracing::error!("Background worker exited abnormally: {}", e);
    }

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
