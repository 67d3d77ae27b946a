use anyhow::{Context, Result};
use clap::Parser;
use loqa_live::audio::{AudioOutput, Microphone, NullCapture, NullOutput, SpeakerOutput};
use loqa_live::{
    create_router, run_console, AppState, Config, ConsoleExit, SessionController, SessionDeps,
    WsConnector,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Live voice session client
#[derive(Debug, Parser)]
#[command(name = "loqa-live", version)]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/loqa-live")]
    config: String,

    /// Connect as soon as the process starts
    #[arg(long)]
    connect: bool,

    /// Do not start the HTTP control API
    #[arg(long)]
    no_http: bool,

    /// Text-only session: no microphone, no speaker
    #[arg(long)]
    no_audio: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = Config::load(&cli.config)?;

    info!("Loqa Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Agent endpoint: {}", cfg.agent.endpoint);

    let deps = build_deps(&cfg, cli.no_audio);
    let controller = Arc::new(SessionController::spawn(cfg.session_config(), deps)?);

    let server = if cfg.service.http.enabled && !cli.no_http {
        let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("HTTP API listening on {}", addr);

        let router = create_router(AppState::new(Arc::clone(&controller)));
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("HTTP server stopped: {}", e);
            }
        }))
    } else {
        None
    };

    if cli.connect {
        controller.connect().await?;
    }

    info!("Type to talk; /connect, /disconnect, /status, /quit");

    tokio::select! {
        result = console(&controller) => result?,
        _ = shutdown_signal() => info!("Interrupted"),
    }

    controller.shutdown().await?;
    if let Some(server) = server {
        server.abort();
    }

    info!("Bye");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_deps(cfg: &Config, no_audio: bool) -> SessionDeps {
    let connector = Arc::new(WsConnector::new(cfg.agent.auth_token.clone()));
    let playback_rate = cfg.audio.playback_sample_rate;

    if no_audio {
        return SessionDeps {
            connector,
            capture: Box::new(NullCapture::new()),
            output: Arc::new(NullOutput::new(playback_rate)),
        };
    }

    let output: Arc<dyn AudioOutput> = match SpeakerOutput::open(playback_rate) {
        Ok(speaker) => Arc::new(speaker),
        Err(e) => {
            warn!("No audio output, agent speech will be dropped: {:#}", e);
            Arc::new(NullOutput::new(playback_rate))
        }
    };

    SessionDeps {
        connector,
        capture: Box::new(Microphone::new(cfg.capture_config())),
        output,
    }
}

/// Stdin console. On end of input (detached stdin under a service manager)
/// keep running for the HTTP API until a signal arrives.
async fn console(controller: &SessionController) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let mut out = tokio::io::stdout();

    if run_console(input, &mut out, controller).await? == ConsoleExit::Closed {
        info!("No console input; waiting for a shutdown signal");
        shutdown_signal().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
