use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paddle_ocr::{Config, OcrSupervisor, RecognitionService};

#[derive(Parser)]
#[command(name = "paddle-ocr")]
#[command(about = "Recognize text in images with a supervised PaddleOCR-json worker")]
struct Args {
    /// Image URL, data URI or path (relative to the worker directory)
    #[arg(long)]
    url: Option<String>,

    /// Worker executable, overrides OCR_EXE_PATH
    #[arg(long)]
    exe_path: Option<String>,

    /// Worker working directory, overrides OCR_CWD
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Forward worker output to the log
    #[arg(long)]
    debug: bool,

    /// Message content; its first <img src="..."> is recognized.
    /// Without content or --url, messages are read from stdin, one per line.
    #[arg(trailing_var_arg = true)]
    content: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paddle_ocr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    if let Some(exe_path) = args.exe_path {
        config.ocr.exe_path = exe_path;
    }
    if let Some(cwd) = args.cwd {
        config.ocr.cwd = cwd;
    }
    config.ocr.debug |= args.debug;

    tracing::info!(
        exe = %config.ocr.resolve_exe_path().display(),
        cwd = %config.ocr.cwd.display(),
        "Starting OCR worker..."
    );
    let supervisor = Arc::new(OcrSupervisor::new(config.ocr)?);

    // Installed before `start` so a signal during the handshake still stops the worker.
    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    tokio::select! {
        started = supervisor.start() => {
            if let Err(e) = started {
                tracing::error!("OCR worker failed to start: {}", e);
            }
        }
        _ = cancel_token.cancelled() => {
            supervisor.stop().await;
            return Ok(());
        }
    }

    let service = RecognitionService::new(supervisor.clone());

    let outcome = if args.url.is_some() || !args.content.is_empty() {
        let content = args.content.join(" ");
        tokio::select! {
            reply = service.handle(args.url.as_deref(), &content) => {
                println!("{reply}");
            }
            _ = cancel_token.cancelled() => {}
        }
        Ok(())
    } else {
        serve_stdin(&service, &cancel_token).await
    };

    supervisor.stop().await;
    outcome
}

/// Answer one message per stdin line until EOF or a shutdown signal.
async fn serve_stdin(
    service: &RecognitionService,
    cancel_token: &CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // A bare reference is treated like the --url option.
                let reply = if line.contains("<img") {
                    service.handle(None, line).await
                } else {
                    service.handle(Some(line), "").await
                };
                println!("{reply}");
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping OCR worker...");
    cancel_token.cancel();
}
