use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use kf_runtime::{load_config, App};
use kf_strategy::{MaCrossStrategy, StopTakeStrategy, StrategyParams};
use kf_types::AppConfig;
use rust_decimal_macros::dec;

fn status_addr() -> String {
    std::env::var("KINGFISHER_STATUS_ADDR").unwrap_or_else(|_| "127.0.0.1:8316".to_string())
}

fn config_path() -> String {
    std::env::var("KINGFISHER_CONFIG").unwrap_or_else(|_| "kingfisher.json".to_string())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let verb = std::env::args().nth(1).unwrap_or_else(|| "start".to_string());
    match verb.as_str() {
        "start" => {
            let path = config_path();
            let config = load_config(&path)
                .map_err(|e| anyhow::anyhow!("failed to load configuration from {path}: {e}"))?;

            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.enable_all();
            if let Some(threads) = config.engine.worker_threads {
                builder.worker_threads(threads);
            }
            builder.build()?.block_on(run(config))
        }
        "status" => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(query_status()),
        other => {
            eprintln!("usage: kingfisherd [start|status] (unknown verb '{other}')");
            std::process::exit(2);
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let app = Arc::new(App::build(config)?);

    // Reference strategies; real deployments register their own through the
    // library API.
    let mut entry_params = StrategyParams::new("MA crossover entry");
    entry_params.set("short_period", 5).set("long_period", 20);
    app.strategies()
        .register(Box::new(MaCrossStrategy::new("ma-cross", 5, 20)), entry_params)?;
    app.strategies().register(
        Box::new(StopTakeStrategy::new("stop-take", dec!(0.05), dec!(0.10))),
        StrategyParams::new("Stop-loss / take-profit exit"),
    )?;

    app.start()?;

    let listener = TcpListener::bind(status_addr()).await?;
    info!(addr = %listener.local_addr()?, "status endpoint listening");

    let server_app = Arc::clone(&app);
    let server = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let app = Arc::clone(&server_app);
            tokio::spawn(async move {
                let mut buffer = [0u8; 1024];
                let _ = socket.read(&mut buffer).await;

                let body = serde_json::to_string(&app.status())
                    .unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#));
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    server.abort();

    let stats = app.stop();
    info!(
        published = stats.published,
        dispatched = stats.dispatched,
        dropped = stats.dropped,
        "final engine statistics"
    );
    Ok(())
}

async fn query_status() -> anyhow::Result<()> {
    let addr = status_addr();
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach kingfisherd at {addr}: {e}"))?;

    stream
        .write_all(b"GET /status HTTP/1.1\r\nHost: kingfisherd\r\n\r\n")
        .await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let text = String::from_utf8_lossy(&response);
    match text.split("\r\n\r\n").nth(1) {
        Some(body) => println!("{body}"),
        None => {
            error!("malformed status response");
            std::process::exit(1);
        }
    }
    Ok(())
}
