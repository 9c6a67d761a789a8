// JSON-lines driver: one turn request per stdin line, turn events on stdout.
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use deskagent::agent_engine::engine::{TurnEngine, TurnRequest};
use deskagent::agent_engine::event_bus::{stop_signal, TurnEmitter, TurnEvent};
use deskagent::config::{self, AppConfig, EnvOverrides};
use deskagent::errors::{DeskAgentResult, ErrorPayload};
use deskagent::executor::local::LocalResolver;
use deskagent::llm::registry::ProviderRegistry;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    deskagent::init_logging();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "deskagent exited");
        std::process::exit(1);
    }
}

async fn run() -> DeskAgentResult<()> {
    let mut cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config; using defaults");
            AppConfig::default()
        }
    };
    cfg.apply_overrides(&EnvOverrides::from_env());

    let registry = ProviderRegistry::from_config(&cfg);
    let engine = match TurnEngine::from_config(&cfg, &registry, Arc::new(LocalResolver::new())) {
        Ok(engine) => engine,
        Err(e) => {
            write_line(&serde_json::to_string(&ErrorPayload::from(&e))?).await?;
            return Err(e);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: TurnRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "invalid turn request");
                write_line(&serde_json::to_string(&ErrorPayload::internal())?).await?;
                continue;
            }
        };
        run_one(&engine, request).await?;
    }
    Ok(())
}

async fn run_one(engine: &TurnEngine, request: TurnRequest) -> DeskAgentResult<()> {
    let (emitter, mut rx) = TurnEmitter::channel();
    let (stop, signal) = stop_signal();

    let writer = tokio::spawn(async move { forward_events(&mut rx).await });
    // The turn keeps running after an interrupt so the pending call is resolved as aborted.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping turn");
            stop.stop();
        }
    });

    let result = engine.run_turn(request, &emitter, signal).await;
    interrupt.abort();
    drop(emitter);
    match writer.await {
        Ok(written) => written?,
        Err(e) => tracing::warn!(error = %e, "event writer task failed"),
    }

    if let Err(e) = result {
        write_line(&serde_json::to_string(&ErrorPayload::from(&e))?).await?;
    }
    Ok(())
}

async fn forward_events(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> DeskAgentResult<()> {
    while let Some(event) = rx.recv().await {
        write_line(&serde_json::to_string(&event)?).await?;
    }
    Ok(())
}

async fn write_line(line: &str) -> DeskAgentResult<()> {
    let mut out = tokio::io::stdout();
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
