use args::Args;
use clap::Parser;
use llm::registry::Registry;
use llm::LlmState;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_level);

    log::info!("llm-gateway {}", env!("CARGO_PKG_VERSION"));

    let model_config = config::load(args.config.as_deref())?;
    let registry = Registry::new(model_config);
    let state = LlmState::new(registry);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    log::info!("listening on http://{}", listener.local_addr()?);

    let app = llm::router(state);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
