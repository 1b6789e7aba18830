use clap::Parser;

/// Runs the LLM gateway's HTTP server.
#[derive(Debug, Parser)]
#[command(name = "gateway", version, about)]
pub struct Args {
    /// Path to the model-config YAML document.
    ///
    /// Falls back to `MODEL_CONFIG` (inline YAML) or `MODEL_CONFIG_PATH`
    /// when unset.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Address to bind the HTTP listener to.
    #[arg(short, long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Log filter, e.g. `info` or `llm=debug,gateway=debug`.
    #[arg(short, long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
