//! Model Mirror CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use modelmirror_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // MODELMIRROR_LOG_FORMAT=json switches to structured output for log shippers
    if std::env::var("MODELMIRROR_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
