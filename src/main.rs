use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sinyfy::cli::CloneCommand;
use sinyfy::pipeline::PageCloner;

const LOG_FILE: &str = "sinyfy.log";

#[tokio::main]
async fn main() {
    let args = CloneCommand::parse();
    init_logging(args.debug);

    let cloner = match PageCloner::new(&args.url, &args.output, !args.no_images) {
        Ok(cloner) => cloner,
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = cloner.run().await {
        error!("{:#}", err);
        if args.debug {
            eprintln!("{:?}", err);
        }
        std::process::exit(1);
    }
}

/// Timestamped lines to stdout and, when it can be opened, to sinyfy.log.
fn init_logging(debug: bool) {
    let default_filter = if debug { "sinyfy=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    match OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        Ok(file) => registry
            .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            .init(),
        Err(_) => registry.init(),
    }
}
