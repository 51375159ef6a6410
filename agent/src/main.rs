use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;

mod analysis;
mod args;
mod cluster;
mod controller;
mod db;
mod engine;
mod error;
mod fingerprint;
mod llm;
mod metrics;
mod models;
mod quantity;
mod router;
mod runbook;
mod server;
mod tools;

#[cfg(test)]
mod test_support;

use args::{Cli, Commands};

fn init_tracing(directive: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    remedy_common::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            init_tracing(&args.log_level);
            remedy_common::metrics::maybe_spawn_metrics_server();
            server::run_server(args).await
        }
        Commands::Runbooks(args) => {
            init_tracing("info");
            let table = runbook::RunbookTable::load_dir(&args.runbook_dir)?;
            let mut ids: Vec<_> = table.ids().collect();
            ids.sort_by_key(|id| id.as_str());
            for id in ids {
                let rb = table.get(id).expect("listed id");
                println!(
                    "{} {} {}",
                    "✅".green(),
                    id.as_str().green(),
                    format!("({} steps)", rb.workflow.len()).dimmed(),
                );
            }
            Ok(())
        }
    }
}
