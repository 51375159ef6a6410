use std::path::PathBuf;

use clap::{Parser, Subcommand};
use remedy_common::args::{OpenAiArgs, PostgresArgs};

#[derive(Parser, Debug)]
#[command(name = "remedy-agent")]
#[command(about = "Autonomous remediation agent for Kubernetes alerts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the webhook receiver and incident API server
    Server(ServerArgs),

    /// Validate the runbook documents and exit
    Runbooks(RunbooksArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port for the webhook receiver and incident API
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// `auto` applies mutations; `recommend` only records them
    #[arg(long, env = "AGENT_MODE", default_value = "recommend")]
    pub agent_mode: String,

    /// Cluster name embedded in analyses
    #[arg(long, env = "CLUSTER_NAME", default_value = "unknown")]
    pub cluster_name: String,

    /// Directory of runbook documents, loaded once at startup
    #[arg(long, env = "RUNBOOK_DIR", default_value = "runbooks")]
    pub runbook_dir: PathBuf,

    /// Log verbosity (tracing env-filter directive)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub openai: OpenAiArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct RunbooksArgs {
    /// Directory of runbook documents
    #[arg(long, env = "RUNBOOK_DIR", default_value = "runbooks")]
    pub runbook_dir: PathBuf,
}
