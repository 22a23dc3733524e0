use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP job service
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides server.port and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single job from a JSON request file and print the result
    Run {
        /// Job request in the same JSON shape the HTTP API accepts
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Verify ffmpeg is available and print its version
    Check,

    /// Write the default configuration to a file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },

    /// Remove scratch workspaces idle for longer than `pipeline.stale_after_secs`
    PurgeScratch,
}
