//! CLI argument definitions using clap
//!
//! Commands:
//! - stormcloud agent [--settings-file <path>] [--hash-db <path>] [--ignore-hash-db]
//! - stormcloud server --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stormcloud - endpoint backup engine
#[derive(Parser, Debug)]
#[command(name = "stormcloud")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the backup agent
    Agent {
        /// Path to settings file (default: <install directory>/settings.cfg)
        #[arg(short = 's', long)]
        settings_file: Option<PathBuf>,

        /// Path to hash db file (default: <install directory>/schash.db)
        #[arg(short = 'd', long)]
        hash_db: Option<PathBuf>,

        /// Back up files even if they haven't changed
        #[arg(short = 'o', long)]
        ignore_hash_db: bool,

        /// Backup server base URL
        #[arg(long, default_value = "https://www2.darkage.io:8443")]
        server_url: String,
    },

    /// Run the backup server
    Server {
        /// Path to server configuration file
        #[arg(long, default_value = "./stormcloud-server.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
