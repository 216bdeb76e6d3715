use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Instance Fleet - Run isolated application instances on shared infrastructure")]
pub struct Cli {
    /// Settings file path (defaults to ~/.fleet/fleet.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding identity records (overrides the settings file)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the shared database/cache tier
    #[command(subcommand)]
    Infra(InfraCommands),
    /// Provision (if needed) and start an instance
    Up {
        /// Server name
        server: String,
        /// Instance name
        instance: String,
        /// First port to try for a newly provisioned instance
        #[arg(short, long)]
        port: Option<u16>,
        /// Print credentials in full
        #[arg(long)]
        show_secrets: bool,
    },
    /// Pull newer images and recreate an instance
    Update {
        /// Server name
        server: String,
        /// Instance name
        instance: String,
    },
    /// Stop an instance and delete its data and identity
    Down {
        /// Server name
        server: String,
        /// Instance name
        instance: String,
    },
    /// Show an instance's identity
    Show {
        /// Server name
        server: String,
        /// Instance name
        instance: String,
        /// Print credentials in full
        #[arg(long)]
        show_secrets: bool,
    },
    /// List instances
    List {
        /// List units the container engine reports instead of stored records
        #[arg(long)]
        running: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find storage left behind by instances that no longer exist
    Orphans {
        /// Only list candidates; never prompt or delete
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum InfraCommands {
    /// Start the shared tier, creating its master credential on first use
    Up,
    /// Stop the shared tier and delete all of its data
    Down {
        /// Proceed even while instances are still provisioned
        #[arg(long)]
        force: bool,
    },
    /// Show whether the shared tier is provisioned and running
    Status,
}
