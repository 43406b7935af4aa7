use clap::{Parser, Subcommand};

use crate::middleware::rbac::Role;
use crate::models::user::Plan;

/// eventgate: token-authenticated event API with soft deletes
#[derive(Parser)]
#[command(name = "eventgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (overrides EVENTGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep all state in process memory instead of Postgres and Redis
        #[arg(long)]
        in_memory: bool,
    },

    /// Run a single tombstone sweep against Redis and exit
    Sweep,

    /// Manage accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create an account with an explicit role and plan
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long, default_value = "free")]
        plan: Plan,
    },
}
