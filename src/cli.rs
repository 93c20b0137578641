use clap::{Parser, Subcommand};

use crate::models::approval::{ApprovalStatus, Platform};
use crate::models::event::ApprovalAction;

/// pressgate: approval-gated, paced social publishing
#[derive(Parser)]
#[command(name = "pressgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the service (HTTP port, timeout monitor and posting scheduler)
    Serve {
        /// Port to bind (overrides PRESSGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep requests in memory only; nothing survives a restart
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect approval requests
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// Approve or reject a story
    Decide {
        /// approve, reject, approve_all or reject_all
        action: ApprovalAction,
        story_id: String,
        /// Required for approve/reject
        #[arg(long)]
        platform: Option<Platform>,
    },

    /// Manage the harvest schedule
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// List requests, oldest first
    List {
        #[arg(long)]
        status: Option<ApprovalStatus>,
        #[arg(long)]
        story_id: Option<String>,
    },
    /// Show one request
    Show { story_id: String, platform: Platform },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Print the current settings
    Show,
    /// Set the harvest interval in seconds (minimum 60)
    Frequency { secs: u64 },
    /// Set the quiet window, HH:MM HH:MM
    Exclusion { start: String, end: String },
    Enable,
    Disable,
}
