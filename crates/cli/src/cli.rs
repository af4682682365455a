// crates/cli/src/cli.rs
//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "civic-portal", version, about = "Civic portal admin client")]
pub struct Cli {
    /// Config file (TOML). Defaults to `<data dir>/config.toml` when present.
    #[arg(long, global = true, env = "CIVIC_PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `civic_portal_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Emit logs as JSON on stderr.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write daily-rolling log files under `<data dir>/logs`.
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in and store the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CIVIC_PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Drop the stored session and refresh token.
    Logout {
        /// Also delete the state file, stored notifications included.
        #[arg(long)]
        purge: bool,
    },
    /// Show the stored session.
    Status,
    /// First-time employee setup with the emailed verification code.
    CompleteSetup {
        #[arg(long)]
        code: String,
        #[arg(long, env = "CIVIC_PORTAL_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
    /// Send an authenticated API request and print the response body.
    Request {
        #[arg(value_enum)]
        method: HttpMethod,
        /// Path relative to the API base URL, e.g. `/complaints`.
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
    },
    /// Work with stored notifications.
    Notifications {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum NotificationCommands {
    /// List stored notifications, oldest first.
    List {
        /// Only unread ones.
        #[arg(long)]
        unread: bool,
    },
    /// Mark one notification (or all) as read.
    Read {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Remove one notification.
    Remove { id: String },
    /// Remove every stored notification.
    Clear,
    /// Connect to the live channel and print notifications until Ctrl-C.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}
