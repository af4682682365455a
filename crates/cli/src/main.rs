// crates/cli/src/main.rs
//! `civic-portal` binary: composition root for the session and notification
//! core.
//!
//! Builds one `SessionManager` and one `NotificationStore` over the same
//! state file, runs a single command, and exits non-zero on any error.

mod cli;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use civic_portal_core::{
    paths, ApiRequest, CredentialStore, FileStore, HttpTransport, KeyValueStore,
    NotificationClient, NotificationRecord, NotificationStore, PortalConfig, SessionManager,
    Transport, WsConnector,
};
use civic_portal_observability::{LogFormat, LoggingConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use cli::{Cli, Commands, NotificationCommands};

struct App {
    config: PortalConfig,
    transport: Arc<HttpTransport>,
    session: SessionManager<HttpTransport>,
    notifications: Arc<NotificationStore>,
}

impl App {
    fn build(config: PortalConfig, kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let credentials = CredentialStore::new(kv.clone());
        let transport = Arc::new(
            HttpTransport::new(&config, credentials.clone()).context("building HTTP client")?,
        );
        let session = SessionManager::new(transport.clone(), credentials, &config);
        let notifications = Arc::new(NotificationStore::load(kv));
        Ok(Self {
            config,
            transport,
            session,
            notifications,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // reqwest and tokio-tungstenite both link rustls; pick the provider once.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    let config = PortalConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let data_dir = config.resolve_data_dir()?;

    let _logging = civic_portal_observability::init(&LoggingConfig {
        filter: cli.log.clone(),
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
        log_dir: cli.log_file.then(|| paths::log_dir(&data_dir)),
    })?;

    let state_path = paths::state_path(&data_dir);
    let kv: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&state_path)
            .with_context(|| format!("opening state file {}", state_path.display()))?,
    );
    let app = App::build(config, kv)?;

    match cli.command {
        Commands::Login { email, password } => {
            let credential = app.session.login(&email, &password).await?;
            let roles: Vec<&str> = credential.roles.iter().map(|r| r.as_str()).collect();
            println!(
                "Logged in as {email} (roles: {}), token expires {}",
                if roles.is_empty() { "none".to_string() } else { roles.join(", ") },
                credential.expires_at.to_rfc3339()
            );
        }
        Commands::Logout { purge } => {
            app.session.logout();
            if purge {
                for line in paths::remove_state_data(&data_dir) {
                    println!("{line}");
                }
            }
            println!("Logged out");
        }
        Commands::Status => status(&app),
        Commands::CompleteSetup { code, new_password } => {
            let response = app.session.complete_setup(&code, &new_password).await?;
            if !response.success {
                bail!("Setup was not completed: {}", response.message);
            }
            println!(
                "{}",
                if response.message.is_empty() {
                    "Setup complete"
                } else {
                    response.message.as_str()
                }
            );
        }
        Commands::Request { method, path, body } => {
            let mut request = ApiRequest::new(method.into(), path);
            if let Some(raw) = body {
                let body: serde_json::Value =
                    serde_json::from_str(&raw).context("--body must be valid JSON")?;
                request = request.with_body(body);
            }
            let response = app.session.send(request).await?;
            match serde_json::from_slice::<serde_json::Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
        Commands::Notifications { command } => notifications(&app, command).await?,
    }

    Ok(())
}

fn status(app: &App) {
    let Some(credential) = app.session.credential() else {
        println!("Not logged in");
        return;
    };
    let now = chrono::Utc::now();
    let roles: Vec<&str> = credential.roles.iter().map(|r| r.as_str()).collect();
    println!("Logged in");
    println!("  roles:         {}", roles.join(", "));
    println!(
        "  expires:       {}{}",
        credential.expires_at.to_rfc3339(),
        if credential.is_expired(now) { " (expired)" } else { "" }
    );
    println!(
        "  refresh token: {}",
        if app.transport.has_refresh_token() { "present" } else { "absent" }
    );
    println!("  unread:        {}", app.notifications.unread_count());
}

fn print_record(record: &NotificationRecord) {
    println!(
        "[{}] {}  {}  {}  {}  {}",
        if record.read { "x" } else { " " },
        record.id,
        record.kind,
        record.tracking_number,
        record.complaint_type,
        record.submitted_at
    );
}

async fn notifications(app: &App, command: NotificationCommands) -> Result<()> {
    let store = &app.notifications;
    match command {
        NotificationCommands::List { unread } => {
            let records: Vec<_> = store
                .list()
                .into_iter()
                .filter(|r| !unread || !r.read)
                .collect();
            if records.is_empty() {
                println!("No notifications");
            }
            for record in &records {
                print_record(record);
            }
        }
        NotificationCommands::Read { id: Some(id), .. } => {
            if !store.mark_read(&id) {
                bail!("No notification with id {id}");
            }
        }
        NotificationCommands::Read { id: None, all: true } => {
            println!("Marked {} notification(s) read", store.mark_all_read());
        }
        NotificationCommands::Read { id: None, all: false } => {
            bail!("Pass a notification id or --all");
        }
        NotificationCommands::Remove { id } => {
            if !store.remove(&id) {
                bail!("No notification with id {id}");
            }
        }
        NotificationCommands::Clear => {
            store.clear();
            println!("Notifications cleared");
        }
        NotificationCommands::Watch => watch(app).await?,
    }
    Ok(())
}

/// Stream live notifications until Ctrl-C.
async fn watch(app: &App) -> Result<()> {
    let credential = app
        .session
        .credential()
        .context("Not logged in; run `civic-portal login` first")?;
    let token = if credential.is_expired(chrono::Utc::now()) {
        info!("stored access token has expired; refreshing before connecting");
        app.session
            .refresh()
            .await
            .context("Session expired; run `civic-portal login` again")?
    } else {
        credential.access_token
    };

    let client =
        NotificationClient::from_config(WsConnector, app.notifications.clone(), &app.config);
    let mut arrivals = app.notifications.subscribe();
    let mut state = client.subscribe_state();
    client.connect(&token);
    eprintln!("Watching {} (Ctrl-C to stop)", app.config.notifications_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            arrival = arrivals.recv() => match arrival {
                Ok(record) => print_record(&record),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(
                    connected = current.connected,
                    reconnect_attempts = current.reconnect_attempts,
                    "notification channel state"
                );
            }
        }
    }

    client.disconnect();
    Ok(())
}
