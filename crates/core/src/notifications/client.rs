// crates/core/src/notifications/client.rs
//! Notification Client: one supervisor task per `connect`, reconnecting on a
//! fixed delay up to a bounded number of attempts.
//!
//! Ordering per connection: the attempt counter is reset and `connected`
//! published before the first frame is read; `connected = false` is
//! published before the reconnect decision is made.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connector::{Connector, InboundFrame};
use super::store::NotificationStore;
use crate::config::PortalConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    /// Reconnects made since the last successful open.
    pub reconnect_attempts: u32,
}

/// Constant delay, bounded attempts, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// State visible to both the handle and the supervisor. The generation
/// stops a superseded supervisor from publishing over its successor.
struct Shared {
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    fn publish(&self, generation: u64, next: ConnectionState) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

struct ActiveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct NotificationClient<C: Connector> {
    connector: Arc<C>,
    store: Arc<NotificationStore>,
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveTask>>,
}

impl<C: Connector> NotificationClient<C> {
    pub fn new(
        connector: C,
        store: Arc<NotificationStore>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            connector: Arc::new(connector),
            store,
            url: url.into(),
            policy,
            shared: Arc::new(Shared {
                state,
                generation: AtomicU64::new(0),
            }),
            active: Mutex::new(None),
        }
    }

    pub fn from_config(connector: C, store: Arc<NotificationStore>, config: &PortalConfig) -> Self {
        Self::new(
            connector,
            store,
            config.notifications_url.clone(),
            ReconnectPolicy::from_config(config),
        )
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open the channel with `token` in the query string, superseding any
    /// running connection. Must be called inside a tokio runtime.
    pub fn connect(&self, token: &str) {
        let url = with_token(&self.url, token);
        let cancel = CancellationToken::new();

        let mut active = self.active.lock().expect("notification task lock poisoned");
        if let Some(previous) = active.take() {
            debug!("superseding previous notification connection");
            previous.cancel.cancel();
            previous.handle.abort();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.publish(generation, ConnectionState::default());

        let supervisor = Supervisor {
            connector: self.connector.clone(),
            store: self.store.clone(),
            policy: self.policy,
            shared: self.shared.clone(),
            generation,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervisor.run(url));
        *active = Some(ActiveTask { cancel, handle });
    }

    /// Tear down the connection and any pending reconnect. A no-op when
    /// nothing is running, including after the client gave up reconnecting.
    pub fn disconnect(&self) {
        let Some(task) = self
            .active
            .lock()
            .expect("notification task lock poisoned")
            .take()
        else {
            return;
        };
        if task.handle.is_finished() {
            // Exhausted its reconnects; the published state already says so.
            return;
        }
        task.cancel.cancel();
        task.handle.abort();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.state.send_if_modified(|current| {
            let changed = *current != ConnectionState::default();
            *current = ConnectionState::default();
            changed
        });
        info!("notification channel disconnected");
    }

    /// Whether a supervisor task is still running (connected or waiting to
    /// reconnect).
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .expect("notification task lock poisoned")
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl<C: Connector> Drop for NotificationClient<C> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(task) = active.take() {
                task.cancel.cancel();
                task.handle.abort();
            }
        }
    }
}

struct Supervisor<C: Connector> {
    connector: Arc<C>,
    store: Arc<NotificationStore>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
}

impl<C: Connector> Supervisor<C> {
    async fn run(self, url: String) {
        let target = redact(&url);
        let mut attempts = 0u32;

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect(&url) => result,
            };

            match connected {
                Ok(mut frames) => {
                    attempts = 0;
                    self.publish(true, 0);
                    info!(url = %target, "notification socket open");

                    loop {
                        let frame = tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            frame = frames.next() => frame,
                        };
                        match frame {
                            Some(Ok(InboundFrame::Text(text))) => {
                                self.store.handle_text(&text);
                            }
                            Some(Ok(InboundFrame::Binary(bytes))) => {
                                debug!(len = bytes.len(), "ignoring binary notification frame");
                            }
                            Some(Ok(InboundFrame::Close)) | None => {
                                info!(url = %target, "notification socket closed");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(url = %target, error = %e, "notification socket read failed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(url = %target, attempts, error = %e, "notification socket connect failed");
                }
            }

            self.publish(false, attempts);
            if attempts >= self.policy.max_attempts {
                error!(url = %target, max = self.policy.max_attempts, "Max reconnect attempts reached");
                return;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
            attempts += 1;
            info!(attempt = attempts, max = self.policy.max_attempts, "reconnecting notification socket");
            self.publish(false, attempts);
        }
    }

    fn publish(&self, connected: bool, reconnect_attempts: u32) {
        self.shared.publish(
            self.generation,
            ConnectionState {
                connected,
                reconnect_attempts,
            },
        );
    }
}

fn with_token(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}token={}", urlencoding::encode(token))
}

/// The URL without its query, so tokens stay out of the logs.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
