use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigStore};
use crate::telegram::{InboundMessage, MessageSource, SourceError};
use crate::wled::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Human-readable status line for the presentation layer. Fire-and-forget;
/// the worker never waits on the receiver.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub text: String,
    pub severity: Severity,
}

pub type StatusSender = mpsc::UnboundedSender<StatusEvent>;

/// Handle to the single background poll worker.
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals the worker to stop and waits for it to finish. A dispatch
    /// already in flight completes; no new dispatch starts. Callers must
    /// await this before spawning a replacement worker, so at most one
    /// poller is ever alive.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("Poll worker task failed: {}", e);
        }
    }
}

/// Starts the background poll worker for the configured chat.
pub fn spawn(
    config: Config,
    source: Arc<dyn MessageSource>,
    trigger: Arc<dyn Trigger>,
    store: Arc<dyn ConfigStore>,
    status: StatusSender,
) -> WorkerHandle {
    let cancel = CancellationToken::new();
    let worker = PollWorker {
        config,
        source,
        trigger,
        store,
        status,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(worker.run());
    WorkerHandle { cancel, join }
}

struct PollWorker {
    config: Config,
    source: Arc<dyn MessageSource>,
    trigger: Arc<dyn Trigger>,
    store: Arc<dyn ConfigStore>,
    status: StatusSender,
    cancel: CancellationToken,
}

impl PollWorker {
    fn emit(&self, severity: Severity, text: impl Into<String>) {
        let _ = self.status.send(StatusEvent {
            text: text.into(),
            severity,
        });
    }

    async fn run(mut self) {
        self.emit(Severity::Info, "Connecting to Telegram...");

        if let Err(e) = self.config.validate_source() {
            error!("{}", e);
            self.emit(Severity::Error, format!("ERROR: {}", e));
            return;
        }

        let identity = match self.source.verify_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                let text = connect_error_text(&e);
                error!("{}", text);
                self.emit(Severity::Error, text);
                return;
            }
        };

        debug!(
            "Verified bot identity: id={}, name={}",
            identity.id, identity.first_name
        );
        info!("Connected as {}", identity.display_name());
        self.emit(
            Severity::Success,
            format!(
                "Connected as {}! Waiting for messages...",
                identity.display_name()
            ),
        );

        let interval = self.config.polling_interval();
        // Long-poll cursor over update ids. Ephemeral by design: on restart
        // the durable last_message_id watermark filters out anything the
        // source replays.
        let mut cursor: i64 = 0;

        'poll: loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.source.fetch_updates(cursor) => res,
            };

            match fetched {
                Ok(batch) => {
                    debug!("Received {} updates", batch.len());
                    for message in batch {
                        // A stop request must not start a new dispatch, but a
                        // dispatch already underway always runs to completion.
                        if self.cancel.is_cancelled() {
                            break 'poll;
                        }
                        cursor = cursor.max(message.update_id);
                        self.dispatch(&message).await;
                    }
                }
                Err(SourceError::Timeout) => {
                    debug!("Polling timeout (normal, continuing)");
                }
                Err(e) => {
                    error!("Failed to poll Telegram: {}", e);
                    self.emit(
                        Severity::Error,
                        format!("Error polling: {}", truncate(&e.to_string(), 50)),
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Poll worker stopped");
    }

    async fn dispatch(&mut self, message: &InboundMessage) {
        debug!(
            "Message {} from chat {}: {:?}",
            message.message_id, message.chat_id, message.text
        );
        if message.chat_id != self.config.chat_id {
            debug!(
                "Ignoring message from chat {} (expected {})",
                message.chat_id, self.config.chat_id
            );
            return;
        }
        if message.message_id <= self.config.last_message_id {
            debug!(
                "Message {} already processed (watermark {})",
                message.message_id, self.config.last_message_id
            );
            return;
        }

        info!(
            "New message {} ({:?}), firing trigger",
            message.message_id, message.kind
        );
        if let Err(e) = self.trigger.fire().await {
            // The watermark still advances: a briefly unreachable device is
            // no reason to replay the message later.
            error!("Trigger failed: {:#}", e);
            self.emit(
                Severity::Error,
                format!("Error: {}", truncate(&e.to_string(), 50)),
            );
        }

        self.config.last_message_id = message.message_id;
        if let Err(e) = self.store.save(&self.config) {
            warn!("Failed to persist watermark: {:#}", e);
            self.emit(
                Severity::Warning,
                format!("Could not save config: {}", truncate(&e.to_string(), 50)),
            );
        }
    }
}

fn connect_error_text(e: &SourceError) -> String {
    match e {
        SourceError::Timeout => {
            "ERROR: Connection timed out! Check your internet connection.".to_string()
        }
        SourceError::Unauthorized => "ERROR: Invalid bot token! Check your bot token.".to_string(),
        SourceError::NotFound => "ERROR: Bot not found! Check your bot token.".to_string(),
        SourceError::Forbidden => {
            "ERROR: Bot access forbidden! Make sure bot is active.".to_string()
        }
        SourceError::Transient(msg) => format!("Telegram error: {}", msg),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
