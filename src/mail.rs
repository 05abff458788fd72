//! Fire-and-forget mail dispatch.
//!
//! Producers push `MailData` onto an unbounded queue through a cloneable
//! `Mailer`; one worker task renders and hands each message to a
//! `MailTransport`. Delivery failures are logged and counted, never returned
//! to the producer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Placeholder in a mail template replaced by the message content.
pub const BODY_PLACEHOLDER: &str = "[%body%]";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    /// HTML body, or the fragment substituted into `template`.
    pub content: String,
    /// File name under the template directory.
    pub template: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail queue closed")]
    QueueClosed,

    #[error("mail template {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template name: {0}")]
    BadTemplateName(String),

    #[error("mail transport: {0}")]
    Transport(String),
}

/// Sending half of the mail queue.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::UnboundedSender<MailData>,
}

impl Mailer {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MailData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Fails only once the worker has gone away.
    pub fn send(&self, msg: MailData) -> Result<(), MailError> {
        self.tx.send(msg).map_err(|_| MailError::QueueClosed)
    }
}

/// Outbound delivery. SMTP lives outside this crate; implementors adapt it.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, to: &str, from: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

/// Transport that writes each delivery to the log instead of a mail server.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, to: &str, from: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        tracing::info!(to, from, subject, bytes = html_body.len(), "mail sent");
        Ok(())
    }
}

/// Final HTML body for `msg`: the bare content, or the named template with
/// its first `[%body%]` replaced.
pub async fn render(msg: &MailData, template_dir: &Path) -> Result<String, MailError> {
    let Some(name) = &msg.template else {
        return Ok(msg.content.clone());
    };
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(MailError::BadTemplateName(name.clone()));
    }
    let template = tokio::fs::read_to_string(template_dir.join(name))
        .await
        .map_err(|source| MailError::Template {
            name: name.clone(),
            source,
        })?;
    Ok(template.replacen(BODY_PLACEHOLDER, &msg.content, 1))
}

/// Consume the queue until every `Mailer` is dropped.
pub async fn run_mail_worker(
    mut rx: mpsc::UnboundedReceiver<MailData>,
    transport: Arc<dyn MailTransport>,
    template_dir: PathBuf,
) {
    while let Some(msg) = rx.recv().await {
        let result = match render(&msg, &template_dir).await {
            Ok(body) => transport.deliver(&msg.to, &msg.from, &msg.subject, &body).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                metrics::counter!(crate::observability::MAIL_DELIVERIES_TOTAL, "status" => "sent").increment(1);
            }
            Err(e) => {
                metrics::counter!(crate::observability::MAIL_DELIVERIES_TOTAL, "status" => "failed").increment(1);
                tracing::warn!(subject = %msg.subject, "mail delivery failed: {e}");
            }
        }
    }
    tracing::info!("mail worker stopped");
}
