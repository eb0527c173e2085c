//! Best-effort "Attendance Recorded" mail to each present identity.

use crate::config::SmtpConfig;
use crate::session::{AttendanceSummary, Recipient};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

const SUBJECT: &str = "Attendance Recorded";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("smtp: {0}")]
    Transport(String),
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, recipient: &Recipient, timestamp: &str) -> Result<(), NotifyError>;
}

/// Used when no SMTP credentials are configured.
pub struct DisabledNotifier;

impl NotificationSink for DisabledNotifier {
    fn notify(&self, recipient: &Recipient, _timestamp: &str) -> Result<(), NotifyError> {
        tracing::debug!(name = %recipient.name, "notifications disabled; skipping");
        Ok(())
    }
}

pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    /// STARTTLS relay with login credentials. No connection is made here.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.username)?;
        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        tracing::info!(host = %config.host, port = config.port, "smtp notifications enabled");
        Ok(Self { transport, from })
    }
}

impl NotificationSink for SmtpNotifier {
    fn notify(&self, recipient: &Recipient, timestamp: &str) -> Result<(), NotifyError> {
        let message = build_message(self.from.clone(), recipient, timestamp)?;
        self.transport
            .send(&message)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.trim().parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn body(name: &str, timestamp: &str) -> String {
    format!("Hello {name},\nYour attendance was recorded at {timestamp}.\n\nRegards,\nRollcall")
}

fn build_message(from: Mailbox, recipient: &Recipient, timestamp: &str) -> Result<Message, NotifyError> {
    Message::builder()
        .from(from)
        .to(parse_mailbox(&recipient.contact)?)
        .subject(SUBJECT)
        .header(ContentType::TEXT_PLAIN)
        .body(body(&recipient.name, timestamp))
        .map_err(|e| NotifyError::Message(e.to_string()))
}

/// Notify every recipient of `summary`, once each. Failures are logged and
/// skipped. Returns how many notifications went out.
pub fn dispatch(sink: &dyn NotificationSink, summary: &AttendanceSummary) -> usize {
    let mut sent = 0;
    for recipient in &summary.recipients {
        match sink.notify(recipient, &summary.timestamp) {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(
                name = %recipient.name,
                error = %e,
                "attendance notification failed"
            ),
        }
    }
    tracing::info!(sent, total = summary.recipients.len(), "attendance notifications dispatched");
    sent
}

/// Run [`dispatch`] on its own thread so callers never wait on the
/// transport. `None` when there is nobody to notify or the thread could not
/// be started.
pub fn dispatch_detached(
    sink: Arc<dyn NotificationSink>,
    summary: AttendanceSummary,
) -> Option<JoinHandle<usize>> {
    if summary.recipients.is_empty() {
        return None;
    }
    std::thread::Builder::new()
        .name("rollcall-notify".into())
        .spawn(move || dispatch(sink.as_ref(), &summary))
        .map_err(|e| tracing::warn!(error = %e, "failed to start notification thread"))
        .ok()
}
