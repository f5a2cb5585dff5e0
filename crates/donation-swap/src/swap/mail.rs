//! Outbound email seam.
//!
//! Delivery is best effort: the engine logs a failed send and moves on, so
//! a state transition is never rolled back because a notification was lost.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl OutboundEmail {
    pub fn new(subject: impl Into<String>, text: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            text: text.into(),
            html: None,
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }

    pub fn to_many(subject: impl Into<String>, text: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            text: text.into(),
            html: None,
            to,
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Transport(String),
}

pub trait MailSender: Send + Sync {
    fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

/// Send an email, logging and swallowing any transport failure.
pub fn send_best_effort(sender: &dyn MailSender, email: OutboundEmail) {
    let subject = email.subject.clone();
    let recipients = email.to.join(", ");
    if let Err(err) = sender.send(email) {
        warn!(%subject, %recipients, %err, "email delivery failed; continuing");
    }
}

/// Stand-in transport that only logs the send. Useful for deployments that
/// have not wired an SMTP relay yet.
#[derive(Default, Clone)]
pub struct TracingMailer;

impl MailSender for TracingMailer {
    fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        info!(
            subject = %email.subject,
            to = %email.to.join(", "),
            "outbound email (tracing transport)"
        );
        Ok(())
    }
}

/// Captures every send for inspection; the test double for this seam.
#[derive(Default, Clone)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutboundEmail> {
        self.sent()
            .into_iter()
            .filter(|email| email.to.iter().any(|to| to == address))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("mailer mutex poisoned").clear();
    }
}

impl MailSender for RecordingMailer {
    fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        self.sent.lock().expect("mailer mutex poisoned").push(email);
        Ok(())
    }
}

/// Transport that always fails, for exercising the best-effort path.
#[derive(Default, Clone)]
pub struct FailingMailer;

impl MailSender for FailingMailer {
    fn send(&self, _email: OutboundEmail) -> Result<(), MailError> {
        Err(MailError::Transport("relay offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_mailer_filters_by_recipient() {
        let mailer = RecordingMailer::default();
        mailer
            .send(OutboundEmail::new("hello", "body", "a@example.org"))
            .expect("send");
        mailer
            .send(OutboundEmail::new("hi", "body", "b@example.org"))
            .expect("send");
        assert_eq!(mailer.sent().len(), 2);
        assert_eq!(mailer.sent_to("a@example.org").len(), 1);
        assert_eq!(mailer.sent_to("c@example.org").len(), 0);
    }

    #[test]
    fn best_effort_send_swallows_transport_errors() {
        send_best_effort(
            &FailingMailer,
            OutboundEmail::new("subject", "body", "x@example.org"),
        );
    }
}
