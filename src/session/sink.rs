use serde::Serialize;
use strum_macros::Display;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// How prominently a status update should be shown.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Progress,
    Info,
    Warning,
    Error,
}

/// A short status line replacing the previous one.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StatusMessage {
    message: String,
    severity: Severity,
}

impl StatusMessage {
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }
}

/// Events delivered to the presentation side, in emission order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "lowercase")]
pub enum SessionEvent {
    Log(String),
    Status(StatusMessage),
}

/// Fire-and-forget sender for operator-facing log lines and status updates.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Creates a sink together with the receiver the presenter drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub(crate) fn log(&self, line: impl Into<String>) {
        self.emit(SessionEvent::Log(line.into()));
    }

    pub(crate) fn status(&self, message: impl Into<String>, severity: Severity) {
        self.emit(SessionEvent::Status(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    /// Logs a failure with its full cause chain and mirrors it as a status.
    pub(crate) fn report_error(&self, error: &SessionError) {
        let severity = error.severity();
        let label = match severity {
            Severity::Warning => "Notice",
            _ => "Error",
        };
        self.log(format!("{label}: {}", error_chain(error)));
        self.status(error.to_string(), severity);
    }

    fn emit(&self, event: SessionEvent) {
        // A closed presenter only means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
